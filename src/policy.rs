// LN gossip router: lightning network graph maintenance and payment route
// computation.
//
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! Reactions to payment failures and graph aging: temporary edge
//! disabling, permanent channel removal and pruning of stale channels.

use std::ops::BitOr;

use log::{debug, warn};
use secp256k1::PublicKey;

use crate::bolt7::{self, MSG_TYPE_CHANNEL_UPDATE};
use crate::routing::RoutingState;
use crate::types::{ShortChannelId, Timestamp};

/// Seconds a channel direction is kept out of route consideration after a
/// non-permanent routing failure
pub const TEMPORARY_UNROUTABLE_SECS: u32 = 20;

/// BOLT-4 onion failure code, as reported by the erring node of a failed
/// payment attempt
#[derive(
    Wrapper, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug,
    Default, From, Display,
)]
#[display(LowerHex)]
#[wrapper(LowerHex, UpperHex)]
pub struct FailCode(u16);

impl FailCode {
    /// The failure carries a `channel_update` to apply
    pub const UPDATE: FailCode = FailCode(0x1000);
    /// The failure concerns the erring node as a whole, not one channel
    pub const NODE: FailCode = FailCode(0x2000);
    /// The failure is permanent
    pub const PERM: FailCode = FailCode(0x4000);
    /// The onion was unparsable by the erring node
    pub const BADONION: FailCode = FailCode(0x8000);

    #[inline]
    pub fn is_update(self) -> bool {
        self.0 & Self::UPDATE.0 != 0
    }

    #[inline]
    pub fn is_node(self) -> bool {
        self.0 & Self::NODE.0 != 0
    }

    #[inline]
    pub fn is_perm(self) -> bool {
        self.0 & Self::PERM.0 != 0
    }
}

impl BitOr for FailCode {
    type Output = FailCode;

    fn bitor(self, rhs: FailCode) -> FailCode {
        FailCode(self.0 | rhs.0)
    }
}

impl RoutingState {
    /// Reacts to an onion failure report, reading the wall clock.
    ///
    /// See [`Self::routing_failure_at`].
    pub fn routing_failure(
        &mut self,
        erring_node: &PublicKey,
        scid: ShortChannelId,
        failcode: FailCode,
        channel_update: &[u8],
    ) {
        self.routing_failure_at(
            erring_node,
            scid,
            failcode,
            channel_update,
            Timestamp::now(),
        )
    }

    /// Reacts to an onion failure report.
    ///
    /// Non-permanent failures take the erring node's outgoing half out of
    /// route consideration for [`TEMPORARY_UNROUTABLE_SECS`]; permanent
    /// ones destroy the channel. With the NODE bit every channel incident
    /// on the erring node is treated this way instead of the reported one.
    /// An embedded `channel_update` is applied after the deactivation, so
    /// a newer signed update may re-enable the half.
    pub fn routing_failure_at(
        &mut self,
        erring_node: &PublicKey,
        scid: ShortChannelId,
        failcode: FailCode,
        channel_update: &[u8],
        now: Timestamp,
    ) {
        debug!(
            "Received routing failure {}, erring node {}, channel {}",
            failcode, erring_node, scid
        );

        if self.graph.get_node(erring_node).is_none() {
            warn!("routing_failure: erring node {} not in map", erring_node);
            // No node, so no channel, so any channel_update can also be
            // ignored
            return;
        }

        if failcode.is_node() {
            // BOLT #4: remove all channels connected with the erring node
            // from consideration
            let channels = self
                .graph
                .get_node(erring_node)
                .map(|node| node.channels.clone())
                .unwrap_or_default();
            for incident in channels {
                self.fail_channel_out(erring_node, &incident, failcode, now);
            }
        } else {
            let target = match self.graph.get_channel(&scid) {
                None => {
                    warn!("routing_failure: channel {} unknown", scid);
                    None
                }
                Some(channel) if !channel.connects(erring_node) => {
                    warn!(
                        "routing_failure: channel {} does not connect to {}",
                        scid, erring_node
                    );
                    None
                }
                Some(_) => Some(scid),
            };
            if let Some(scid) = target {
                self.fail_channel_out(erring_node, &scid, failcode, now);
            }
        }

        // Apply the attached update after deactivating, so that a newer
        // channel_update reactivates the half
        if failcode.is_update() {
            if channel_update.is_empty() {
                // Local failures carry no update; not worth a warning
                if erring_node != &self.local_id {
                    warn!(
                        "routing_failure: UPDATE bit set, no channel_update; \
                         failcode {}",
                        failcode
                    );
                }
                return;
            }
            if bolt7::message_type(channel_update)
                != Some(MSG_TYPE_CHANNEL_UPDATE)
            {
                warn!(
                    "routing_failure: attached message is not a \
                     channel_update"
                );
                return;
            }
            self.handle_channel_update(channel_update);
        } else if !channel_update.is_empty() {
            warn!(
                "routing_failure: UPDATE bit clear, channel_update given; \
                 failcode {}",
                failcode
            );
        }
    }

    fn fail_channel_out(
        &mut self,
        node: &PublicKey,
        scid: &ShortChannelId,
        failcode: FailCode,
        now: Timestamp,
    ) {
        if failcode.is_perm() {
            self.graph.destroy_channel(scid);
        } else {
            // BOLT #4: if the PERM bit is not set, the channel should be
            // restored as new channel_updates are received
            if let Some(channel) = self.graph.channel_mut(scid) {
                let direction = channel.direction_from(node);
                channel.half[direction].unroutable_until =
                    now + TEMPORARY_UNROUTABLE_SECS;
            }
        }
    }

    /// Takes both directions of a channel out of route consideration for
    /// [`TEMPORARY_UNROUTABLE_SECS`], reading the wall clock
    pub fn mark_channel_unroutable(&mut self, scid: ShortChannelId) {
        self.mark_channel_unroutable_at(scid, Timestamp::now())
    }

    /// Takes both directions of a channel out of route consideration for
    /// [`TEMPORARY_UNROUTABLE_SECS`]
    pub fn mark_channel_unroutable_at(
        &mut self,
        scid: ShortChannelId,
        now: Timestamp,
    ) {
        debug!("Received mark_channel_unroutable channel {}", scid);
        match self.graph.channel_mut(&scid) {
            None => warn!(
                "mark_channel_unroutable: channel {} not in routemap",
                scid
            ),
            Some(channel) => {
                channel.half[0].unroutable_until =
                    now + TEMPORARY_UNROUTABLE_SECS;
                channel.half[1].unroutable_until =
                    now + TEMPORARY_UNROUTABLE_SECS;
            }
        }
    }

    /// Removes every public channel not updated in either direction for
    /// the configured prune timeout, reading the wall clock
    pub fn route_prune(&mut self) {
        self.route_prune_at(Timestamp::now())
    }

    /// Removes every public channel not updated in either direction for
    /// the configured prune timeout
    pub fn route_prune_at(&mut self, now: Timestamp) {
        // Anything below this highwater mark ought to be pruned
        let highwater = now - self.prune_timeout;

        // Destruction perturbs iteration, so collect the victims first
        let pruned: Vec<ShortChannelId> = self
            .graph
            .channels()
            .filter(|channel| {
                // Local-only channels are not pruned
                channel.public
                    && channel.half[0].last_timestamp < highwater
                    && channel.half[1].last_timestamp < highwater
            })
            .map(|channel| channel.scid)
            .collect();

        for scid in pruned {
            debug!("Pruning channel {} from network view", scid);
            self.graph.destroy_channel(&scid);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::routing::test::{
        canonical, chain, endpoint, keypair, public_channel, signed_update,
        state, Endpoint, PRUNE_TIMEOUT,
    };

    fn now() -> Timestamp {
        Timestamp::from(10_000u32)
    }

    /// Two channels `a - b - c`, both public with active halves
    fn linear_graph(
        state: &mut RoutingState,
        a: &Endpoint,
        b: &Endpoint,
        c: &Endpoint,
    ) -> (ShortChannelId, ShortChannelId) {
        let scid_ab = ShortChannelId::new(100, 1, 0).unwrap();
        let scid_bc = ShortChannelId::new(100, 2, 0).unwrap();
        for (scid, left, right) in
            [(scid_ab, a, b), (scid_bc, b, c)]
        {
            public_channel(state, scid, left, right, now());
            let (node1, node2) = canonical(left, right);
            state.handle_channel_update(&signed_update(
                chain(),
                scid,
                node1,
                0,
                9_600,
                1000,
                100,
                10,
            ));
            state.handle_channel_update(&signed_update(
                chain(),
                scid,
                node2,
                1,
                9_600,
                1000,
                100,
                10,
            ));
        }
        (scid_ab, scid_bc)
    }

    #[test]
    fn perm_failure_destroys_channel() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (_, scid_bc) = linear_graph(&mut state, &a, &b, &c);

        state.routing_failure_at(
            &b.pk,
            scid_bc,
            FailCode::PERM | FailCode::UPDATE,
            &[],
            now(),
        );

        assert!(state.graph().get_channel(&scid_bc).is_none());
        // `c` lost its only channel
        assert!(state.graph().get_node(&c.pk).is_none());
        assert!(state.graph().get_node(&b.pk).is_some());
    }

    #[test]
    fn transient_failure_is_a_20s_timeout() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (_, scid_bc) = linear_graph(&mut state, &a, &b, &c);

        state.routing_failure_at(&b.pk, scid_bc, FailCode::from(7), &[], now());

        let channel = state.graph().get_channel(&scid_bc).unwrap();
        let out = channel.direction_from(&b.pk);
        assert_eq!(
            channel.half[out].unroutable_until,
            now() + TEMPORARY_UNROUTABLE_SECS
        );
        assert!(!channel.half[out].is_routable(now() + 20));
        assert!(channel.half[out].is_routable(now() + 21));
        // The opposite direction is untouched
        assert!(channel.half[1 - out].is_routable(now() + 1));
    }

    #[test]
    fn node_failure_affects_all_incident_channels() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (scid_ab, scid_bc) = linear_graph(&mut state, &a, &b, &c);

        state.routing_failure_at(
            &b.pk,
            scid_ab,
            FailCode::NODE | FailCode::from(7),
            &[],
            now(),
        );

        for scid in [scid_ab, scid_bc] {
            let channel = state.graph().get_channel(&scid).unwrap();
            let out = channel.direction_from(&b.pk);
            assert!(!channel.half[out].is_routable(now() + 1));
        }
    }

    #[test]
    fn node_perm_failure_destroys_all_incident_channels() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (scid_ab, scid_bc) = linear_graph(&mut state, &a, &b, &c);

        state.routing_failure_at(
            &b.pk,
            scid_ab,
            FailCode::NODE | FailCode::PERM,
            &[],
            now(),
        );

        assert!(state.graph().get_channel(&scid_ab).is_none());
        assert!(state.graph().get_channel(&scid_bc).is_none());
        assert_eq!(state.graph().node_count(), 0);
    }

    #[test]
    fn failure_for_unknown_node_is_a_noop() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (scid_ab, _) = linear_graph(&mut state, &a, &b, &c);
        let (_, stranger) = keypair(9);

        state.routing_failure_at(
            &stranger,
            scid_ab,
            FailCode::PERM,
            &[],
            now(),
        );
        assert!(state.graph().get_channel(&scid_ab).is_some());
    }

    #[test]
    fn failure_for_unconnected_channel_is_a_noop() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (scid_ab, scid_bc) = linear_graph(&mut state, &a, &b, &c);

        // `a` is not an endpoint of the b-c channel
        state.routing_failure_at(&a.pk, scid_bc, FailCode::PERM, &[], now());
        assert!(state.graph().get_channel(&scid_bc).is_some());
        assert!(state.graph().get_channel(&scid_ab).is_some());
    }

    #[test]
    fn attached_update_reenables_the_half() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (_, scid_bc) = linear_graph(&mut state, &a, &b, &c);

        let channel = state.graph().get_channel(&scid_bc).unwrap();
        let out = channel.direction_from(&b.pk);
        let (node1, node2) = canonical(&b, &c);
        let signer = if out == 0 { node1 } else { node2 };
        let update = signed_update(
            chain(),
            scid_bc,
            signer,
            out as u16,
            9_700,
            500,
            50,
            10,
        );

        state.routing_failure_at(
            &b.pk,
            scid_bc,
            FailCode::UPDATE | FailCode::from(7),
            &update,
            now(),
        );

        let channel = state.graph().get_channel(&scid_bc).unwrap();
        // The newer update cleared the unroutable window and applied fees
        assert_eq!(
            channel.half[out].unroutable_until,
            Timestamp::from(0u32)
        );
        assert_eq!(channel.half[out].base_fee, 500);
        assert!(channel.half[out].is_routable(now()));
    }

    #[test]
    fn mark_unroutable_covers_both_directions() {
        let mut state = state();
        let (a, b, c) = (endpoint(1), endpoint(2), endpoint(3));
        let (scid_ab, _) = linear_graph(&mut state, &a, &b, &c);

        state.mark_channel_unroutable_at(scid_ab, now());
        let channel = state.graph().get_channel(&scid_ab).unwrap();
        for half in &channel.half {
            assert!(!half.is_routable(now() + 20));
            assert!(half.is_routable(now() + 21));
        }
    }

    #[test]
    fn prune_removes_quiet_channels_and_their_nodes() {
        let mut state = state();
        let (a, b) = (endpoint(1), endpoint(2));
        let scid = ShortChannelId::new(100, 1, 0).unwrap();
        // Announced at t=10000: halves start at 10000 - timeout/2
        public_channel(&mut state, scid, &a, &b, now());

        // Not yet stale
        state.route_prune_at(now() + PRUNE_TIMEOUT / 2 - 1);
        assert_eq!(state.graph().channel_count(), 1);

        state.route_prune_at(now() + 2 * PRUNE_TIMEOUT);
        assert_eq!(state.graph().channel_count(), 0);
        assert_eq!(state.graph().node_count(), 0);
    }

    #[test]
    fn prune_spares_channels_updated_in_one_direction() {
        let mut state = state();
        let (a, b) = (endpoint(1), endpoint(2));
        let scid = ShortChannelId::new(100, 1, 0).unwrap();
        public_channel(&mut state, scid, &a, &b, now());

        let (node1, _) = canonical(&a, &b);
        state.handle_channel_update(&signed_update(
            chain(),
            scid,
            node1,
            0,
            (now() + 1500).as_secs(),
            1000,
            100,
            10,
        ));

        state.route_prune_at(now() + 2000);
        assert_eq!(state.graph().channel_count(), 1);

        // Once the update itself ages out, the channel goes
        state.route_prune_at(now() + 1500 + PRUNE_TIMEOUT + 1);
        assert_eq!(state.graph().channel_count(), 0);
    }

    #[test]
    fn prune_ignores_private_channels() {
        let mut state = state();
        let (_, a) = keypair(1);
        let (_, b) = keypair(2);
        let scid = ShortChannelId::new(100, 1, 0).unwrap();
        state.graph_mut().new_channel(scid, &a, &b, Timestamp::from(0u32));

        state.route_prune_at(Timestamp::from(1_000_000u32));
        assert_eq!(state.graph().channel_count(), 1);
    }
}
