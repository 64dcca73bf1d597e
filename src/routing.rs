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

//! Gossip ingest: the state machine turning raw gossip messages into the
//! verified channel graph.
//!
//! Ingest never reports errors to the caller: each message is received,
//! validated and either applied or dropped with a log line. The only
//! signal leaving [`RoutingState::handle_channel_announcement`] is the
//! short channel id the caller must look up on-chain; the answer comes
//! back later through [`RoutingState::resolve_pending_channel`], and any
//! updates or node announcements arriving in between are buffered, not
//! blocked.

use amplify::Slice32;
use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_2};
use bitcoin::blockdata::script::{Builder, Script};
use log::{debug, trace};
use secp256k1::PublicKey;

use crate::bolt7::{
    self, ChannelAnnouncement, ChannelUpdate, NodeAnnouncement,
    CHANNEL_ANNOUNCEMENT_HASH_OFFSET, GOSSIP_HASH_OFFSET,
    MSG_TYPE_CHANNEL_ANNOUNCEMENT, MSG_TYPE_CHANNEL_UPDATE,
    MSG_TYPE_NODE_ANNOUNCEMENT,
};
use crate::broadcast::BroadcastQueue;
use crate::graph::ChannelGraph;
use crate::pending::{PendingChannel, PendingStore};
use crate::router::MAX_PROPORTIONAL_FEE;
use crate::types::{ShortChannelId, Timestamp};

/// The complete network view of one node: verified graph, gossip in
/// flight, and the queue of messages to forward to peers
#[derive(Clone, Debug)]
pub struct RoutingState {
    pub(crate) chain_hash: Slice32,
    pub(crate) local_id: PublicKey,
    pub(crate) prune_timeout: u32,
    pub(crate) graph: ChannelGraph,
    pub(crate) pending: PendingStore,
    pub(crate) broadcasts: BroadcastQueue,
}

impl RoutingState {
    /// Constructs an empty network view.
    ///
    /// `chain_hash` is the only chain whose gossip is accepted;
    /// `local_id` identifies the local node for locality reporting;
    /// `prune_timeout` is the wall-clock age in seconds after which a
    /// public channel with no fresh updates on either side is removed.
    pub fn new(
        chain_hash: Slice32,
        local_id: PublicKey,
        prune_timeout: u32,
    ) -> Self {
        RoutingState {
            chain_hash,
            local_id,
            prune_timeout,
            graph: ChannelGraph::new(),
            pending: PendingStore::new(),
            broadcasts: BroadcastQueue::new(),
        }
    }

    #[inline]
    pub fn chain_hash(&self) -> Slice32 {
        self.chain_hash
    }

    #[inline]
    pub fn local_id(&self) -> PublicKey {
        self.local_id
    }

    #[inline]
    pub fn prune_timeout(&self) -> u32 {
        self.prune_timeout
    }

    #[inline]
    pub fn graph(&self) -> &ChannelGraph {
        &self.graph
    }

    /// Mutable graph access, used by the local node to register its own
    /// not-yet-announced channels
    #[inline]
    pub fn graph_mut(&mut self) -> &mut ChannelGraph {
        &mut self.graph
    }

    #[inline]
    pub fn pending(&self) -> &PendingStore {
        &self.pending
    }

    #[inline]
    pub fn broadcasts(&self) -> &BroadcastQueue {
        &self.broadcasts
    }

    /// Processes a raw `channel_announcement`.
    ///
    /// On success the announcement is parked in the pending store and the
    /// short channel id is returned so the caller can ask the chain
    /// oracle for the funding output; nothing becomes visible in the
    /// graph until [`Self::resolve_pending_channel`]. Every failure
    /// discards the message silently (with a trace log).
    pub fn handle_channel_announcement(
        &mut self,
        announcement: &[u8],
    ) -> Option<ShortChannelId> {
        let msg: ChannelAnnouncement =
            bolt7::parse_frame(announcement, MSG_TYPE_CHANNEL_ANNOUNCEMENT)?;
        let scid = msg.short_channel_id;

        // We stop here no matter in which state the known channel is
        if let Some(channel) = self.graph.get_channel(&scid) {
            if channel.public {
                trace!("{} already has a public channel", scid);
                return None;
            }
        }

        // We don't replace a previous pending announcement, since we might
        // validate that one and think this one is OK
        if self.pending.channel(&scid).is_some() {
            trace!("{} already has a pending announcement", scid);
            return None;
        }

        // BOLT #7: if there is an unknown even bit in the `features`
        // field the receiving node MUST NOT add the channel to its local
        // network view
        if let Some(bit) = msg.features.unknown_even_bit() {
            trace!(
                "Ignoring channel announcement for {}: unsupported even \
                 feature bit {}",
                scid,
                bit
            );
            return None;
        }

        // BOLT #7: the receiving node MUST ignore the message if the
        // specified `chain_hash` is unknown to the receiver
        if msg.chain_hash != self.chain_hash {
            trace!(
                "Received channel_announcement {} for unknown chain {}",
                scid,
                msg.chain_hash
            );
            return None;
        }

        let digest = bolt7::signed_hash(
            announcement,
            CHANNEL_ANNOUNCEMENT_HASH_OFFSET,
        );
        let signed = bolt7::check_signed_hash(
            &digest,
            &msg.node_signature_1,
            &msg.node_id_1,
        ) && bolt7::check_signed_hash(
            &digest,
            &msg.node_signature_2,
            &msg.node_id_2,
        ) && bolt7::check_signed_hash(
            &digest,
            &msg.bitcoin_signature_1,
            &msg.bitcoin_key_1,
        ) && bolt7::check_signed_hash(
            &digest,
            &msg.bitcoin_signature_2,
            &msg.bitcoin_key_2,
        );
        if !signed {
            trace!(
                "Signature verification of channel_announcement for {} \
                 failed",
                scid
            );
            return None;
        }

        debug!("Received channel_announcement for channel {}", scid);

        // Park node announcements for both endpoints while we wait for
        // the chain check
        self.pending.add_node_bucket(&msg.node_id_1);
        self.pending.add_node_bucket(&msg.node_id_2);
        self.pending
            .insert_channel(PendingChannel::with(announcement, &msg));

        Some(scid)
    }

    /// Completes a channel announcement with the chain oracle's answer,
    /// reading the clock for the initial half-channel timestamps.
    ///
    /// See [`Self::resolve_pending_channel_at`].
    pub fn resolve_pending_channel(
        &mut self,
        scid: ShortChannelId,
        satoshis: u64,
        outscript: &[u8],
    ) -> bool {
        self.resolve_pending_channel_at(
            scid,
            satoshis,
            outscript,
            Timestamp::now(),
        )
    }

    /// Completes a channel announcement with the chain oracle's answer.
    ///
    /// An empty `outscript` means the funding output is spent; otherwise
    /// it must be the P2WSH of the 2-of-2 over the announced bitcoin
    /// keys. On success the channel becomes public, the announcement is
    /// queued for broadcast and the gossip buffered behind the chain
    /// check (updates in direction order, then node announcements for
    /// both endpoints) is replayed.
    ///
    /// Returns whether either endpoint is the local node.
    pub fn resolve_pending_channel_at(
        &mut self,
        scid: ShortChannelId,
        satoshis: u64,
        outscript: &[u8],
        now: Timestamp,
    ) -> bool {
        let pending = match self.pending.take_channel(&scid) {
            Some(pending) => pending,
            None => return false,
        };

        // BOLT #7: the receiving node MUST ignore the message if this
        // output is spent
        if outscript.is_empty() {
            trace!("channel_announcement: no unspent txout {}", scid);
            return false;
        }

        let script =
            funding_script(&pending.bitcoin_key_1, &pending.bitcoin_key_2);
        if script.as_bytes() != outscript {
            trace!(
                "channel_announcement: txout {} script does not match the \
                 announced bitcoin keys",
                scid
            );
            return false;
        }

        // The channel may already exist as a non-public local channel;
        // announcements for existing public channels never reach here
        if self.graph.get_channel(&scid).is_none() {
            self.graph.new_channel(
                scid,
                &pending.node_id_1,
                &pending.node_id_2,
                now - self.prune_timeout / 2,
            );
        }

        let tag = u64::from(scid).to_be_bytes();
        let channel = self
            .graph
            .channel_mut(&scid)
            .expect("pending channel was just registered in the graph");
        channel.public = true;
        channel.satoshis = satoshis;
        channel.announcement = Some(pending.announcement.clone());
        if self.broadcasts.replace(
            &mut channel.announce_msgidx,
            MSG_TYPE_CHANNEL_ANNOUNCEMENT,
            &tag,
            &pending.announcement,
        ) {
            panic!("announcement for fresh channel {} was replaced", scid);
        }

        let local = pending.node_id_1 == self.local_id
            || pending.node_id_2 == self.local_id;

        // Did we have updates waiting? If so, apply now.
        for update in pending.updates.iter().flatten() {
            self.handle_channel_update(update);
        }

        for node_id in [pending.node_id_1, pending.node_id_2] {
            if let Some(bucket) = self.pending.take_node_bucket(&node_id) {
                if let Some(announcement) = bucket.announcement {
                    trace!(
                        "Processing deferred node_announcement for node {}",
                        node_id
                    );
                    self.handle_node_announcement(&announcement);
                }
            }
        }

        local
    }

    /// Processes a raw `channel_update`.
    ///
    /// Updates for channels whose announcement still awaits its chain
    /// check are buffered (newest per direction); updates for unknown or
    /// unannounced channels, updates not newer than the applied one and
    /// updates failing signature verification are dropped.
    pub fn handle_channel_update(&mut self, update: &[u8]) {
        let msg: ChannelUpdate =
            match bolt7::parse_frame(update, MSG_TYPE_CHANNEL_UPDATE) {
                Some(msg) => msg,
                None => return,
            };
        let scid = msg.short_channel_id;
        let direction = msg.direction();

        // BOLT #7: the receiving node MUST ignore the channel update if
        // the specified `chain_hash` value is unknown
        if msg.chain_hash != self.chain_hash {
            trace!(
                "Received channel_update for unknown chain {}",
                msg.chain_hash
            );
            return;
        }

        let channel = match self.graph.channel_mut(&scid) {
            Some(channel) if channel.public => channel,
            channel => {
                if let Some(pending) = self.pending.channel_mut(&scid) {
                    pending.defer_update(direction, msg.timestamp, update);
                } else if channel.is_none() {
                    trace!("Ignoring update for unknown channel {}", scid);
                } else {
                    trace!("Ignoring update for unannounced channel {}", scid);
                }
                return;
            }
        };

        if Timestamp::from(msg.timestamp)
            <= channel.half[direction].last_timestamp
        {
            trace!("Ignoring outdated update for {}({})", scid, direction);
            return;
        }

        let digest = bolt7::signed_hash(update, GOSSIP_HASH_OFFSET);
        if !bolt7::check_signed_hash(
            &digest,
            &msg.signature,
            &channel.endpoints[direction],
        ) {
            trace!(
                "Signature verification of channel_update for {}({}) failed",
                scid,
                direction
            );
            return;
        }

        debug!(
            "Received channel_update for channel {}({}) now {}",
            scid,
            direction,
            if msg.is_disabled() { "DISABLED" } else { "ACTIVE" }
        );

        let half = &mut channel.half[direction];
        half.base_fee = msg.fee_base_msat;
        half.proportional_fee = msg.fee_proportional_millionths;
        half.delay = msg.cltv_expiry_delta;
        half.htlc_minimum_msat = msg.htlc_minimum_msat;
        half.active = !msg.is_disabled();
        half.flags = msg.flags;
        half.last_timestamp = Timestamp::from(msg.timestamp);
        // If it was temporarily unroutable, re-enable
        half.unroutable_until = Timestamp::from(0u32);

        if half.proportional_fee >= MAX_PROPORTIONAL_FEE {
            trace!(
                "Channel {}({}) has massive proportional fee {}: disabling",
                scid,
                direction,
                half.proportional_fee
            );
            half.active = false;
        }

        let mut tag = u64::from(scid).to_be_bytes().to_vec();
        tag.extend((direction as u16).to_be_bytes());
        self.broadcasts.replace(
            &mut half.update_msgidx,
            MSG_TYPE_CHANNEL_UPDATE,
            &tag,
            update,
        );
        half.channel_update = Some(update.to_vec());
    }

    /// Processes a raw `node_announcement`.
    ///
    /// Announcements for nodes behind a pending channel announcement are
    /// buffered newest-wins; announcements for nodes with no known
    /// channel at all are orphans and dropped.
    pub fn handle_node_announcement(&mut self, announcement: &[u8]) {
        let msg: NodeAnnouncement =
            match bolt7::parse_frame(announcement, MSG_TYPE_NODE_ANNOUNCEMENT)
            {
                Some(msg) => msg,
                None => return,
            };
        let node_id = msg.node_id;

        // BOLT #7: if the `features` field contains unknown even bits the
        // receiving node MUST NOT parse the remainder of the message
        if let Some(bit) = msg.features.unknown_even_bit() {
            trace!(
                "Ignoring node announcement for {}: unsupported even \
                 feature bit {}",
                node_id,
                bit
            );
            return;
        }

        let digest = bolt7::signed_hash(announcement, GOSSIP_HASH_OFFSET);
        if !bolt7::check_signed_hash(&digest, &msg.signature, &node_id) {
            trace!(
                "Ignoring node announcement for {}: signature verification \
                 failed",
                node_id
            );
            return;
        }

        let node = match self.graph.node_mut(&node_id) {
            Some(node) => node,
            None => {
                // A channel announcing this node may still be under its
                // chain check
                if let Some(bucket) = self.pending.node_bucket_mut(&node_id) {
                    trace!("Deferring node_announcement for node {}", node_id);
                    bucket.defer(msg.timestamp, announcement);
                } else {
                    trace!(
                        "Node not found; was the node_announcement for {} \
                         preceded by at least a channel_announcement?",
                        node_id
                    );
                }
                return;
            }
        };

        if let Some(last) = node.last_timestamp {
            if Timestamp::from(msg.timestamp) <= last {
                trace!("Ignoring node announcement, it's outdated");
                return;
            }
        }

        let addresses = match msg.addresses.parse() {
            Some(addresses) => addresses,
            None => {
                trace!("Unable to parse addresses");
                return;
            }
        };

        debug!("Received node_announcement for node {}", node_id);

        node.addresses = addresses;
        node.last_timestamp = Some(Timestamp::from(msg.timestamp));
        node.rgb_color = msg.rgb_color;
        node.alias = Some(msg.alias);

        let tag = node_id.serialize();
        self.broadcasts.replace(
            &mut node.announcement_msgidx,
            MSG_TYPE_NODE_ANNOUNCEMENT,
            &tag,
            announcement,
        );
        node.announcement = Some(announcement.to_vec());
    }
}

/// Expected scriptPubkey of a channel funding output: P2WSH over the
/// 2-of-2 multisig of the announced bitcoin keys, in announcement order
fn funding_script(key1: &PublicKey, key2: &PublicKey) -> Script {
    let redeem = Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_slice(&key1.serialize())
        .push_slice(&key2.serialize())
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script();
    Script::new_v0_p2wsh(&redeem.wscript_hash())
}
