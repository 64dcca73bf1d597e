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

//! Channel graph: nodes, channels with their two directed halves, and the
//! store owning them.
//!
//! Ownership is by two independent maps keyed by node id and short channel
//! id; adjacency is by key, not by reference, and destruction cascades
//! explicitly: destroying a channel detaches it from both endpoints, and an
//! endpoint left without channels is destroyed with it.

use std::collections::{BTreeMap, HashMap};

use secp256k1::PublicKey;

use crate::types::{Alias, NetAddress, NodeColor, ShortChannelId, Timestamp};

/// Routing policy of one direction of a channel.
///
/// Half `i` describes forwarding *from* endpoint `i`; its values come from
/// the latest `channel_update` signed by that endpoint.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HalfChannel {
    /// base fee in msat
    pub base_fee: u32,

    /// fee proportional millionth
    pub proportional_fee: u32,

    /// CLTV expiry delta
    pub delay: u16,

    /// minimum HTLC in msat
    pub htlc_minimum_msat: u64,

    /// Whether this direction may carry payments. False until the first
    /// update, after an update with the disable bit, or when the announced
    /// proportional fee is large enough to overflow fee arithmetic.
    pub active: bool,

    /// Raw flags word of the latest update; the low bit equals the
    /// direction index
    pub flags: u16,

    /// Timestamp of the latest applied update; older updates are rejected
    pub last_timestamp: Timestamp,

    /// Wall time until which the path finder must skip this direction
    pub unroutable_until: Timestamp,

    /// Latest raw `channel_update`, retained for rebroadcast
    pub channel_update: Option<Vec<u8>>,

    /// Broadcast store index of the latest update; 0 if never broadcast
    pub update_msgidx: u64,
}

impl HalfChannel {
    fn with(direction: usize, last_timestamp: Timestamp) -> Self {
        HalfChannel {
            base_fee: 0,
            proportional_fee: 0,
            delay: 0,
            htlc_minimum_msat: 0,
            active: false,
            flags: direction as u16,
            last_timestamp,
            unroutable_until: Timestamp::from(0u32),
            channel_update: None,
            update_msgidx: 0,
        }
    }

    /// Whether the path finder may use this direction right now
    #[inline]
    pub fn is_routable(&self, now: Timestamp) -> bool {
        self.active && self.unroutable_until < now
    }
}

/// A channel between two nodes known from gossip or registered locally
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("{scid}")]
pub struct Channel {
    /// Short channel id of the funding output
    pub scid: ShortChannelId,

    /// Channel endpoints ordered by their compressed public keys
    pub endpoints: [PublicKey; 2],

    /// Per-direction policies; half `i` originates from `endpoints[i]`
    pub half: [HalfChannel; 2],

    /// Whether a channel announcement has been verified against the chain
    pub public: bool,

    /// The channel capacity, known once the channel is public
    pub satoshis: u64,

    /// Raw `channel_announcement`, retained for rebroadcast
    pub announcement: Option<Vec<u8>>,

    /// Broadcast store index of the announcement; 0 if never broadcast
    pub announce_msgidx: u64,
}

impl Channel {
    /// Whether the given node is one of the channel endpoints
    #[inline]
    pub fn connects(&self, id: &PublicKey) -> bool {
        self.endpoints[0] == *id || self.endpoints[1] == *id
    }

    /// The endpoint on the opposite side from the given node
    #[inline]
    pub fn other_endpoint(&self, id: &PublicKey) -> PublicKey {
        if self.endpoints[0] == *id {
            self.endpoints[1]
        } else {
            self.endpoints[0]
        }
    }

    /// Index of the half originating from the given node
    #[inline]
    pub fn direction_from(&self, id: &PublicKey) -> usize {
        usize::from(self.endpoints[0] != *id)
    }

    /// Index of the half pointing towards the given node
    #[inline]
    pub fn direction_to(&self, id: &PublicKey) -> usize {
        usize::from(self.endpoints[0] == *id)
    }
}

/// A node incident to at least one known channel
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Node {
    /// Node id (compressed public key)
    pub id: PublicKey,

    /// Channels incident on this node; membership unique, order
    /// irrelevant
    pub channels: Vec<ShortChannelId>,

    /// Alias from the latest node announcement
    pub alias: Option<Alias>,

    /// RGB colour code from the latest node announcement
    pub rgb_color: NodeColor,

    /// Network addresses from the latest node announcement
    pub addresses: Vec<NetAddress>,

    /// Timestamp of the latest applied node announcement; `None` until the
    /// first one, so any initial timestamp is accepted
    pub last_timestamp: Option<Timestamp>,

    /// Latest raw `node_announcement`, retained for rebroadcast
    pub announcement: Option<Vec<u8>>,

    /// Broadcast store index of the announcement; 0 if never broadcast
    pub announcement_msgidx: u64,
}

impl Node {
    fn with(id: PublicKey) -> Self {
        Node {
            id,
            channels: vec![],
            alias: None,
            rgb_color: NodeColor::default(),
            addresses: vec![],
            last_timestamp: None,
            announcement: None,
            announcement_msgidx: 0,
        }
    }
}

/// Store owning all known nodes and channels
#[derive(Clone, Debug, Default)]
pub struct ChannelGraph {
    nodes: HashMap<PublicKey, Node>,
    channels: BTreeMap<ShortChannelId, Channel>,
}

impl ChannelGraph {
    pub fn new() -> Self {
        ChannelGraph::default()
    }

    #[inline]
    pub fn get_node(&self, id: &PublicKey) -> Option<&Node> {
        self.nodes.get(id)
    }

    #[inline]
    pub fn node_mut(&mut self, id: &PublicKey) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    #[inline]
    pub fn get_channel(&self, scid: &ShortChannelId) -> Option<&Channel> {
        self.channels.get(scid)
    }

    #[inline]
    pub fn channel_mut(
        &mut self,
        scid: &ShortChannelId,
    ) -> Option<&mut Channel> {
        self.channels.get_mut(scid)
    }

    #[inline]
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    #[inline]
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Registers a new channel, creating endpoint nodes on demand.
    ///
    /// Endpoints are stored in canonical order (numerically smaller
    /// compressed pubkey first) independently of the argument order. Both
    /// halves start inactive with `last_timestamp` set to the provided
    /// initial value; callers derive it as `now - prune_timeout / 2` so
    /// that any real update is newer, while a channel never updated still
    /// ages into the pruning window.
    pub fn new_channel(
        &mut self,
        scid: ShortChannelId,
        id1: &PublicKey,
        id2: &PublicKey,
        init_timestamp: Timestamp,
    ) -> &mut Channel {
        debug_assert!(
            !self.channels.contains_key(&scid),
            "channel {} registered twice",
            scid
        );

        let (first, second) = if id1 < id2 { (id1, id2) } else { (id2, id1) };
        for id in [first, second] {
            self.nodes
                .entry(*id)
                .or_insert_with(|| Node::with(*id))
                .channels
                .push(scid);
        }

        self.channels.entry(scid).or_insert(Channel {
            scid,
            endpoints: [*first, *second],
            half: [
                HalfChannel::with(0, init_timestamp),
                HalfChannel::with(1, init_timestamp),
            ],
            public: false,
            satoshis: 0,
            announcement: None,
            announce_msgidx: 0,
        })
    }

    /// Destroys a channel, detaching it from both endpoints and destroying
    /// endpoints left without channels.
    ///
    /// Returns `false` if the channel is not known. Panics if the channel
    /// is missing from an endpoint's adjacency list: that is a broken
    /// graph invariant, not a recoverable condition.
    pub fn destroy_channel(&mut self, scid: &ShortChannelId) -> bool {
        let channel = match self.channels.remove(scid) {
            Some(channel) => channel,
            None => return false,
        };

        for id in &channel.endpoints {
            let node = self.nodes.get_mut(id).unwrap_or_else(|| {
                panic!("channel {} endpoint {} is not in the node map", scid, id)
            });
            let pos = node
                .channels
                .iter()
                .position(|c| c == scid)
                .unwrap_or_else(|| {
                    panic!(
                        "channel {} is not registered at its endpoint {}",
                        scid, id
                    )
                });
            node.channels.remove(pos);
            if node.channels.is_empty() {
                self.nodes.remove(id);
            }
        }
        true
    }
}
