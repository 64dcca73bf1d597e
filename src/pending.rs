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

//! Gossip held back while a channel announcement awaits its on-chain
//! check.
//!
//! Everything stored here has passed parsing and signature verification
//! but not chain verification; entries are created by the ingest handlers
//! and consumed by the chain resolution callback.

use std::collections::{BTreeMap, HashMap};

use log::trace;
use secp256k1::PublicKey;

use crate::bolt7::ChannelAnnouncement;
use crate::types::ShortChannelId;

/// A `channel_announcement` with verified signatures whose funding output
/// has not been checked on-chain yet
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PendingChannel {
    /// Short channel id under verification
    pub scid: ShortChannelId,

    /// First announced endpoint
    pub node_id_1: PublicKey,

    /// Second announced endpoint
    pub node_id_2: PublicKey,

    /// Bitcoin key of the first endpoint, forming the funding output
    pub bitcoin_key_1: PublicKey,

    /// Bitcoin key of the second endpoint, forming the funding output
    pub bitcoin_key_2: PublicKey,

    /// The raw announcement bits
    pub announcement: Vec<u8>,

    /// Deferred updates received while waiting, one per direction
    pub updates: [Option<Vec<u8>>; 2],

    /// Timestamps of the deferred updates; only newer updates replace
    pub update_timestamps: [u32; 2],
}

impl PendingChannel {
    /// Captures the unpacked fields of a parsed announcement together with
    /// its raw bytes
    pub fn with(announcement: &[u8], msg: &ChannelAnnouncement) -> Self {
        PendingChannel {
            scid: msg.short_channel_id,
            node_id_1: msg.node_id_1,
            node_id_2: msg.node_id_2,
            bitcoin_key_1: msg.bitcoin_key_1,
            bitcoin_key_2: msg.bitcoin_key_2,
            announcement: announcement.to_vec(),
            updates: [None, None],
            update_timestamps: [0, 0],
        }
    }

    /// Buffers a `channel_update` for one direction, keeping only the
    /// newest by timestamp
    pub fn defer_update(
        &mut self,
        direction: usize,
        timestamp: u32,
        update: &[u8],
    ) {
        trace!(
            "Deferring update for pending channel {}({})",
            self.scid,
            direction
        );
        if self.update_timestamps[direction] < timestamp {
            if self.updates[direction].is_some() {
                trace!("Replacing existing deferred update");
            }
            self.updates[direction] = Some(update.to_vec());
            self.update_timestamps[direction] = timestamp;
        }
    }
}

/// Parking bucket for a `node_announcement` received before the channel
/// announcement introducing the node has completed its chain check
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct PendingNode {
    /// The buffered raw announcement, if any was received
    pub announcement: Option<Vec<u8>>,

    /// Timestamp of the buffered announcement; only newer ones replace
    pub timestamp: u32,
}

impl PendingNode {
    /// Buffers a `node_announcement`, keeping only the newest by timestamp
    pub fn defer(&mut self, timestamp: u32, announcement: &[u8]) {
        if self.timestamp < timestamp {
            self.announcement = Some(announcement.to_vec());
            self.timestamp = timestamp;
        }
    }
}

/// Store of pending channel announcements and the node announcements
/// parked behind them
#[derive(Clone, Debug, Default)]
pub struct PendingStore {
    channels: BTreeMap<ShortChannelId, PendingChannel>,
    nodes: HashMap<PublicKey, PendingNode>,
}

impl PendingStore {
    pub fn new() -> Self {
        PendingStore::default()
    }

    #[inline]
    pub fn channel(&self, scid: &ShortChannelId) -> Option<&PendingChannel> {
        self.channels.get(scid)
    }

    #[inline]
    pub fn channel_mut(
        &mut self,
        scid: &ShortChannelId,
    ) -> Option<&mut PendingChannel> {
        self.channels.get_mut(scid)
    }

    /// Registers a pending channel. Duplicate announcements for the same
    /// short channel id are rejected by the announcement handler, so an
    /// existing entry is never replaced here.
    pub fn insert_channel(&mut self, pending: PendingChannel) {
        debug_assert!(
            !self.channels.contains_key(&pending.scid),
            "pending channel {} registered twice",
            pending.scid
        );
        self.channels.entry(pending.scid).or_insert(pending);
    }

    #[inline]
    pub fn take_channel(
        &mut self,
        scid: &ShortChannelId,
    ) -> Option<PendingChannel> {
        self.channels.remove(scid)
    }

    /// Opens a parking bucket for node announcements arriving before the
    /// node is known. An already open bucket is kept as is.
    pub fn add_node_bucket(&mut self, id: &PublicKey) {
        self.nodes.entry(*id).or_default();
    }

    #[inline]
    pub fn node_bucket_mut(
        &mut self,
        id: &PublicKey,
    ) -> Option<&mut PendingNode> {
        self.nodes.get_mut(id)
    }

    #[inline]
    pub fn take_node_bucket(&mut self, id: &PublicKey) -> Option<PendingNode> {
        self.nodes.remove(id)
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    #[inline]
    pub fn node_bucket_count(&self) -> usize {
        self.nodes.len()
    }
}
