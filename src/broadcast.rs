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

//! Store of validated gossip messages queued for re-broadcasting to peers.

use std::collections::BTreeMap;

/// A single gossip message queued for broadcasting
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueuedMessage {
    /// Gossip message type discriminator
    pub msg_type: u16,
    /// Deduplication tag; see [`BroadcastQueue::replace`]
    pub tag: Vec<u8>,
    /// Full framed message bytes
    pub payload: Vec<u8>,
}

/// Deduplicated, insertion-ordered queue of validated gossip messages.
///
/// At most one live message exists per `(msg_type, tag)` pair: newer
/// versions of an announcement or update replace their predecessor, so
/// peers syncing from an old index never receive stale gossip.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BroadcastQueue {
    next_index: u64,
    queue: BTreeMap<u64, QueuedMessage>,
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        BroadcastQueue::new()
    }
}

impl BroadcastQueue {
    /// Constructs an empty queue.
    ///
    /// Indexes start at 1, so 0 can be used by callers as the
    /// never-broadcast sentinel.
    pub fn new() -> Self {
        BroadcastQueue {
            next_index: 1,
            queue: bmap! {},
        }
    }

    /// Queues a message, evicting any previously queued message with the
    /// same type and tag.
    ///
    /// The index of the newly queued message is written back through
    /// `index`; the return value tells whether an older message was
    /// evicted.
    pub fn replace(
        &mut self,
        index: &mut u64,
        msg_type: u16,
        tag: &[u8],
        payload: &[u8],
    ) -> bool {
        let existing = self
            .queue
            .iter()
            .find(|(_, msg)| msg.msg_type == msg_type && msg.tag == tag)
            .map(|(idx, _)| *idx);
        let replaced = match existing {
            Some(idx) => self.queue.remove(&idx).is_some(),
            None => false,
        };

        *index = self.next_index;
        self.next_index += 1;
        self.queue.insert(*index, QueuedMessage {
            msg_type,
            tag: tag.to_vec(),
            payload: payload.to_vec(),
        });
        replaced
    }

    /// Returns the first queued message with an index greater than the
    /// provided one; drives the gossip-sync loop of the caller.
    pub fn next_after(&self, index: u64) -> Option<(u64, &QueuedMessage)> {
        self.queue
            .range(index + 1..)
            .next()
            .map(|(idx, msg)| (*idx, msg))
    }

    /// Returns the queued message stored under the given index
    #[inline]
    pub fn get(&self, index: u64) -> Option<&QueuedMessage> {
        self.queue.get(&index)
    }

    /// Number of live queued messages
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
