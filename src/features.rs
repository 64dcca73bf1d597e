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

//! Gossip feature vectors.
//!
//! The routing engine does not implement any optional protocol features
//! itself, so the vector is kept raw: flags are never interpreted beyond
//! the odd-is-optional convention deciding whether a message may be
//! processed at all.

use std::io;

use amplify::flags::FlagVec;
use lightning_encoding::{LightningDecode, LightningEncode};

/// Feature vector attached to `channel_announcement` and
/// `node_announcement` messages.
///
/// Flags are numbered from the least-significant bit. They are assigned in
/// pairs so that features can be introduced as optional (odd bits) and
/// later upgraded to be compulsory (even bits), which will be refused by
/// outdated nodes.
#[derive(Wrapper, Clone, PartialEq, Eq, Hash, Debug, Default, From)]
pub struct GossipFeatures(FlagVec);

impl GossipFeatures {
    /// Returns the first set even bit, if any.
    ///
    /// Per BOLT #7, a message carrying an unknown even feature bit must not
    /// be added to the local network view; since this engine supports no
    /// features, every even bit is unknown. Odd bits are accepted silently.
    pub fn unknown_even_bit(&self) -> Option<u16> {
        self.0.iter().find(|flag| flag % 2 == 0)
    }
}

impl LightningEncode for GossipFeatures {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        self.0.lightning_encode(e)
    }
}

impl LightningDecode for GossipFeatures {
    #[inline]
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        FlagVec::lightning_decode(d).map(GossipFeatures)
    }
}
