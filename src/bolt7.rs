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

//! BOLT-7 gossip messages consumed by the routing engine, their framing
//! and signature digests.

use std::io::{self, Read};

use amplify::Slice32;
use bitcoin::hashes::{sha256d, Hash};
use lightning_encoding::{LightningDecode, LightningEncode};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SECP256K1};

use crate::features::GossipFeatures;
use crate::types::{Alias, NetAddress, NodeColor, ShortChannelId};

/// Message type discriminator for `channel_announcement`
pub const MSG_TYPE_CHANNEL_ANNOUNCEMENT: u16 = 256;
/// Message type discriminator for `node_announcement`
pub const MSG_TYPE_NODE_ANNOUNCEMENT: u16 = 257;
/// Message type discriminator for `channel_update`
pub const MSG_TYPE_CHANNEL_UPDATE: u16 = 258;

/// Bit of [`ChannelUpdate::flags`] carrying the direction of the updated
/// half
pub const CHANNEL_FLAGS_DIRECTION: u16 = 1;
/// Bit of [`ChannelUpdate::flags`] disabling the updated half
pub const CHANNEL_FLAGS_DISABLED: u16 = 1 << 1;

/// Start of the signed portion of a framed `channel_announcement`: 2 bytes
/// of message type plus 256 bytes of signatures
pub const CHANNEL_ANNOUNCEMENT_HASH_OFFSET: usize = 258;
/// Start of the signed portion of a framed `channel_update` or
/// `node_announcement`: 2 bytes of message type plus one 64-byte signature
pub const GOSSIP_HASH_OFFSET: usize = 66;

/// This gossip message contains ownership information regarding a channel.
/// It ties each on-chain Bitcoin key to the associated Lightning node key,
/// and vice-versa. The channel is not practically usable until at least one
/// side has announced its fee levels and expiry, using `channel_update`.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[display("channel_announcement({chain_hash}, {short_channel_id}, ...)")]
pub struct ChannelAnnouncement {
    /// Node Signature 1
    pub node_signature_1: Signature,

    /// Node Signature 2
    pub node_signature_2: Signature,

    /// Bitcoin Signature 1
    pub bitcoin_signature_1: Signature,

    /// Bitcoin Signature 2
    pub bitcoin_signature_2: Signature,

    /// feature bytes
    pub features: GossipFeatures,

    /// chain hash
    pub chain_hash: Slice32,

    /// Short channel ID
    pub short_channel_id: ShortChannelId,

    /// Node Id 1
    pub node_id_1: PublicKey,

    /// Node Id 2
    pub node_id_2: PublicKey,

    /// Bitcoin key 1
    pub bitcoin_key_1: PublicKey,

    /// Bitcoin key 2
    pub bitcoin_key_2: PublicKey,
}

/// After a channel has been initially announced, each side independently
/// announces the fees and minimum expiry delta it requires to relay HTLCs
/// through this channel. The low bit of `flags` indicates which end of the
/// channel the sender is on; a node can send this multiple times, in order
/// to change fees.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[display("channel_update({chain_hash}, {short_channel_id}, {timestamp}, ...)")]
pub struct ChannelUpdate {
    /// Signature
    pub signature: Signature,

    /// Chainhash
    pub chain_hash: Slice32,

    /// Short Channel Id
    pub short_channel_id: ShortChannelId,

    /// Time stamp
    pub timestamp: u32,

    /// Direction and disable bits
    pub flags: u16,

    /// CLTV expiry delta
    pub cltv_expiry_delta: u16,

    /// minimum HTLC in msat
    pub htlc_minimum_msat: u64,

    /// base fee in msat
    pub fee_base_msat: u32,

    /// fee proportional millionth
    pub fee_proportional_millionths: u32,
}

impl ChannelUpdate {
    /// Index of the updated half: equals the index of the sender endpoint
    /// within the canonically ordered channel endpoints
    #[inline]
    pub fn direction(&self) -> usize {
        (self.flags & CHANNEL_FLAGS_DIRECTION) as usize
    }

    /// Whether the update disables its half of the channel
    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.flags & CHANNEL_FLAGS_DISABLED != 0
    }
}

/// This gossip message allows a node to indicate extra data associated with
/// it, in addition to its public key. To avoid trivial denial of service
/// attacks, nodes not associated with an already known channel are ignored.
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[derive(LightningEncode, LightningDecode)]
#[display("node_announcement({node_id}, {alias}, ...)")]
pub struct NodeAnnouncement {
    /// Signature
    pub signature: Signature,

    /// feature bytes
    pub features: GossipFeatures,

    /// Time stamp
    pub timestamp: u32,

    /// Node Id
    pub node_id: PublicKey,

    /// RGB colour code
    pub rgb_color: NodeColor,

    /// Node Alias
    pub alias: Alias,

    /// Raw address descriptor list; see [`AddressData::parse`]
    pub addresses: AddressData,
}

/// Raw body of the `node_announcement` address list.
///
/// Kept unparsed at the message level since descriptor parsing has its own
/// failure semantics distinct from message parsing: padding bytes are
/// skipped, the first unknown descriptor type terminates the list cleanly,
/// while a malformed known-type descriptor invalidates the whole message.
#[derive(Wrapper, Clone, Debug, Default, From, PartialEq, Eq, Hash)]
pub struct AddressData(Vec<u8>);

impl AddressData {
    /// Parses the address descriptors.
    ///
    /// Returns `None` when a known-type descriptor is malformed, in which
    /// case the carrying `node_announcement` must be discarded; an unknown
    /// descriptor type just ends the list.
    pub fn parse(&self) -> Option<Vec<NetAddress>> {
        let mut d = io::Cursor::new(self.0.as_slice());
        let mut addresses = Vec::new();
        loop {
            let mut type_byte = [0u8; 1];
            if d.read_exact(&mut type_byte).is_err() {
                break;
            }
            let ty = type_byte[0];
            if ty == NetAddress::TYPE_PADDING {
                continue;
            }
            if !NetAddress::is_known_type(ty) {
                break;
            }
            match NetAddress::decode_body(ty, &mut d) {
                Ok(addr) => addresses.push(addr),
                Err(_) => return None,
            }
        }
        Some(addresses)
    }
}

impl LightningEncode for AddressData {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        self.0.lightning_encode(e)
    }
}

impl LightningDecode for AddressData {
    #[inline]
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        Vec::<u8>::lightning_decode(d).map(AddressData)
    }
}

/// Reads the big-endian message type discriminator of a framed gossip
/// message
pub fn message_type(message: &[u8]) -> Option<u16> {
    if message.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([message[0], message[1]]))
}

/// Decodes the payload of a framed gossip message after checking its type
/// discriminator
pub fn parse_frame<T: LightningDecode>(
    message: &[u8],
    msg_type: u16,
) -> Option<T> {
    if message_type(message)? != msg_type {
        return None;
    }
    let payload = message[2..].to_vec();
    T::lightning_deserialize(&payload).ok()
}

/// Frames a gossip message payload with its type discriminator
pub fn compose<T: LightningEncode>(
    msg_type: u16,
    payload: &T,
) -> Result<Vec<u8>, lightning_encoding::Error> {
    let mut message = msg_type.to_be_bytes().to_vec();
    message.extend(payload.lightning_serialize()?);
    Ok(message)
}

/// Computes the double-SHA-256 digest of the signed portion of a framed
/// gossip message
pub fn signed_hash(message: &[u8], offset: usize) -> Message {
    let hash = sha256d::Hash::hash(&message[offset..]);
    Message::from_slice(&hash[..])
        .expect("double-SHA-256 digest is a valid signature message")
}

/// Verifies a gossip signature over a precomputed message digest
pub fn check_signed_hash(
    hash: &Message,
    signature: &Signature,
    key: &PublicKey,
) -> bool {
    SECP256K1.verify_ecdsa(hash, signature, key).is_ok()
}
