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

//! Identifiers and wire primitives shared by the gossip messages and the
//! channel graph.

#[cfg(feature = "serde")]
use serde_with::{As, DisplayFromStr};
use std::io;
use std::ops::{Add, Sub};
use std::str::FromStr;

use amplify::{Slice32, Wrapper};
use chrono::{DateTime, Local, TimeZone, Utc};
use lightning_encoding::{LightningDecode, LightningEncode};

#[cfg(feature = "strict_encoding")]
use strict_encoding::{StrictDecode, StrictEncode};

/// Lightning network short channel id as per BOLT-7: the position of the
/// channel funding output in the blockchain
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    Getters,
)]
#[display("{block_height}x{tx_index}x{output_index}")]
pub struct ShortChannelId {
    block_height: u32,
    tx_index: u32,
    output_index: u16,
}

impl ShortChannelId {
    pub fn new(
        block_height: u32,
        tx_index: u32,
        output_index: u16,
    ) -> Option<Self> {
        if block_height >= 1 << 24 || tx_index >= 1 << 24 {
            return None;
        }
        Some(Self {
            block_height,
            tx_index,
            output_index,
        })
    }
}

impl From<ShortChannelId> for u64 {
    fn from(scid: ShortChannelId) -> u64 {
        (scid.block_height as u64) << 40
            | (scid.tx_index as u64) << 16
            | scid.output_index as u64
    }
}

impl From<u64> for ShortChannelId {
    fn from(value: u64) -> Self {
        ShortChannelId {
            block_height: (value >> 40) as u32 & 0x00FF_FFFF,
            tx_index: (value >> 16) as u32 & 0x00FF_FFFF,
            output_index: value as u16,
        }
    }
}

#[derive(
    Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error,
)]
#[display(doc_comments)]
pub enum ShortChannelIdParseError {
    /// Wrong block height data
    WrongBlockHeight,
    /// Wrong transaction index number
    WrongTxIndex,
    /// Wrong output index number
    WrongOutputIndex,
    /// too many short channel id components; expected three (block height,
    /// tx index and output index)
    ExcessiveComponents,
}

impl FromStr for ShortChannelId {
    type Err = ShortChannelIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut split = s.split('x');
        match (split.next(), split.next(), split.next(), split.next()) {
            (Some(block_height), Some(tx_index), Some(output_index), None) => {
                Ok(ShortChannelId {
                    block_height: block_height.parse().map_err(|_| {
                        ShortChannelIdParseError::WrongBlockHeight
                    })?,
                    tx_index: tx_index
                        .parse()
                        .map_err(|_| ShortChannelIdParseError::WrongTxIndex)?,
                    output_index: output_index.parse().map_err(|_| {
                        ShortChannelIdParseError::WrongOutputIndex
                    })?,
                })
            }
            _ => Err(ShortChannelIdParseError::ExcessiveComponents),
        }
    }
}

impl LightningEncode for ShortChannelId {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        e.write_all(&u64::from(*self).to_be_bytes())?;
        Ok(8)
    }
}

impl LightningDecode for ShortChannelId {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut buf = [0u8; 8];
        d.read_exact(&mut buf)?;
        Ok(ShortChannelId::from(u64::from_be_bytes(buf)))
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictEncode for ShortChannelId {
    fn strict_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, strict_encoding::Error> {
        e.write_all(&u64::from(*self).to_be_bytes())?;
        Ok(8)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictDecode for ShortChannelId {
    fn strict_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, strict_encoding::Error> {
        let mut buf = [0u8; 8];
        d.read_exact(&mut buf)?;
        Ok(ShortChannelId::from(u64::from_be_bytes(buf)))
    }
}

/// RGB colour code announced by a node
#[derive(Wrapper, Copy, Clone, Debug, Default, From, PartialEq, Eq, Hash)]
pub struct NodeColor([u8; 3]);

impl NodeColor {
    fn encode<E: io::Write>(&self, mut e: E) -> Result<usize, io::Error> {
        let len = e.write(self.as_inner())?;
        Ok(len)
    }

    fn decode<D: io::Read>(mut d: D) -> Result<Self, io::Error> {
        let mut buf = [0u8; 3];
        d.read_exact(&mut buf)?;
        Ok(Self::from_inner(buf))
    }
}

impl LightningEncode for NodeColor {
    #[inline]
    fn lightning_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        self.encode(e).map_err(lightning_encoding::Error::from)
    }
}

impl LightningDecode for NodeColor {
    #[inline]
    fn lightning_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        Self::decode(d).map_err(lightning_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictEncode for NodeColor {
    #[inline]
    fn strict_encode<E: io::Write>(
        &self,
        e: E,
    ) -> Result<usize, strict_encoding::Error> {
        self.encode(e).map_err(strict_encoding::Error::from)
    }
}

#[cfg(feature = "strict_encoding")]
impl StrictDecode for NodeColor {
    #[inline]
    fn strict_decode<D: io::Read>(
        d: D,
    ) -> Result<Self, strict_encoding::Error> {
        Self::decode(d).map_err(strict_encoding::Error::from)
    }
}

/// Opaque 32-byte node alias, announced with `node_announcement` and kept
/// only for display purposes
#[cfg_attr(
    feature = "serde",
    serde_as,
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
#[derive(
    Wrapper,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Display,
    Default,
    From,
    LightningEncode,
    LightningDecode,
)]
#[display(LowerHex)]
#[wrapper(FromStr, LowerHex, UpperHex)]
pub struct Alias(
    #[cfg_attr(feature = "serde", serde(with = "As::<DisplayFromStr>"))]
    Slice32,
);

/// UNIX timestamp in seconds used all over the gossip messages
#[derive(
    Display, Copy, Clone, Debug, PartialEq, Hash, Eq, PartialOrd, Ord, Wrapper,
    From,
)]
#[display("{0} sec")]
pub struct Timestamp(u32);

impl<T> From<DateTime<T>> for Timestamp
where
    T: TimeZone,
{
    fn from(dt: DateTime<T>) -> Timestamp {
        Timestamp(dt.timestamp() as u32)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::now()
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(ts: Timestamp) -> DateTime<Utc> {
        Utc.timestamp(ts.0 as i64, 0)
    }
}

impl From<Timestamp> for DateTime<Local> {
    fn from(ts: Timestamp) -> DateTime<Local> {
        Local.timestamp(ts.0 as i64, 0)
    }
}

impl Add<u32> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: u32) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs))
    }
}

impl Sub<u32> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: u32) -> Timestamp {
        Timestamp(self.0.saturating_sub(rhs))
    }
}

impl Timestamp {
    /// Reads the wall clock.
    pub fn now() -> Timestamp {
        Timestamp(Utc::now().timestamp() as u32)
    }

    #[inline]
    pub fn as_secs(self) -> u32 {
        self.0
    }

    pub fn checked_add(self, rhs: Timestamp) -> Option<Timestamp> {
        self.0.checked_add(rhs.0).map(Timestamp)
    }

    pub fn checked_sub(self, rhs: Timestamp) -> Option<Timestamp> {
        self.0.checked_sub(rhs.0).map(Timestamp)
    }
}

/// Network address descriptor announced inside `node_announcement`.
///
/// The wire form is a one-byte type discriminator followed by a
/// type-specific body; descriptors of an unknown type terminate address
/// parsing without invalidating the message (see [`crate::bolt7`]).
#[derive(Clone, Copy, Debug, From, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NetAddress {
    /// An IPv4 address/port on which the node is listening
    IpV4 {
        /// The 4-byte IPv4 address
        addr: [u8; 4],
        /// The port on which the node is listening
        port: u16,
    },
    /// An IPv6 address/port on which the node is listening
    IpV6 {
        /// The 16-byte IPv6 address
        addr: [u8; 16],
        /// The port on which the node is listening
        port: u16,
    },
    /// An old-style Tor onion address/port on which the node is listening
    OnionV2 {
        /// The bytes (usually encoded in base32 with ".onion" appended)
        addr: [u8; 10],
        /// The port on which the node is listening
        port: u16,
    },
    /// A new-style Tor onion address/port on which the node is listening.
    /// To create the human-readable "hostname", concatenate ed25519_pubkey,
    /// checksum, and version, wrap as base32 and append ".onion".
    OnionV3 {
        /// The ed25519 long-term public key of the node
        ed25519_pubkey: [u8; 32],
        /// The checksum of the pubkey and version, as included in the onion
        /// address
        checksum: u16,
        /// The version byte, as defined by the Tor Onion v3 spec
        version: u8,
        /// The port on which the node is listening
        port: u16,
    },
}

impl NetAddress {
    /// Padding descriptor type; skipped by address parsing
    pub const TYPE_PADDING: u8 = 0;

    fn type_byte(self) -> u8 {
        match self {
            NetAddress::IpV4 { .. } => 1,
            NetAddress::IpV6 { .. } => 2,
            NetAddress::OnionV2 { .. } => 3,
            NetAddress::OnionV3 { .. } => 4,
        }
    }

    /// Detects whether a descriptor type byte is known to this
    /// implementation
    #[inline]
    pub fn is_known_type(type_byte: u8) -> bool {
        matches!(type_byte, 1..=4)
    }

    /// Reads the type-specific descriptor body following an already
    /// consumed type byte
    pub(crate) fn decode_body<D: io::Read>(
        type_byte: u8,
        d: &mut D,
    ) -> Result<Self, lightning_encoding::Error> {
        match type_byte {
            1 => {
                let mut addr = [0u8; 4];
                let mut port = [0u8; 2];
                d.read_exact(&mut addr)?;
                d.read_exact(&mut port)?;
                Ok(NetAddress::IpV4 {
                    addr,
                    port: u16::from_be_bytes(port),
                })
            }
            2 => {
                let mut addr = [0u8; 16];
                let mut port = [0u8; 2];
                d.read_exact(&mut addr)?;
                d.read_exact(&mut port)?;
                Ok(NetAddress::IpV6 {
                    addr,
                    port: u16::from_be_bytes(port),
                })
            }
            3 => {
                let mut addr = [0u8; 10];
                let mut port = [0u8; 2];
                d.read_exact(&mut addr)?;
                d.read_exact(&mut port)?;
                Ok(NetAddress::OnionV2 {
                    addr,
                    port: u16::from_be_bytes(port),
                })
            }
            4 => {
                let mut ed25519_pubkey = [0u8; 32];
                let mut checksum = [0u8; 2];
                let mut version = [0u8; 1];
                let mut port = [0u8; 2];
                d.read_exact(&mut ed25519_pubkey)?;
                d.read_exact(&mut checksum)?;
                d.read_exact(&mut version)?;
                d.read_exact(&mut port)?;
                Ok(NetAddress::OnionV3 {
                    ed25519_pubkey,
                    checksum: u16::from_be_bytes(checksum),
                    version: version[0],
                    port: u16::from_be_bytes(port),
                })
            }
            unknown => Err(lightning_encoding::Error::DataIntegrityError(
                format!("unknown network address format {}", unknown),
            )),
        }
    }
}

impl LightningEncode for NetAddress {
    fn lightning_encode<E: io::Write>(
        &self,
        mut e: E,
    ) -> Result<usize, lightning_encoding::Error> {
        e.write_all(&[self.type_byte()])?;
        let mut len = 1;
        match self {
            NetAddress::IpV4 { addr, port } => {
                e.write_all(&addr[..])?;
                e.write_all(&port.to_be_bytes())?;
                len += addr.len() + 2;
            }
            NetAddress::IpV6 { addr, port } => {
                e.write_all(&addr[..])?;
                e.write_all(&port.to_be_bytes())?;
                len += addr.len() + 2;
            }
            NetAddress::OnionV2 { addr, port } => {
                e.write_all(&addr[..])?;
                e.write_all(&port.to_be_bytes())?;
                len += addr.len() + 2;
            }
            NetAddress::OnionV3 {
                ed25519_pubkey,
                checksum,
                version,
                port,
            } => {
                e.write_all(&ed25519_pubkey[..])?;
                e.write_all(&checksum.to_be_bytes())?;
                e.write_all(&[*version])?;
                e.write_all(&port.to_be_bytes())?;
                len += ed25519_pubkey.len() + 5;
            }
        }
        Ok(len)
    }
}

impl LightningDecode for NetAddress {
    fn lightning_decode<D: io::Read>(
        mut d: D,
    ) -> Result<Self, lightning_encoding::Error> {
        let mut type_byte = [0u8; 1];
        d.read_exact(&mut type_byte)?;
        NetAddress::decode_body(type_byte[0], &mut d)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bitcoin::hashes::hex::FromHex;
    use lightning_encoding::{LightningDecode, LightningEncode};

    #[test]
    fn short_channel_id_str() {
        let scid = ShortChannelId::new(600123, 42, 3).unwrap();
        assert_eq!(scid.to_string(), "600123x42x3");
        assert_eq!("600123x42x3".parse::<ShortChannelId>(), Ok(scid));
        assert_eq!(
            "600123x42".parse::<ShortChannelId>(),
            Err(ShortChannelIdParseError::ExcessiveComponents)
        );
        assert_eq!(
            "600123x42x3x1".parse::<ShortChannelId>(),
            Err(ShortChannelIdParseError::ExcessiveComponents)
        );
    }

    #[test]
    fn short_channel_id_packing() {
        let scid = ShortChannelId::new(0x000001, 0x000002, 0x0003).unwrap();
        assert_eq!(u64::from(scid), 0x0000_0100_0002_0003);
        assert_eq!(ShortChannelId::from(0x0000_0100_0002_0003u64), scid);

        let encoded = scid.lightning_serialize().unwrap();
        assert_eq!(
            encoded,
            Vec::<u8>::from_hex("0000010000020003").unwrap()
        );
        assert_eq!(
            ShortChannelId::lightning_deserialize(&encoded).unwrap(),
            scid
        );
    }

    #[test]
    fn short_channel_id_bounds() {
        assert!(ShortChannelId::new(1 << 24, 0, 0).is_none());
        assert!(ShortChannelId::new(0, 1 << 24, 0).is_none());
        assert!(ShortChannelId::new((1 << 24) - 1, 0, u16::MAX).is_some());
    }

    #[test]
    fn timestamp_arithmetic() {
        let ts = Timestamp::from(1000u32);
        assert_eq!((ts + 20).as_secs(), 1020);
        assert_eq!((ts - 400).as_secs(), 600);
        assert_eq!((ts - 2000).as_secs(), 0);
        assert!(Timestamp::from(99u32) < ts);
    }

    #[test]
    fn address_encodings() {
        // Test vectors shared with the rust-lightning message test suite
        let ipv4 = NetAddress::IpV4 {
            addr: [255, 254, 253, 252],
            port: 9735,
        };

        let ipv6 = NetAddress::IpV6 {
            addr: [
                255, 254, 253, 252, 251, 250, 249, 248, 247, 246, 245, 244,
                243, 242, 241, 240,
            ],
            port: 9735,
        };

        let onion_v2 = NetAddress::OnionV2 {
            addr: [255, 254, 253, 252, 251, 250, 249, 248, 247, 246],
            port: 9735,
        };

        let onion_v3 = NetAddress::OnionV3 {
            ed25519_pubkey: [
                255, 254, 253, 252, 251, 250, 249, 248, 247, 246, 245, 244,
                243, 242, 241, 240, 239, 238, 237, 236, 235, 234, 233, 232,
                231, 230, 229, 228, 227, 226, 225, 224,
            ],
            checksum: 32,
            version: 16,
            port: 9735,
        };

        let ipv4_target = Vec::<u8>::from_hex("01fffefdfc2607").unwrap();
        let ipv6_target =
            Vec::<u8>::from_hex("02fffefdfcfbfaf9f8f7f6f5f4f3f2f1f02607")
                .unwrap();
        let onionv2_target =
            Vec::<u8>::from_hex("03fffefdfcfbfaf9f8f7f62607").unwrap();
        let onionv3_target = Vec::<u8>::from_hex("04fffefdfcfbfaf9f8f7f6f5f4f3f2f1f0efeeedecebeae9e8e7e6e5e4e3e2e1e00020102607").unwrap();

        assert_eq!(ipv4.lightning_serialize().unwrap(), ipv4_target);
        assert_eq!(ipv6.lightning_serialize().unwrap(), ipv6_target);
        assert_eq!(onion_v2.lightning_serialize().unwrap(), onionv2_target);
        assert_eq!(onion_v3.lightning_serialize().unwrap(), onionv3_target);

        assert_eq!(
            NetAddress::lightning_deserialize(&ipv4_target).unwrap(),
            ipv4
        );
        assert_eq!(
            NetAddress::lightning_deserialize(&ipv6_target).unwrap(),
            ipv6
        );
        assert_eq!(
            NetAddress::lightning_deserialize(&onionv2_target).unwrap(),
            onion_v2
        );
        assert_eq!(
            NetAddress::lightning_deserialize(&onionv3_target).unwrap(),
            onion_v3
        );

        assert!(NetAddress::lightning_deserialize(
            &Vec::<u8>::from_hex("05fffefdfc2607").unwrap()
        )
        .is_err());
    }
}
