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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
extern crate lightning_encoding;
#[cfg(feature = "strict_encoding")]
extern crate strict_encoding;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_with;

pub mod bolt7;
pub mod broadcast;
pub mod features;
pub mod graph;
pub mod pending;
pub mod policy;
pub mod router;
pub mod routing;
pub mod types;

pub use bolt7::{ChannelAnnouncement, ChannelUpdate, NodeAnnouncement};
pub use broadcast::BroadcastQueue;
pub use features::GossipFeatures;
pub use graph::{Channel, ChannelGraph, HalfChannel, Node};
pub use policy::FailCode;
pub use router::{FuzzSeed, RouteHop, ROUTING_MAX_HOPS};
pub use routing::RoutingState;
pub use types::{Alias, NetAddress, NodeColor, ShortChannelId, Timestamp};
