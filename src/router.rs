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

//! Route computation over the channel graph.
//!
//! Per-hop fees are proportional to the amount being forwarded, which
//! grows towards the payer as every hop adds its fee, so a greedy
//! shortest-path relaxation is unsound here. Instead the search keeps,
//! for every node, the best known total *per path length* and runs the
//! relaxation [`ROUTING_MAX_HOPS`] times, mapping backwards from the
//! payment destination.

use std::collections::HashMap;

use bitcoin::hashes::siphash24;
use log::{info, trace};
use secp256k1::PublicKey;

use crate::graph::HalfChannel;
use crate::routing::RoutingState;
use crate::types::{ShortChannelId, Timestamp};

/// Hop count limit of routes, reflecting the onion packet limit
pub const ROUTING_MAX_HOPS: usize = 20;

/// 365.25 * 24 * 60 / 10
pub const BLOCKS_PER_YEAR: u64 = 52596;

/// For overflow avoidance, we never deal with amounts above 40 bits
pub const MAX_MSAT: u64 = 1 << 40;

/// Proportional fee must be below 24 bits, so fee computation never
/// overflows
pub const MAX_PROPORTIONAL_FEE: u32 = 1 << 24;

/// Too big to reach, but does not overflow when added up
const INFINITE: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// One hop of a computed route: the channel to forward over, the node it
/// delivers to, and what that node must receive
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("{amount_msat} msat over {channel_id} to {node_id}")]
pub struct RouteHop {
    /// Channel forwarding this hop
    pub channel_id: ShortChannelId,

    /// The node this hop delivers to
    pub node_id: PublicKey,

    /// Amount the hop must deliver, fees of later hops included
    pub amount_msat: u64,

    /// CLTV expiry the hop must use
    pub delay: u32,
}

/// SipHash-2-4 key deriving the deterministic per-channel fee fuzz
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct FuzzSeed {
    pub k0: u64,
    pub k1: u64,
}

impl From<[u8; 16]> for FuzzSeed {
    fn from(bytes: [u8; 16]) -> Self {
        let mut k0 = [0u8; 8];
        let mut k1 = [0u8; 8];
        k0.copy_from_slice(&bytes[..8]);
        k1.copy_from_slice(&bytes[8..]);
        FuzzSeed {
            k0: u64::from_le_bytes(k0),
            k1: u64::from_le_bytes(k1),
        }
    }
}

/// Best known state for one node and one path length: total amount the
/// node must receive, accumulated risk premium, and the channel of the
/// next hop
#[derive(Clone, Copy)]
struct BfgEntry {
    total: u64,
    risk: u64,
    prev: Option<ShortChannelId>,
}

impl Default for BfgEntry {
    fn default() -> Self {
        BfgEntry {
            total: INFINITE,
            risk: 0,
            prev: None,
        }
    }
}

/// Per-query scratch: one DP array per touched node, infinite until
/// relaxed. Keeping it out of the graph makes queries read-only and
/// independent of each other.
struct BfgTable(HashMap<PublicKey, [BfgEntry; ROUTING_MAX_HOPS + 1]>);

impl BfgTable {
    fn new() -> Self {
        BfgTable(HashMap::new())
    }

    fn entry(
        &mut self,
        id: &PublicKey,
    ) -> &mut [BfgEntry; ROUTING_MAX_HOPS + 1] {
        self.0
            .entry(*id)
            .or_insert_with(|| [BfgEntry::default(); ROUTING_MAX_HOPS + 1])
    }

    fn get(&self, id: &PublicKey, len: usize) -> BfgEntry {
        self.0
            .get(id)
            .map(|bfg| bfg[len])
            .unwrap_or_default()
    }
}

/// Fee for forwarding `msat` over a half channel
fn connection_fee(half: &HalfChannel, msat: u64) -> u64 {
    debug_assert!(msat < MAX_MSAT);
    debug_assert!(half.proportional_fee < MAX_PROPORTIONAL_FEE);
    half.base_fee as u64 + (half.proportional_fee as u64 * msat) / 1_000_000
}

/// Risk premium of passing through a channel. The constant term prefers
/// shorter routes, all things equal.
fn risk_fee(amount: u64, delay: u16, riskfactor: f64) -> u64 {
    1 + (amount as f64 * delay as f64 * riskfactor) as u64
}

/// Per-channel fee scale factor in `1.0 - fuzz ..= 1.0 + fuzz`, derived
/// deterministically from the seed and the channel id
fn fee_scale(fuzz: f64, seed: FuzzSeed, scid: ShortChannelId) -> f64 {
    if fuzz == 0.0 {
        return 1.0;
    }
    let hash = siphash24::Hash::hash_with_keys(
        seed.k0,
        seed.k1,
        &u64::from(scid).to_be_bytes(),
    )
    .as_u64();
    1.0 + (2.0 * fuzz * hash as f64 / u64::MAX as f64) - fuzz
}

impl RoutingState {
    /// Computes a route delivering `amount_msat` from `source` to
    /// `destination`, reading the wall clock.
    ///
    /// See [`Self::get_route_at`].
    #[allow(clippy::too_many_arguments)]
    pub fn get_route(
        &self,
        source: &PublicKey,
        destination: &PublicKey,
        amount_msat: u64,
        risk_factor: f64,
        final_cltv: u32,
        fuzz: f64,
        seed: FuzzSeed,
    ) -> Option<Vec<RouteHop>> {
        self.get_route_at(
            source,
            destination,
            amount_msat,
            risk_factor,
            final_cltv,
            fuzz,
            seed,
            Timestamp::now(),
        )
    }

    /// Computes a route delivering `amount_msat` from `source` to
    /// `destination`.
    ///
    /// `risk_factor` is in ppm of amount per year of locked-up time; a
    /// non-zero `fuzz` scales every channel's fee by a deterministic
    /// pseudo-random factor within `±fuzz` during route selection, while
    /// the hop amounts reported back are always computed from the real
    /// policies. Returns `None` when either node is unknown, both are the
    /// same, the amount is out of range, or no route of at most
    /// [`ROUTING_MAX_HOPS`] hops exists.
    #[allow(clippy::too_many_arguments)]
    pub fn get_route_at(
        &self,
        source: &PublicKey,
        destination: &PublicKey,
        amount_msat: u64,
        risk_factor: f64,
        final_cltv: u32,
        fuzz: f64,
        seed: FuzzSeed,
        now: Timestamp,
    ) -> Option<Vec<RouteHop>> {
        let riskfactor = risk_factor / BLOCKS_PER_YEAR as f64 / 10_000.0;
        let route = self.find_route(
            source,
            destination,
            amount_msat,
            riskfactor,
            fuzz,
            seed,
            now,
        )?;

        // Fees and delays accumulate backwards along the route
        let mut hops = Vec::with_capacity(route.len());
        let mut total_amount = amount_msat;
        let mut total_delay = final_cltv;
        let mut node = *destination;
        for scid in route.iter().rev() {
            let channel = self
                .graph
                .get_channel(scid)
                .expect("routes reference live channels");
            let half = &channel.half[channel.direction_to(&node)];
            hops.push(RouteHop {
                channel_id: *scid,
                node_id: node,
                amount_msat: total_amount,
                delay: total_delay,
            });
            total_amount += connection_fee(half, total_amount);
            total_delay += half.delay as u32;
            node = channel.other_endpoint(&node);
        }
        debug_assert_eq!(&node, source);
        hops.reverse();
        Some(hops)
    }

    /// The length-stratified Bellman-Ford search; returns the channels of
    /// the cheapest route in forwarding order.
    ///
    /// `riskfactor` is already normalized to a per-block factor.
    #[allow(clippy::too_many_arguments)]
    fn find_route(
        &self,
        source: &PublicKey,
        destination: &PublicKey,
        msat: u64,
        riskfactor: f64,
        fuzz: f64,
        seed: FuzzSeed,
        now: Timestamp,
    ) -> Option<Vec<ShortChannelId>> {
        if self.graph.get_node(destination).is_none() {
            info!("find_route: cannot find {}", destination);
            return None;
        }
        if self.graph.get_node(source).is_none() {
            info!("find_route: cannot find myself ({})", source);
            return None;
        }
        if source == destination {
            info!(
                "find_route: this is {}, refusing to create empty route",
                destination
            );
            return None;
        }
        if msat >= MAX_MSAT {
            info!("find_route: can't route huge amount {}", msat);
            return None;
        }

        // We map backwards: the amount wanted at the destination is known
        // and the search derives what every earlier node must send
        let mut bfg = BfgTable::new();
        bfg.entry(destination)[0] = BfgEntry {
            total: msat,
            risk: 0,
            prev: None,
        };

        // Bellman-Ford-Gibson: like Bellman-Ford, but keeping values for
        // every path length
        for _run in 0..ROUTING_MAX_HOPS {
            for channel in self.graph.channels() {
                if !channel.public {
                    continue;
                }
                for direction in 0..2 {
                    let half = &channel.half[direction];
                    if !half.is_routable(now) {
                        continue;
                    }
                    // Half `direction` forwards from `from` towards the
                    // node whose cost is already known
                    let from = channel.endpoints[direction];
                    let into = channel.endpoints[1 - direction];
                    let scale = fee_scale(fuzz, seed, channel.scid);

                    for len in 0..ROUTING_MAX_HOPS {
                        let known = bfg.get(&into, len);
                        if known.total == INFINITE {
                            continue;
                        }
                        let fee = (connection_fee(half, known.total) as f64
                            * scale) as u64;
                        let risk = known.risk
                            + risk_fee(
                                known.total + fee,
                                half.delay,
                                riskfactor,
                            );
                        if known.total.saturating_add(fee).saturating_add(risk)
                            >= MAX_MSAT
                        {
                            trace!(
                                "...extreme {} + fee {} + risk {} ignored",
                                known.total,
                                fee,
                                risk
                            );
                            continue;
                        }
                        let candidate = bfg.get(&from, len + 1);
                        if known.total + fee + risk
                            < candidate.total + candidate.risk
                        {
                            bfg.entry(&from)[len + 1] = BfgEntry {
                                total: known.total + fee,
                                risk,
                                prev: Some(channel.scid),
                            };
                        }
                    }
                }
            }
        }

        let mut best = 0;
        for len in 1..=ROUTING_MAX_HOPS {
            if bfg.get(source, len).total < bfg.get(source, best).total {
                best = len;
            }
        }

        // No route?
        if bfg.get(source, best).total >= INFINITE {
            trace!("find_route: no route to {}", destination);
            return None;
        }

        // We don't charge ourselves fees, so the total fee is what the
        // first forwarding node receives beyond the delivered amount
        let first = bfg
            .get(source, best)
            .prev
            .expect("reachable lengths have a next-hop channel");
        let next = self
            .graph
            .get_channel(&first)
            .expect("routes reference live channels")
            .other_endpoint(source);
        trace!(
            "find_route: {} hops, total fee {} msat",
            best,
            bfg.get(&next, best - 1).total - msat
        );

        // Lay out the route
        let mut route = Vec::with_capacity(best);
        let mut node = *source;
        for hop in 0..best {
            let entry = bfg.get(&node, best - hop);
            let scid = entry
                .prev
                .expect("reachable lengths have a next-hop channel");
            route.push(scid);
            node = self
                .graph
                .get_channel(&scid)
                .expect("routes reference live channels")
                .other_endpoint(&node);
        }
        debug_assert_eq!(&node, destination);
        Some(route)
    }
}
