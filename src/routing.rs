use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use anyhow::{Result, anyhow};
use log::trace;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::road_network::{RoadEdge, RoadNetwork};
use crate::types::Candidate;

/// Outcome of a shortest-path query between two candidates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NetworkDistance {
    /// Length of the shortest drivable path (meters)
    Reachable(f64),
    Unreachable,
}

impl NetworkDistance {
    pub fn meters(self) -> Option<f64> {
        match self {
            NetworkDistance::Reachable(d) => Some(d),
            NetworkDistance::Unreachable => None,
        }
    }

    pub fn is_reachable(self) -> bool {
        matches!(self, NetworkDistance::Reachable(_))
    }
}

/// Network distance between two candidates.
///
/// Implementations are shared by concurrent matching requests, so they must be
/// callable from several threads and must not depend on call order. An `Err` means
/// the oracle itself failed (index unavailable, corrupt data); a missing path is
/// `Ok(NetworkDistance::Unreachable)`.
pub trait DistanceOracle: Send + Sync {
    fn network_distance(&self, from: &Candidate, to: &Candidate) -> Result<NetworkDistance>;

    /// Like [`network_distance`](Self::network_distance), but paths longer than
    /// `max_distance` may be reported as `Unreachable`. The matcher rejects such
    /// transitions anyway, so oracles can stop searching there.
    fn network_distance_within(
        &self,
        from: &Candidate,
        to: &Candidate,
        _max_distance: f64,
    ) -> Result<NetworkDistance> {
        self.network_distance(from, to)
    }
}

impl<F> DistanceOracle for F
where
    F: Fn(&Candidate, &Candidate) -> Result<NetworkDistance> + Send + Sync,
{
    fn network_distance(&self, from: &Candidate, to: &Candidate) -> Result<NetworkDistance> {
        self(from, to)
    }
}

/// Nodes through which a vehicle at `fraction` along `edge` can leave it, with the
/// distance still to drive on the edge
fn exit_nodes(edge: &RoadEdge, length: f64, fraction: f64) -> Vec<(u64, f64)> {
    let mut exits = vec![(edge.to_node, (1.0 - fraction) * length)];
    if !edge.is_oneway {
        exits.push((edge.from_node, fraction * length));
    }
    exits
}

/// Nodes through which a vehicle can enter `edge` to reach `fraction`, with the
/// distance driven on the edge afterwards
fn entry_nodes(edge: &RoadEdge, length: f64, fraction: f64) -> Vec<(u64, f64)> {
    let mut entries = vec![(edge.from_node, fraction * length)];
    if !edge.is_oneway {
        entries.push((edge.to_node, (1.0 - fraction) * length));
    }
    entries
}

impl RoadNetwork {
    /// Shortest path from any exit to any entry, seeded with the exit costs and
    /// finishing with the entry costs. The search stops once the frontier passes
    /// `limit` or cannot improve on the best total found.
    fn shortest_through_nodes(
        &self,
        exits: &[(u64, f64)],
        entries: &[(u64, f64)],
        limit: f64,
    ) -> Option<f64> {
        let graph = self.graph();
        let mut settled: HashMap<u64, f64> = HashMap::new();
        let mut heap = BinaryHeap::new();
        for &(node, cost) in exits {
            heap.push(Reverse((OrderedFloat(cost), node)));
        }

        let mut best: Option<f64> = None;
        while let Some(Reverse((OrderedFloat(cost), node))) = heap.pop() {
            if cost > limit || best.is_some_and(|b| cost >= b) {
                break;
            }
            if settled.contains_key(&node) {
                continue;
            }
            settled.insert(node, cost);

            for &(_, entry_cost) in entries.iter().filter(|(n, _)| *n == node) {
                let total = cost + entry_cost;
                if best.is_none_or(|b| total < b) {
                    best = Some(total);
                }
            }

            for (_, next, &weight) in graph.edges(node) {
                if !settled.contains_key(&next) {
                    heap.push(Reverse((OrderedFloat(cost + weight), next)));
                }
            }
        }
        best
    }

    fn distance_between(
        &self,
        from: &Candidate,
        to: &Candidate,
        limit: f64,
    ) -> Result<NetworkDistance> {
        let (source, source_length) = self
            .edge_with_length(from.edge_id)
            .ok_or_else(|| anyhow!("Edge {} not found in road network", from.edge_id))?;
        let (target, target_length) = self
            .edge_with_length(to.edge_id)
            .ok_or_else(|| anyhow!("Edge {} not found in road network", to.edge_id))?;

        let from_fraction = from.fraction.clamp(0.0, 1.0);
        let to_fraction = to.fraction.clamp(0.0, 1.0);
        let mut best: Option<f64> = None;

        // Staying on the edge
        if source.id == target.id {
            let along = (to_fraction - from_fraction) * source_length;
            if along >= 0.0 || !source.is_oneway {
                best = Some(along.abs());
            }
        }

        let exits = exit_nodes(source, source_length, from_fraction);
        let entries = entry_nodes(target, target_length, to_fraction);
        let bound = best.map_or(limit, |b| b.min(limit));
        if let Some(through) = self.shortest_through_nodes(&exits, &entries, bound) {
            if best.is_none_or(|b| through < b) {
                best = Some(through);
            }
        }

        trace!(
            "Network distance edge {} ({:.3}) -> edge {} ({:.3}) within {:.1}m: {:?}",
            from.edge_id, from_fraction, to.edge_id, to_fraction, limit, best
        );

        Ok(best
            .filter(|&d| d <= limit)
            .map_or(NetworkDistance::Unreachable, NetworkDistance::Reachable))
    }
}

impl DistanceOracle for RoadNetwork {
    fn network_distance(&self, from: &Candidate, to: &Candidate) -> Result<NetworkDistance> {
        self.distance_between(from, to, f64::INFINITY)
    }

    fn network_distance_within(
        &self,
        from: &Candidate,
        to: &Candidate,
        max_distance: f64,
    ) -> Result<NetworkDistance> {
        self.distance_between(from, to, max_distance)
    }
}
