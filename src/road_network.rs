use std::collections::HashMap;

use anyhow::{Result, bail};
use geo::{BoundingRect, Closest, ClosestPoint, Coord, LineString, Point, Rect};
use log::{debug, info};
use ordered_float::OrderedFloat;
use petgraph::prelude::DiGraphMap;
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};

use crate::probability::haversine_distance;
use crate::types::{Candidate, Fix};

/// Produces the road candidates of a fix.
///
/// Must be deterministic for identical input and free of side effects; the same
/// source may serve several matching requests at once.
pub trait CandidateSource: Send + Sync {
    fn candidates(&self, fix: &Fix) -> Result<Vec<Candidate>>;
}

impl<F> CandidateSource for F
where
    F: Fn(&Fix) -> Result<Vec<Candidate>> + Send + Sync,
{
    fn candidates(&self, fix: &Fix) -> Result<Vec<Candidate>> {
        self(fix)
    }
}

/// Candidate search settings of the in-memory network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Maximum distance for point-to-edge matching (meters)
    pub max_matching_distance: f64,
    /// Maximum number of candidates per GPS fix
    pub max_candidates_per_fix: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_matching_distance: 50.0,
            max_candidates_per_fix: 8,
        }
    }
}

/// A drivable edge between two network nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    pub id: u64,
    pub from_node: u64,
    pub to_node: u64,
    pub coordinates: Vec<Coord<f64>>,
    /// Drivable only from `from_node` to `to_node`
    #[serde(default)]
    pub is_oneway: bool,
}

impl RoadEdge {
    /// Length in meters
    pub fn length(&self) -> f64 {
        self.coordinates
            .windows(2)
            .map(|w| haversine_distance(Point::from(w[0]), Point::from(w[1])))
            .sum()
    }

    /// Closest point of the edge to `point`, as (projection, offset meters, meters from the start)
    pub fn project(&self, point: Point<f64>) -> Option<(Point<f64>, f64, f64)> {
        let line_string = LineString::from(self.coordinates.clone());
        let mut walked = 0.0;
        let mut best: Option<(Point<f64>, f64, f64)> = None;

        for line in line_string.lines() {
            let projection = match line.closest_point(&point) {
                Closest::SinglePoint(p) | Closest::Intersection(p) => p,
                Closest::Indeterminate => continue,
            };
            let offset = haversine_distance(point, projection);
            if best.is_none_or(|(_, best_offset, _)| offset < best_offset) {
                let along = walked + haversine_distance(line.start_point(), projection);
                best = Some((projection, offset, along));
            }
            walked += haversine_distance(line.start_point(), line.end_point());
        }

        best
    }
}

/// On-disk layout of a road network
#[derive(Debug, Serialize, Deserialize)]
pub struct RoadNetworkFile {
    pub edges: Vec<RoadEdge>,
}

// Wrapper for RoadEdge to make it compatible with RTree
struct IndexedEdge {
    edge_id: u64,
    bbox: Rect<f64>,
}

impl RTreeObject for IndexedEdge {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min().x, self.bbox.min().y],
            [self.bbox.max().x, self.bbox.max().y],
        )
    }
}

/// Read-only road network with a spatial index over its edges.
///
/// Serves both as candidate source and as distance oracle; it is never mutated
/// after construction, so one instance can back any number of concurrent matches.
pub struct RoadNetwork {
    config: NetworkConfig,
    edges: HashMap<u64, (RoadEdge, f64)>,
    rtree: RTree<IndexedEdge>,
    graph: DiGraphMap<u64, f64>,
}

impl RoadNetwork {
    pub fn new(edges: Vec<RoadEdge>, config: NetworkConfig) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(edges.len());
        let mut indexed = Vec::with_capacity(edges.len());
        let mut graph = DiGraphMap::new();

        for edge in edges {
            if edge.coordinates.len() < 2 {
                bail!("Edge {} has fewer than two coordinates", edge.id);
            }
            if by_id.contains_key(&edge.id) {
                bail!("Duplicate edge id {}", edge.id);
            }

            let length = edge.length();
            let line_string = LineString::from(edge.coordinates.clone());
            let Some(bbox) = line_string.bounding_rect() else {
                bail!("Edge {} has no extent", edge.id);
            };

            add_arc(&mut graph, edge.from_node, edge.to_node, length);
            if !edge.is_oneway {
                add_arc(&mut graph, edge.to_node, edge.from_node, length);
            }

            indexed.push(IndexedEdge {
                edge_id: edge.id,
                bbox,
            });
            by_id.insert(edge.id, (edge, length));
        }

        info!(
            "Road network ready: {} edges, {} nodes, {} arcs",
            by_id.len(),
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Self {
            config,
            edges: by_id,
            rtree: RTree::bulk_load(indexed),
            graph,
        })
    }

    pub fn from_json(json: &str, config: NetworkConfig) -> Result<Self> {
        let file: RoadNetworkFile = serde_json::from_str(json)?;
        Self::new(file.edges, config)
    }

    pub fn edge_with_length(&self, edge_id: u64) -> Option<(&RoadEdge, f64)> {
        self.edges.get(&edge_id).map(|(edge, length)| (edge, *length))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub(crate) fn graph(&self) -> &DiGraphMap<u64, f64> {
        &self.graph
    }
}

// Parallel edges keep the shortest arc
fn add_arc(graph: &mut DiGraphMap<u64, f64>, from: u64, to: u64, length: f64) {
    let weight = graph
        .edge_weight(from, to)
        .map_or(length, |existing| existing.min(length));
    graph.add_edge(from, to, weight);
}

impl CandidateSource for RoadNetwork {
    fn candidates(&self, fix: &Fix) -> Result<Vec<Candidate>> {
        let radius = self.config.max_matching_distance;
        // Convert meters to approx degrees
        let lat_buffer = radius / 111_000.0;
        let lon_buffer = lat_buffer / fix.location.y().to_radians().cos().abs().max(1e-6);
        let query = AABB::from_corners(
            [fix.location.x() - lon_buffer, fix.location.y() - lat_buffer],
            [fix.location.x() + lon_buffer, fix.location.y() + lat_buffer],
        );

        let mut candidates = Vec::new();
        for indexed in self.rtree.locate_in_envelope_intersecting(&query) {
            let Some((edge, length)) = self.edge_with_length(indexed.edge_id) else {
                continue;
            };
            let Some((projection, offset, along)) = edge.project(fix.location) else {
                continue;
            };
            if offset > radius {
                continue;
            }
            let fraction = if length > 0.0 {
                (along / length).clamp(0.0, 1.0)
            } else {
                0.0
            };
            candidates.push(Candidate::new(projection, edge.id, offset).with_fraction(fraction));
        }

        candidates.sort_by_key(|c| (OrderedFloat(c.offset), c.edge_id));
        candidates.truncate(self.config.max_candidates_per_fix);

        debug!(
            "Fix at ({:.6}, {:.6}): {} candidates within {:.1}m",
            fix.location.x(),
            fix.location.y(),
            candidates.len(),
            radius
        );

        Ok(candidates)
    }
}
