//! Spatial lookups over graph nodes
//!
//! A grid-bucket index over (lat, lon) gives nearest-node and radius queries
//! in roughly O(log N) without a heavyweight spatial library. Cells are
//! 0.01 degrees (~1.1 km) by default, so a city graph puts a handful of
//! nodes in each bucket.

use std::collections::HashMap;

use super::graph::{NodeId, RoadGraph};
use crate::types::GeoPoint;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_000.0;

/// Great-circle distance between two coordinates in meters.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().asin() * EARTH_RADIUS_M
}

/// Grid-bucket spatial index over graph node coordinates.
pub struct SpatialIndex {
    cell_deg: f64,
    cells: HashMap<(i32, i32), Vec<NodeId>>,
    coords: HashMap<NodeId, GeoPoint>,
}

impl SpatialIndex {
    /// Build the index from a loaded graph.
    pub fn build(graph: &RoadGraph, cell_deg: f64) -> Self {
        let mut cells: HashMap<(i32, i32), Vec<NodeId>> = HashMap::new();
        let mut coords = HashMap::with_capacity(graph.node_count());
        for node in graph.nodes() {
            let cell = Self::cell_of(cell_deg, node.lat, node.lon);
            cells.entry(cell).or_default().push(node.id);
            coords.insert(node.id, node.point());
        }
        Self { cell_deg, cells, coords }
    }

    fn cell_of(cell_deg: f64, lat: f64, lon: f64) -> (i32, i32) {
        ((lat / cell_deg).floor() as i32, (lon / cell_deg).floor() as i32)
    }

    /// Nearest node to a point, rejected when further than `max_distance_m`.
    /// Returns `(node, distance_m)`.
    pub fn nearest_node(&self, point: GeoPoint, max_distance_m: f64) -> Option<(NodeId, f64)> {
        if self.coords.is_empty() {
            return None;
        }
        let center = Self::cell_of(self.cell_deg, point.lat, point.lon);
        // Smallest cell dimension shrinks with latitude on the lon axis
        let cell_floor_m =
            self.cell_deg * METERS_PER_DEGREE * point.lat.to_radians().cos().clamp(0.1, 1.0);
        let max_rings = ((max_distance_m / cell_floor_m).ceil() as i32 + 1).max(1);

        let mut best: Option<(NodeId, f64)> = None;
        for ring in 0..=max_rings {
            for (dr, dc) in ring_cells(ring) {
                let cell = (center.0 + dr, center.1 + dc);
                let Some(ids) = self.cells.get(&cell) else { continue };
                for &id in ids {
                    let d = haversine_m(point, self.coords[&id]);
                    if best.map_or(true, |(_, bd)| d < bd) {
                        best = Some((id, d));
                    }
                }
            }
            // Any node in a further ring is at least (ring * cell_floor) away
            if let Some((_, bd)) = best {
                if bd <= ring as f64 * cell_floor_m {
                    break;
                }
            }
        }

        best.filter(|(_, d)| *d <= max_distance_m)
    }

    /// All nodes within `radius_m` of a point, with their distances.
    pub fn nodes_within_radius(&self, point: GeoPoint, radius_m: f64) -> Vec<(NodeId, f64)> {
        let center = Self::cell_of(self.cell_deg, point.lat, point.lon);
        let lat_span = (radius_m / (self.cell_deg * METERS_PER_DEGREE)).ceil() as i32 + 1;
        let cos_lat = point.lat.to_radians().cos().max(0.1);
        let lon_span = (radius_m / (self.cell_deg * METERS_PER_DEGREE * cos_lat)).ceil() as i32 + 1;

        let mut result = Vec::new();
        for dr in -lat_span..=lat_span {
            for dc in -lon_span..=lon_span {
                let Some(ids) = self.cells.get(&(center.0 + dr, center.1 + dc)) else { continue };
                for &id in ids {
                    let d = haversine_m(point, self.coords[&id]);
                    if d <= radius_m {
                        result.push((id, d));
                    }
                }
            }
        }
        result
    }
}

/// Offsets of the cells forming the square ring at the given radius.
fn ring_cells(ring: i32) -> Vec<(i32, i32)> {
    if ring == 0 {
        return vec![(0, 0)];
    }
    let mut cells = Vec::with_capacity((8 * ring) as usize);
    for d in -ring..=ring {
        cells.push((-ring, d));
        cells.push((ring, d));
    }
    for d in (-ring + 1)..ring {
        cells.push((d, -ring));
        cells.push((d, ring));
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::graph::Node;

    fn grid_graph() -> RoadGraph {
        // 3x3 lattice roughly 500 m apart
        let mut nodes = Vec::new();
        let mut id = 0;
        for i in 0..3 {
            for j in 0..3 {
                id += 1;
                nodes.push(Node {
                    id,
                    lat: 14.6500 + f64::from(i) * 0.0045,
                    lon: 121.1000 + f64::from(j) * 0.0045,
                });
            }
        }
        RoadGraph::from_parts(nodes, vec![(1, 2, 0, 500.0)])
    }

    #[test]
    fn haversine_sanity() {
        // One degree of latitude is ~111 km
        let a = GeoPoint::new(14.0, 121.0);
        let b = GeoPoint::new(15.0, 121.0);
        let d = haversine_m(a, b);
        assert!((d - 111_000.0).abs() < 2_000.0, "got {d}");
        assert!(haversine_m(a, a).abs() < 1e-6);
    }

    #[test]
    fn nearest_node_finds_closest() {
        let graph = grid_graph();
        let index = SpatialIndex::build(&graph, 0.01);
        // Just off node 1 (14.6500, 121.1000)
        let (id, dist) = index.nearest_node(GeoPoint::new(14.6501, 121.1001), 500.0).unwrap();
        assert_eq!(id, 1);
        assert!(dist < 30.0);
    }

    #[test]
    fn nearest_node_thresholded() {
        let graph = grid_graph();
        let index = SpatialIndex::build(&graph, 0.01);
        // ~5 km away from the lattice
        let got = index.nearest_node(GeoPoint::new(14.70, 121.10), 500.0);
        assert!(got.is_none());
    }

    #[test]
    fn radius_query_counts_scale_with_radius() {
        let graph = grid_graph();
        let index = SpatialIndex::build(&graph, 0.01);
        let center = GeoPoint::new(14.6545, 121.1045); // middle of the lattice

        let near = index.nodes_within_radius(center, 400.0);
        let far = index.nodes_within_radius(center, 2_000.0);
        assert!(near.len() < far.len());
        assert_eq!(far.len(), 9);
        for (_, d) in near {
            assert!(d <= 400.0);
        }
    }
}
