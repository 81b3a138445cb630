//! Road graph store — directed multigraph with a mutable risk field
//!
//! Topology (nodes, adjacency, edge lengths) is immutable after load. The
//! only mutable state is per-edge `(risk, weight, last_risk_update)`, held
//! behind a single `RwLock`: one writer, many readers, and a reader always
//! sees a complete edge state.
//!
//! Invariants maintained on every write:
//! - `0 <= risk <= 1` (clamped)
//! - `weight = length * (1 + risk)`, so `weight >= length`

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::GeoPoint;

pub type NodeId = i64;
pub type EdgeKey = u32;
/// `(u, v, key)` — key disambiguates parallel edges.
pub type EdgeId = (NodeId, NodeId, EdgeKey);

/// Graph environment errors.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("graph not loaded")]
    NotLoaded,
    #[error("edge ({0}, {1}, {2}) not found in graph")]
    UnknownEdge(NodeId, NodeId, EdgeKey),
    #[error("failed to read graph file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse graph file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A graph node with immutable geographic coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub lat: f64,
    pub lon: f64,
}

impl Node {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy)]
struct EdgeRisk {
    risk: f64,
    weight: f64,
    last_update: Option<DateTime<Utc>>,
}

/// A complete, consistent view of one edge at some past write.
#[derive(Debug, Clone, Copy)]
pub struct EdgeView {
    pub length: f64,
    pub risk: f64,
    pub weight: f64,
    pub last_risk_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct GraphFileEdge {
    u: NodeId,
    v: NodeId,
    #[serde(default)]
    key: EdgeKey,
    length: f64,
}

#[derive(Debug, Deserialize, Serialize)]
struct GraphFile {
    nodes: Vec<Node>,
    edges: Vec<GraphFileEdge>,
}

/// The shared road network.
pub struct RoadGraph {
    nodes: HashMap<NodeId, Node>,
    lengths: HashMap<EdgeId, f64>,
    out_edges: HashMap<NodeId, Vec<(NodeId, EdgeKey)>>,
    in_edges: HashMap<NodeId, Vec<(NodeId, EdgeKey)>>,
    risk: RwLock<HashMap<EdgeId, EdgeRisk>>,
    updating: AtomicBool,
    last_snapshot: Mutex<Option<Instant>>,
}

impl RoadGraph {
    /// Build a graph from already-parsed parts. Risk starts at 0 everywhere.
    pub fn from_parts(nodes: Vec<Node>, edges: Vec<(NodeId, NodeId, EdgeKey, f64)>) -> Self {
        let mut lengths = HashMap::with_capacity(edges.len());
        let mut out_edges: HashMap<NodeId, Vec<(NodeId, EdgeKey)>> = HashMap::new();
        let mut in_edges: HashMap<NodeId, Vec<(NodeId, EdgeKey)>> = HashMap::new();
        let mut risk = HashMap::with_capacity(edges.len());

        for (u, v, key, length) in edges {
            let length = if length > 0.0 { length } else { 1.0 };
            lengths.insert((u, v, key), length);
            out_edges.entry(u).or_default().push((v, key));
            in_edges.entry(v).or_default().push((u, key));
            risk.insert((u, v, key), EdgeRisk { risk: 0.0, weight: length, last_update: None });
        }

        Self {
            nodes: nodes.into_iter().map(|n| (n.id, n)).collect(),
            lengths,
            out_edges,
            in_edges,
            risk: RwLock::new(risk),
            updating: AtomicBool::new(false),
            last_snapshot: Mutex::new(None),
        }
    }

    /// Load the base graph from a JSON file.
    pub fn load_from_file(path: &Path) -> Result<Self, GraphError> {
        let contents = std::fs::read_to_string(path)?;
        let file: GraphFile = serde_json::from_str(&contents)?;
        let edges = file.edges.into_iter().map(|e| (e.u, e.v, e.key, e.length)).collect();
        let graph = Self::from_parts(file.nodes, edges);
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            path = %path.display(),
            "road graph loaded"
        );
        Ok(graph)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.lengths.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_coords(&self, id: NodeId) -> Option<GeoPoint> {
        self.nodes.get(&id).map(Node::point)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Outgoing `(v, key)` pairs from `u`. Parallel edges appear once per key.
    pub fn successors(&self, u: NodeId) -> &[(NodeId, EdgeKey)] {
        self.out_edges.get(&u).map_or(&[], Vec::as_slice)
    }

    pub fn edge_length(&self, u: NodeId, v: NodeId, key: EdgeKey) -> Option<f64> {
        self.lengths.get(&(u, v, key)).copied()
    }

    /// Read a consistent `(length, risk, weight, last_update)` view of an edge.
    pub fn edge_view(&self, u: NodeId, v: NodeId, key: EdgeKey) -> Option<EdgeView> {
        let length = *self.lengths.get(&(u, v, key))?;
        let risk = self.risk.read().unwrap_or_else(|e| e.into_inner());
        let state = risk.get(&(u, v, key))?;
        Some(EdgeView {
            length,
            risk: state.risk,
            weight: state.weight,
            last_risk_update: state.last_update,
        })
    }

    /// Among parallel edges `u -> v`, the one with lowest risk (ties broken by
    /// shorter length). One read-lock acquisition for the whole group.
    pub fn best_parallel_edge(&self, u: NodeId, v: NodeId) -> Option<(EdgeKey, f64, f64)> {
        let risk = self.risk.read().unwrap_or_else(|e| e.into_inner());
        let mut best: Option<(EdgeKey, f64, f64)> = None;
        for (to, key) in self.successors(u) {
            if *to != v {
                continue;
            }
            let id = (u, v, *key);
            let length = *self.lengths.get(&id)?;
            let edge_risk = risk.get(&id).map_or(0.0, |s| s.risk);
            let better = match best {
                None => true,
                Some((_, best_len, best_risk)) => {
                    edge_risk < best_risk || (edge_risk == best_risk && length < best_len)
                }
            };
            if better {
                best = Some((*key, length, edge_risk));
            }
        }
        best
    }

    /// Update one edge's risk. Clamps to [0, 1], recomputes the derived
    /// weight, and stamps `last_risk_update`. Writer-exclusive.
    pub fn update_edge_risk(
        &self,
        u: NodeId,
        v: NodeId,
        key: EdgeKey,
        risk_value: f64,
    ) -> Result<(), GraphError> {
        let length =
            *self.lengths.get(&(u, v, key)).ok_or(GraphError::UnknownEdge(u, v, key))?;
        let clamped = risk_value.clamp(0.0, 1.0);

        self.updating.store(true, Ordering::SeqCst);
        {
            let mut risk = self.risk.write().unwrap_or_else(|e| e.into_inner());
            if let Some(state) = risk.get_mut(&(u, v, key)) {
                state.risk = clamped;
                state.weight = length * (1.0 + clamped);
                state.last_update = Some(Utc::now());
            }
        }
        self.updating.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Apply many risk updates in one critical section. Unknown edges are
    /// logged and skipped; the rest still apply. Returns the applied count.
    pub fn batch_update(&self, updates: &HashMap<EdgeId, f64>) -> usize {
        let now = Utc::now();
        let mut applied = 0;

        self.updating.store(true, Ordering::SeqCst);
        {
            let mut risk = self.risk.write().unwrap_or_else(|e| e.into_inner());
            for (&(u, v, key), &risk_value) in updates {
                let Some(&length) = self.lengths.get(&(u, v, key)) else {
                    warn!(u, v, key, "batch update: edge not found in graph");
                    continue;
                };
                let clamped = risk_value.clamp(0.0, 1.0);
                if let Some(state) = risk.get_mut(&(u, v, key)) {
                    state.risk = clamped;
                    state.weight = length * (1.0 + clamped);
                    state.last_update = Some(now);
                    applied += 1;
                }
            }
        }
        self.updating.store(false, Ordering::SeqCst);

        info!(applied, requested = updates.len(), "batch risk update complete");
        applied
    }

    /// Whether a write is currently in flight. Never blocks readers.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    /// All edges incident to a node, both directions.
    pub fn incident_edges(&self, node: NodeId) -> Vec<EdgeId> {
        let mut edges = Vec::new();
        for (v, key) in self.successors(node) {
            edges.push((node, *v, *key));
        }
        if let Some(inbound) = self.in_edges.get(&node) {
            for (u, key) in inbound {
                edges.push((*u, node, *key));
            }
        }
        edges
    }

    pub fn all_edges(&self) -> Vec<EdgeId> {
        self.lengths.keys().copied().collect()
    }

    /// Edges with non-zero risk, with their current risk and last update.
    pub fn edges_with_risk(&self) -> Vec<(EdgeId, f64, Option<DateTime<Utc>>)> {
        let risk = self.risk.read().unwrap_or_else(|e| e.into_inner());
        risk.iter()
            .filter(|(_, s)| s.risk > 0.0)
            .map(|(&id, s)| (id, s.risk, s.last_update))
            .collect()
    }

    /// True if the snapshot cadence gate has elapsed (or never snapshotted).
    pub fn should_snapshot(&self, min_interval_secs: u64) -> bool {
        let last = self.last_snapshot.lock().unwrap_or_else(|e| e.into_inner());
        last.map_or(true, |t| t.elapsed().as_secs() >= min_interval_secs)
    }

    pub fn mark_snapshot(&self) {
        let mut last = self.last_snapshot.lock().unwrap_or_else(|e| e.into_inner());
        *last = Some(Instant::now());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Four nodes in a square with parallel short diagonals; the 1->4
    /// diagonal is the 350 m edge used by the routing scenario tests.
    pub(crate) fn square_graph() -> RoadGraph {
        let nodes = vec![
            Node { id: 1, lat: 14.6500, lon: 121.1000 },
            Node { id: 2, lat: 14.6509, lon: 121.1000 },
            Node { id: 3, lat: 14.6509, lon: 121.1014 },
            Node { id: 4, lat: 14.6500, lon: 121.1014 },
        ];
        let edges = vec![
            (1, 2, 0, 100.0),
            (2, 3, 0, 150.0),
            (3, 4, 0, 200.0),
            (1, 4, 0, 350.0),
            (4, 1, 0, 350.0),
        ];
        RoadGraph::from_parts(nodes, edges)
    }

    #[test]
    fn risk_is_clamped_and_weight_derived() {
        let graph = square_graph();
        graph.update_edge_risk(1, 2, 0, 1.7).unwrap();
        let view = graph.edge_view(1, 2, 0).unwrap();
        assert!((view.risk - 1.0).abs() < f64::EPSILON);
        assert!((view.weight - 200.0).abs() < 1e-9);
        assert!(view.last_risk_update.is_some());

        graph.update_edge_risk(1, 2, 0, -0.5).unwrap();
        let view = graph.edge_view(1, 2, 0).unwrap();
        assert!((view.risk).abs() < f64::EPSILON);
        assert!((view.weight - view.length).abs() < 1e-9);
    }

    #[test]
    fn weight_never_below_length() {
        let graph = square_graph();
        for risk in [0.0, 0.3, 0.77, 1.0] {
            graph.update_edge_risk(2, 3, 0, risk).unwrap();
            let view = graph.edge_view(2, 3, 0).unwrap();
            assert!(view.weight >= view.length);
            assert!((view.weight - view.length * (1.0 + view.risk)).abs() < 1e-9);
        }
    }

    #[test]
    fn unknown_edge_is_error() {
        let graph = square_graph();
        assert!(matches!(
            graph.update_edge_risk(1, 3, 0, 0.5),
            Err(GraphError::UnknownEdge(1, 3, 0))
        ));
    }

    #[test]
    fn batch_update_applies_known_edges() {
        let graph = square_graph();
        let updates: HashMap<EdgeId, f64> =
            [((1, 2, 0), 0.5), ((2, 3, 0), 0.8), ((9, 9, 0), 0.9)].into_iter().collect();
        let applied = graph.batch_update(&updates);
        assert_eq!(applied, 2);
        assert!((graph.edge_view(2, 3, 0).unwrap().risk - 0.8).abs() < 1e-9);
    }

    #[test]
    fn best_parallel_edge_prefers_lower_risk() {
        let nodes = vec![
            Node { id: 1, lat: 14.65, lon: 121.10 },
            Node { id: 2, lat: 14.66, lon: 121.10 },
        ];
        let edges = vec![(1, 2, 0, 100.0), (1, 2, 1, 300.0)];
        let graph = RoadGraph::from_parts(nodes, edges);

        // Equal risk: shorter wins
        let (key, length, _) = graph.best_parallel_edge(1, 2).unwrap();
        assert_eq!(key, 0);
        assert!((length - 100.0).abs() < 1e-9);

        // Shorter edge turns risky: longer clean edge wins
        graph.update_edge_risk(1, 2, 0, 0.6).unwrap();
        let (key, _, risk) = graph.best_parallel_edge(1, 2).unwrap();
        assert_eq!(key, 1);
        assert!(risk.abs() < f64::EPSILON);
    }

    #[test]
    fn incident_edges_cover_both_directions() {
        let graph = square_graph();
        let incident = graph.incident_edges(4);
        assert!(incident.contains(&(4, 1, 0)));
        assert!(incident.contains(&(3, 4, 0)));
        assert!(incident.contains(&(1, 4, 0)));
    }

    #[test]
    fn edges_with_risk_only_nonzero() {
        let graph = square_graph();
        graph.update_edge_risk(1, 4, 0, 0.95).unwrap();
        let risky = graph.edges_with_risk();
        assert_eq!(risky.len(), 1);
        assert_eq!(risky[0].0, (1, 4, 0));
    }
}
