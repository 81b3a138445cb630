//! Risk snapshot persistence
//!
//! Serializes only edges with `risk > 0` so a quiet network costs almost
//! nothing on disk. Writes are atomic: temp file in the same directory,
//! then rename. Recovery replays stored risks onto the freshly-loaded base
//! graph; edges that no longer exist are skipped.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::graph::{EdgeKey, NodeId, RoadGraph};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEdge {
    u: NodeId,
    v: NodeId,
    key: EdgeKey,
    risk: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    timestamp: DateTime<Utc>,
    edges: Vec<SnapshotEdge>,
}

/// Snapshot persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Write the current `risk > 0` edge set atomically. Returns the edge count.
pub fn write_snapshot(graph: &RoadGraph, path: &Path) -> Result<usize, SnapshotError> {
    let edges: Vec<SnapshotEdge> = graph
        .edges_with_risk()
        .into_iter()
        .map(|((u, v, key), risk, _)| SnapshotEdge { u, v, key, risk })
        .collect();
    let count = edges.len();

    let snapshot = Snapshot { timestamp: Utc::now(), edges };
    let serialized = serde_json::to_vec_pretty(&snapshot)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, serialized)?;
    std::fs::rename(&tmp, path)?;

    graph.mark_snapshot();
    info!(edges = count, path = %path.display(), "risk snapshot saved");
    Ok(count)
}

/// Write a snapshot only if the cadence gate (wall time since the last one)
/// has elapsed.
pub fn maybe_snapshot(
    graph: &RoadGraph,
    path: &Path,
    min_interval_secs: u64,
) -> Result<Option<usize>, SnapshotError> {
    if !graph.should_snapshot(min_interval_secs) {
        return Ok(None);
    }
    write_snapshot(graph, path).map(Some)
}

/// Replay a snapshot onto a loaded base graph. Missing edges are skipped.
/// Returns the number of restored edges, or 0 if no snapshot exists.
pub fn recover(graph: &RoadGraph, path: &Path) -> Result<usize, SnapshotError> {
    if !path.exists() {
        return Ok(0);
    }
    let contents = std::fs::read_to_string(path)?;
    let snapshot: Snapshot = serde_json::from_str(&contents)?;

    let mut restored = 0;
    let mut skipped = 0;
    for edge in &snapshot.edges {
        match graph.update_edge_risk(edge.u, edge.v, edge.key, edge.risk) {
            Ok(()) => restored += 1,
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "snapshot contained edges missing from the base graph");
    }
    info!(
        restored,
        saved_at = %snapshot.timestamp,
        "restored edge risk scores from snapshot"
    );
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::graph::tests::square_graph;

    #[test]
    fn snapshot_skips_zero_risk_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");

        let graph = square_graph();
        graph.update_edge_risk(1, 2, 0, 0.4).unwrap();
        graph.update_edge_risk(3, 4, 0, 0.9).unwrap();

        let count = write_snapshot(&graph, &path).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn round_trip_reproduces_risk_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");

        let graph = square_graph();
        graph.update_edge_risk(1, 2, 0, 0.4).unwrap();
        graph.update_edge_risk(1, 4, 0, 0.95).unwrap();
        write_snapshot(&graph, &path).unwrap();

        // Fresh base graph, replay
        let fresh = square_graph();
        let restored = recover(&fresh, &path).unwrap();
        assert_eq!(restored, 2);
        assert!((fresh.edge_view(1, 2, 0).unwrap().risk - 0.4).abs() < 1e-9);
        assert!((fresh.edge_view(1, 4, 0).unwrap().risk - 0.95).abs() < 1e-9);
        assert!(fresh.edge_view(2, 3, 0).unwrap().risk.abs() < f64::EPSILON);
    }

    #[test]
    fn recover_without_snapshot_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let graph = square_graph();
        let restored = recover(&graph, &dir.path().join("missing.json")).unwrap();
        assert_eq!(restored, 0);
    }

    #[test]
    fn cadence_gate_blocks_back_to_back_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");

        let graph = square_graph();
        graph.update_edge_risk(1, 2, 0, 0.4).unwrap();

        assert!(maybe_snapshot(&graph, &path, 600).unwrap().is_some());
        assert!(maybe_snapshot(&graph, &path, 600).unwrap().is_none());
        // Zero gate always fires
        assert!(maybe_snapshot(&graph, &path, 0).unwrap().is_some());
    }
}
