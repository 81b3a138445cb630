//! Snapshot round-trip: the persisted `risk > 0` edge set reloads exactly
//! onto the same base graph.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;

use agos_os::environment::{snapshot, Node, RoadGraph};

/// A 10x10 lattice with bidirectional edges.
fn lattice_graph() -> RoadGraph {
    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let id = |row: i64, col: i64| row * 10 + col + 1;

    for row in 0..10 {
        for col in 0..10 {
            nodes.push(Node {
                id: id(row, col),
                lat: 14.6200 + row as f64 * 0.0020,
                lon: 121.0900 + col as f64 * 0.0020,
            });
        }
    }
    for row in 0..10 {
        for col in 0..10 {
            if col < 9 {
                edges.push((id(row, col), id(row, col + 1), 0, 220.0));
                edges.push((id(row, col + 1), id(row, col), 0, 220.0));
            }
            if row < 9 {
                edges.push((id(row, col), id(row + 1, col), 0, 220.0));
                edges.push((id(row + 1, col), id(row, col), 0, 220.0));
            }
        }
    }
    RoadGraph::from_parts(nodes, edges)
}

#[test]
fn fifty_random_edges_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("risk_snapshot.json");

    let graph = lattice_graph();
    let mut rng = rand::thread_rng();

    // Risk 50 distinct random edges
    let mut all_edges = graph.all_edges();
    all_edges.shuffle(&mut rng);
    let mut expected: HashMap<_, f64> = HashMap::new();
    for edge in all_edges.into_iter().take(50) {
        let risk = rng.gen_range(0.05..1.0);
        graph.update_edge_risk(edge.0, edge.1, edge.2, risk).unwrap();
        expected.insert(edge, risk);
    }

    let written = snapshot::write_snapshot(&graph, &path).unwrap();
    assert_eq!(written, 50);

    // "Restart": fresh base graph, replay the snapshot
    let restarted = lattice_graph();
    let restored = snapshot::recover(&restarted, &path).unwrap();
    assert_eq!(restored, 50);

    let reloaded: HashMap<_, f64> = restarted
        .edges_with_risk()
        .into_iter()
        .map(|(edge, risk, _)| (edge, risk))
        .collect();
    assert_eq!(reloaded.len(), expected.len());
    for (edge, risk) in &expected {
        let got = reloaded.get(edge).copied().unwrap_or(0.0);
        assert!((got - risk).abs() < 1e-9, "edge {edge:?}: {got} != {risk}");
        // Derived weight invariant holds after recovery
        let view = restarted.edge_view(edge.0, edge.1, edge.2).unwrap();
        assert!((view.weight - view.length * (1.0 + view.risk)).abs() < 1e-9);
    }
}

#[test]
fn snapshot_overwrites_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("risk_snapshot.json");

    let graph = lattice_graph();
    graph.update_edge_risk(1, 2, 0, 0.9).unwrap();
    snapshot::write_snapshot(&graph, &path).unwrap();

    // Risk cleared: the next snapshot must not resurrect the old edge
    graph.update_edge_risk(1, 2, 0, 0.0).unwrap();
    graph.update_edge_risk(2, 3, 0, 0.4).unwrap();
    snapshot::write_snapshot(&graph, &path).unwrap();

    let restarted = lattice_graph();
    let restored = snapshot::recover(&restarted, &path).unwrap();
    assert_eq!(restored, 1);
    assert!(restarted.edge_view(1, 2, 0).unwrap().risk.abs() < f64::EPSILON);
    assert!((restarted.edge_view(2, 3, 0).unwrap().risk - 0.4).abs() < 1e-9);
}
