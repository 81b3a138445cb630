//! Risk-aware A* search
//!
//! A* over the road multigraph with a risk-penalized edge cost:
//!
//! ```text
//! cost = length * (1.0 + risk * risk_penalty)
//! ```
//!
//! The penalty is length-proportional, so a long flooded road costs more than
//! a short one at the same risk. Since cost >= length for any non-negative
//! penalty, the haversine heuristic never overestimates and the search stays
//! admissible in every mode. Edges at or above the critical risk threshold
//! are treated as infinite cost regardless of mode.
//!
//! For each `(u, v)` hop the search considers only the best parallel edge
//! (lowest risk, ties to the shorter one) and records which key it chose, so
//! post-hoc metrics are computed over the exact edges A* walked.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use tracing::{debug, warn};

use crate::config::RoutingConfig;
use crate::environment::{haversine_m, EdgeKey, NodeId, RoadGraph};
use crate::types::{PathMetrics, RouteMode};

/// Route calculation errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no path found between {0} and {1}")]
    NoPathFound(NodeId, NodeId),
    #[error("invalid location: {0}")]
    InvalidLocation(String),
}

struct Candidate {
    f_score: f64,
    node: NodeId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.f_score == other.f_score
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on f-score
        other.f_score.total_cmp(&self.f_score)
    }
}

/// The risk penalty applied for a mode under the given config.
pub fn risk_penalty_for(mode: RouteMode, config: &RoutingConfig) -> f64 {
    match mode {
        RouteMode::Safest => config.risk_penalties.safest,
        RouteMode::Balanced => config.risk_penalties.balanced,
        RouteMode::Fastest => config.risk_penalties.fastest,
    }
}

/// Find the lowest-cost path from `start` to `end`.
///
/// Returns `(node_path, edge_keys)` where `edge_keys[i]` is the parallel-edge
/// key selected for the hop `node_path[i] -> node_path[i + 1]`, or an error
/// when no path survives the risk threshold.
pub fn risk_aware_astar(
    graph: &RoadGraph,
    start: NodeId,
    end: NodeId,
    risk_penalty: f64,
    critical_risk_threshold: f64,
) -> Result<(Vec<NodeId>, Vec<EdgeKey>), RouteError> {
    if !graph.contains_node(start) {
        return Err(RouteError::InvalidLocation(format!("start node {start} not in graph")));
    }
    if !graph.contains_node(end) {
        return Err(RouteError::InvalidLocation(format!("end node {end} not in graph")));
    }

    let target = graph
        .node_coords(end)
        .ok_or_else(|| RouteError::InvalidLocation(format!("end node {end} has no coordinates")))?;
    let heuristic = |node: NodeId| -> f64 {
        graph.node_coords(node).map_or(0.0, |p| haversine_m(p, target))
    };

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<NodeId, f64> = HashMap::new();
    let mut came_from: HashMap<NodeId, NodeId> = HashMap::new();
    let mut selected_edges: HashMap<(NodeId, NodeId), EdgeKey> = HashMap::new();
    let mut blocked_edges = 0usize;

    g_score.insert(start, 0.0);
    open.push(Candidate { f_score: heuristic(start), node: start });

    while let Some(Candidate { node: current, f_score }) = open.pop() {
        if current == end {
            let path = reconstruct(&came_from, end);
            let keys = path
                .windows(2)
                .map(|w| selected_edges.get(&(w[0], w[1])).copied().unwrap_or(0))
                .collect();
            debug!(
                nodes = path.len(),
                blocked = blocked_edges,
                "risk-aware A* found a path"
            );
            return Ok((path, keys));
        }

        let current_g = g_score.get(&current).copied().unwrap_or(f64::INFINITY);
        // Stale heap entry
        if f_score > current_g + heuristic(current) + 1e-9 {
            continue;
        }

        let neighbors: Vec<NodeId> = {
            let mut seen = Vec::new();
            for (v, _) in graph.successors(current) {
                if !seen.contains(v) {
                    seen.push(*v);
                }
            }
            seen
        };

        for v in neighbors {
            let Some((key, length, risk)) = graph.best_parallel_edge(current, v) else {
                continue;
            };

            if risk >= critical_risk_threshold {
                blocked_edges += 1;
                if blocked_edges <= 10 {
                    debug!(u = current, v, risk, "blocking edge above critical risk threshold");
                }
                continue;
            }

            let cost = length * (1.0 + risk * risk_penalty);
            let tentative = current_g + cost;
            if tentative < g_score.get(&v).copied().unwrap_or(f64::INFINITY) {
                g_score.insert(v, tentative);
                came_from.insert(v, current);
                selected_edges.insert((current, v), key);
                open.push(Candidate { f_score: tentative + heuristic(v), node: v });
            }
        }
    }

    warn!(start, end, blocked = blocked_edges, "no path exists");
    Err(RouteError::NoPathFound(start, end))
}

fn reconstruct(came_from: &HashMap<NodeId, NodeId>, end: NodeId) -> Vec<NodeId> {
    let mut path = vec![end];
    let mut current = end;
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

/// Compute metrics over the exact edges A* selected.
///
/// Average risk is distance-weighted: `sum(risk * length) / sum(length)`.
/// Estimated time uses the configured base speed reduced by average risk.
pub fn path_metrics(
    graph: &RoadGraph,
    path: &[NodeId],
    edge_keys: &[EdgeKey],
    config: &RoutingConfig,
) -> PathMetrics {
    if path.len() < 2 {
        return PathMetrics::default();
    }

    let mut total_distance = 0.0;
    let mut weighted_risk = 0.0;
    let mut max_risk: f64 = 0.0;
    let mut num_segments = 0;

    for (i, pair) in path.windows(2).enumerate() {
        let key = edge_keys.get(i).copied().unwrap_or(0);
        let Some(view) = graph.edge_view(pair[0], pair[1], key) else { continue };
        total_distance += view.length;
        weighted_risk += view.risk * view.length;
        max_risk = max_risk.max(view.risk);
        num_segments += 1;
    }

    let average_risk = if total_distance > 0.0 { weighted_risk / total_distance } else { 0.0 };

    let speed_factor = 1.0 - average_risk * config.speed_reduction_factor;
    let adjusted_speed_kmh = (config.base_speed_kmh * speed_factor).max(1.0);
    let estimated_time = (total_distance / 1000.0) / adjusted_speed_kmh * 60.0;

    PathMetrics { total_distance, average_risk, max_risk, estimated_time, num_segments }
}

/// Warning messages derived from path metrics and mode.
pub fn route_warnings(metrics: &PathMetrics, mode: RouteMode, config: &RoutingConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let is_fastest = mode == RouteMode::Fastest;

    if is_fastest && (metrics.max_risk >= 0.5 || metrics.average_risk >= 0.3) {
        warnings.push(format!(
            "FASTEST MODE ACTIVE: This route ignores flood risk. Max risk: {:.0}%, avg risk: {:.0}%. \
             Expect flooded roads and hazardous conditions.",
            metrics.max_risk * 100.0,
            metrics.average_risk * 100.0
        ));
    }

    if metrics.max_risk >= 0.9 {
        warnings.push(
            "CRITICAL: Route contains impassable or extremely dangerous roads. Consider an \
             alternative route or evacuation."
                .into(),
        );
    } else if metrics.max_risk >= 0.7 {
        warnings.push(
            "WARNING: Route contains high-risk flood areas. Exercise extreme caution and monitor \
             conditions."
                .into(),
        );
    } else if metrics.average_risk >= 0.5 && !is_fastest {
        warnings.push(
            "CAUTION: Moderate flood risk on this route. Drive slowly and be prepared for water \
             on roads."
                .into(),
        );
    }

    if metrics.total_distance > config.long_route_threshold_m {
        warnings.push("This is a long route. Consider fuel and time requirements.".into());
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::graph::tests::square_graph;
    use crate::environment::Node;

    fn config() -> RoutingConfig {
        RoutingConfig::default()
    }

    #[test]
    fn bootstrap_scenario_avoids_blocked_diagonal() {
        // Square with a 350 m diagonal; risk 0.95 blocks it in every mode.
        let graph = square_graph();
        graph.update_edge_risk(1, 4, 0, 0.95).unwrap();

        let (path, keys) = risk_aware_astar(&graph, 1, 4, 3.0, 0.9).unwrap();
        assert_eq!(path, vec![1, 2, 3, 4]);
        assert_eq!(keys.len(), 3);

        let metrics = path_metrics(&graph, &path, &keys, &config());
        assert!((metrics.total_distance - 450.0).abs() < 1e-9);
    }

    #[test]
    fn fastest_mode_takes_risky_shortcut_below_threshold() {
        let graph = square_graph();
        // Risky but below critical: fastest ignores it, safest detours
        graph.update_edge_risk(1, 4, 0, 0.6).unwrap();

        let (fast_path, _) = risk_aware_astar(&graph, 1, 4, 0.0, 0.9).unwrap();
        assert_eq!(fast_path, vec![1, 4]);

        let (safe_path, _) = risk_aware_astar(&graph, 1, 4, 100.0, 0.9).unwrap();
        assert_eq!(safe_path, vec![1, 2, 3, 4]);
    }

    #[test]
    fn no_path_when_everything_blocked() {
        let graph = square_graph();
        graph.update_edge_risk(1, 2, 0, 0.95).unwrap();
        graph.update_edge_risk(1, 4, 0, 0.95).unwrap();

        let err = risk_aware_astar(&graph, 1, 4, 0.0, 0.9).unwrap_err();
        assert!(matches!(err, RouteError::NoPathFound(1, 4)));
    }

    #[test]
    fn invalid_node_rejected() {
        let graph = square_graph();
        assert!(matches!(
            risk_aware_astar(&graph, 1, 999, 3.0, 0.9),
            Err(RouteError::InvalidLocation(_))
        ));
    }

    #[test]
    fn heuristic_admissibility_holds_on_found_paths() {
        let graph = square_graph();
        let (path, keys) = risk_aware_astar(&graph, 1, 3, 3.0, 0.9).unwrap();
        let metrics = path_metrics(&graph, &path, &keys, &config());

        let start = graph.node_coords(1).unwrap();
        let end = graph.node_coords(3).unwrap();
        assert!(metrics.total_distance >= haversine_m(start, end));
    }

    #[test]
    fn metrics_distance_weighted_average() {
        let graph = square_graph();
        graph.update_edge_risk(1, 2, 0, 1.0).unwrap(); // 100 m at risk 1
        let path = vec![1, 2, 3];
        let keys = vec![0, 0];
        let metrics = path_metrics(&graph, &path, &keys, &config());

        // 100 m at 1.0 plus 150 m at 0.0 -> 100/250 = 0.4
        assert!((metrics.average_risk - 0.4).abs() < 1e-9);
        assert!((metrics.max_risk - 1.0).abs() < 1e-9);
        assert!(metrics.average_risk <= metrics.max_risk);
        assert_eq!(metrics.num_segments, 2);
    }

    #[test]
    fn mode_ordering_law_on_average_risk() {
        // Two routes: short risky vs long clean. Safest <= balanced <= fastest.
        let graph = square_graph();
        graph.update_edge_risk(1, 4, 0, 0.5).unwrap();
        let config = config();

        let mut risks = Vec::new();
        for mode in [RouteMode::Safest, RouteMode::Balanced, RouteMode::Fastest] {
            let penalty = risk_penalty_for(mode, &config);
            let (path, keys) =
                risk_aware_astar(&graph, 1, 4, penalty, config.critical_risk_threshold).unwrap();
            risks.push(path_metrics(&graph, &path, &keys, &config).average_risk);
        }
        assert!(risks[0] <= risks[1] + 1e-9);
        assert!(risks[1] <= risks[2] + 1e-9);
    }

    #[test]
    fn parallel_edge_key_recorded() {
        let nodes = vec![
            Node { id: 1, lat: 14.65, lon: 121.10 },
            Node { id: 2, lat: 14.6509, lon: 121.10 },
        ];
        let edges = vec![(1, 2, 0, 100.0), (1, 2, 1, 120.0)];
        let graph = crate::environment::RoadGraph::from_parts(nodes, edges);
        // Make key 0 risky so key 1 is selected
        graph.update_edge_risk(1, 2, 0, 0.8).unwrap();

        let (path, keys) = risk_aware_astar(&graph, 1, 2, 3.0, 0.9).unwrap();
        assert_eq!(path, vec![1, 2]);
        assert_eq!(keys, vec![1]);

        let metrics = path_metrics(&graph, &path, &keys, &config());
        assert!((metrics.total_distance - 120.0).abs() < 1e-9);
        assert!(metrics.max_risk.abs() < f64::EPSILON);
    }

    #[test]
    fn warnings_by_threshold() {
        let config = config();
        let critical = PathMetrics { max_risk: 0.95, average_risk: 0.2, ..Default::default() };
        assert!(route_warnings(&critical, RouteMode::Balanced, &config)
            .iter()
            .any(|w| w.starts_with("CRITICAL")));

        let high = PathMetrics { max_risk: 0.75, average_risk: 0.2, ..Default::default() };
        assert!(route_warnings(&high, RouteMode::Balanced, &config)
            .iter()
            .any(|w| w.starts_with("WARNING")));

        let moderate = PathMetrics { max_risk: 0.3, average_risk: 0.55, ..Default::default() };
        assert!(route_warnings(&moderate, RouteMode::Balanced, &config)
            .iter()
            .any(|w| w.starts_with("CAUTION")));
        // Fastest mode suppresses the caution line in favor of its own notice
        assert!(!route_warnings(&moderate, RouteMode::Fastest, &config)
            .iter()
            .any(|w| w.starts_with("CAUTION")));

        let long = PathMetrics { total_distance: 12_000.0, ..Default::default() };
        assert!(route_warnings(&long, RouteMode::Balanced, &config)
            .iter()
            .any(|w| w.contains("long route")));
    }

}
