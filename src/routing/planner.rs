//! Route planner — coordinate snapping, route assembly, evacuation ranking
//!
//! Shared by the routing and evacuation agents. Owns the evacuation-center
//! table (CSV at startup, built-in sample when missing) and a nearest-node
//! cache keyed by coordinates rounded to 4 decimals (~11 m), TTL'd and
//! LRU-bounded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::astar::{
    path_metrics, risk_aware_astar, risk_penalty_for, route_warnings, RouteError,
};
use crate::comms::EvacuationRecommendation;
use crate::config::SystemConfig;
use crate::environment::{haversine_m, NodeId, RoadGraph, SpatialIndex};
use crate::types::{
    EvacuationCenter, GeoPoint, RoutePreferences, RouteResponse, RouteStatus,
};

/// Rounded-coordinate cache key (4 decimals ~ 11 m).
fn cache_key(point: GeoPoint) -> (i64, i64) {
    ((point.lat * 10_000.0).round() as i64, (point.lon * 10_000.0).round() as i64)
}

pub struct RoutePlanner {
    graph: Arc<RoadGraph>,
    index: Arc<SpatialIndex>,
    config: Arc<SystemConfig>,
    centers: Vec<EvacuationCenter>,
    node_cache: Mutex<HashMap<(i64, i64), (NodeId, Instant)>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl RoutePlanner {
    pub fn new(graph: Arc<RoadGraph>, index: Arc<SpatialIndex>, config: Arc<SystemConfig>) -> Self {
        let centers = load_centers(&config.paths.evacuation_centers_csv);
        info!(centers = centers.len(), "route planner initialized");
        Self {
            graph,
            index,
            config,
            centers,
            node_cache: Mutex::new(HashMap::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn evacuation_centers(&self) -> &[EvacuationCenter] {
        &self.centers
    }

    fn validate(&self, point: GeoPoint, label: &str) -> Result<(), RouteError> {
        if !self.config.in_bounds(point.lat, point.lon) {
            return Err(RouteError::InvalidLocation(format!(
                "{label} ({:.4}, {:.4}) outside configured bounds",
                point.lat, point.lon
            )));
        }
        Ok(())
    }

    /// Snap a coordinate to the nearest graph node, cached.
    pub fn nearest_node(&self, point: GeoPoint) -> Option<NodeId> {
        let key = cache_key(point);
        let ttl = Duration::from_secs(self.config.routing.node_cache_ttl_seconds);
        {
            let mut cache = self.node_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(&(node, at)) = cache.get(&key) {
                if at.elapsed() < ttl {
                    self.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Some(node);
                }
                cache.remove(&key);
            }
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (node, distance) =
            self.index.nearest_node(point, self.config.routing.max_node_distance_m)?;
        debug!(node, distance_m = distance, "snapped coordinate to graph node");

        let mut cache = self.node_cache.lock().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.config.routing.node_cache_max_entries {
            // Evict the stalest entry
            if let Some(oldest) = cache.iter().min_by_key(|(_, (_, at))| *at).map(|(k, _)| *k) {
                cache.remove(&oldest);
            }
        }
        cache.insert(key, (node, Instant::now()));
        Some(node)
    }

    /// Calculate a risk-aware route between two coordinates.
    pub fn calculate_route(
        &self,
        start: GeoPoint,
        end: GeoPoint,
        preferences: &RoutePreferences,
    ) -> Result<RouteResponse, RouteError> {
        self.validate(start, "start")?;
        self.validate(end, "end")?;

        let mode = preferences.resolve_mode();
        let start_node = self.nearest_node(start).ok_or_else(|| {
            RouteError::InvalidLocation("could not map start to the road network".into())
        })?;
        let end_node = self.nearest_node(end).ok_or_else(|| {
            RouteError::InvalidLocation("could not map end to the road network".into())
        })?;

        let routing = &self.config.routing;
        let penalty = risk_penalty_for(mode, routing);
        debug!(%mode, penalty, start_node, end_node, "calculating route");

        let (path, keys) = match risk_aware_astar(
            &self.graph,
            start_node,
            end_node,
            penalty,
            routing.critical_risk_threshold,
        ) {
            Ok(found) => found,
            Err(RouteError::NoPathFound(..)) => return Ok(RouteResponse::not_found(mode)),
            Err(e) => return Err(e),
        };

        let metrics = path_metrics(&self.graph, &path, &keys, routing);
        let warnings = route_warnings(&metrics, mode, routing);
        let coords =
            path.iter().filter_map(|&n| self.graph.node_coords(n)).collect::<Vec<GeoPoint>>();

        Ok(RouteResponse {
            status: RouteStatus::Success,
            path: coords,
            distance: metrics.total_distance,
            estimated_time: metrics.estimated_time,
            risk_level: metrics.average_risk,
            max_risk: metrics.max_risk,
            num_segments: metrics.num_segments,
            mode,
            warnings,
        })
    }

    /// Rank evacuation centers by straight-line distance, route to the top
    /// candidates, and pick the one minimizing `(avg_risk, estimated_time)`
    /// lexicographically.
    pub fn find_nearest_center(
        &self,
        location: GeoPoint,
        preferences: &RoutePreferences,
    ) -> Result<EvacuationRecommendation, RouteError> {
        self.validate(location, "location")?;

        if self.centers.is_empty() {
            return Ok(EvacuationRecommendation {
                status: "no_centers".into(),
                center: None,
                route: None,
                explanation: None,
                candidates_evaluated: 0,
            });
        }

        let mut by_distance: Vec<(&EvacuationCenter, f64)> = self
            .centers
            .iter()
            .map(|c| (c, haversine_m(location, GeoPoint::new(c.latitude, c.longitude))))
            .collect();
        by_distance.sort_by(|a, b| a.1.total_cmp(&b.1));

        let max_centers = self.config.routing.max_centers_to_evaluate;
        let mut candidates = Vec::new();
        for (center, straight_line) in by_distance.into_iter().take(max_centers) {
            let target = GeoPoint::new(center.latitude, center.longitude);
            match self.calculate_route(location, target, preferences) {
                Ok(route) if route.status == RouteStatus::Success => {
                    debug!(
                        center = %center.name,
                        straight_line_m = straight_line,
                        avg_risk = route.risk_level,
                        "evacuation candidate routed"
                    );
                    candidates.push((center.clone(), route));
                }
                Ok(_) => debug!(center = %center.name, "no route to candidate"),
                Err(e) => warn!(center = %center.name, error = %e, "candidate routing failed"),
            }
        }

        let evaluated = candidates.len();
        let best = candidates.into_iter().min_by(|a, b| {
            a.1.risk_level
                .total_cmp(&b.1.risk_level)
                .then(a.1.estimated_time.total_cmp(&b.1.estimated_time))
        });

        Ok(match best {
            Some((center, route)) => EvacuationRecommendation {
                status: "success".into(),
                center: Some(center),
                route: Some(route),
                explanation: None,
                candidates_evaluated: evaluated,
            },
            None => EvacuationRecommendation {
                status: "no_route".into(),
                center: None,
                route: None,
                explanation: None,
                candidates_evaluated: evaluated,
            },
        })
    }

    pub fn cache_stats(&self) -> (u64, u64) {
        (self.cache_hits.load(Ordering::Relaxed), self.cache_misses.load(Ordering::Relaxed))
    }
}

/// Load evacuation centers from CSV; built-in sample list when missing.
fn load_centers(path: &Path) -> Vec<EvacuationCenter> {
    match read_centers_csv(path) {
        Ok(centers) if !centers.is_empty() => {
            info!(count = centers.len(), path = %path.display(), "loaded evacuation centers");
            centers
        }
        Ok(_) => {
            warn!(path = %path.display(), "evacuation centers file empty, using sample data");
            sample_centers()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "evacuation centers not loaded, using sample data");
            sample_centers()
        }
    }
}

fn read_centers_csv(path: &Path) -> std::io::Result<Vec<EvacuationCenter>> {
    let contents = std::fs::read_to_string(path)?;
    let mut centers = Vec::new();
    for (i, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || (i == 0 && line.to_lowercase().starts_with("name,")) {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 5 {
            warn!(line = i + 1, "skipping malformed evacuation center row");
            continue;
        }
        let (Ok(lat), Ok(lon)) = (fields[1].parse::<f64>(), fields[2].parse::<f64>()) else {
            warn!(line = i + 1, "skipping evacuation center row with bad coordinates");
            continue;
        };
        centers.push(EvacuationCenter {
            name: fields[0].to_string(),
            latitude: lat,
            longitude: lon,
            capacity: fields[3].parse().unwrap_or(0),
            center_type: fields[4].to_string(),
        });
    }
    Ok(centers)
}

fn sample_centers() -> Vec<EvacuationCenter> {
    vec![
        EvacuationCenter {
            name: "Marikina Elementary School".into(),
            latitude: 14.6507,
            longitude: 121.1029,
            capacity: 200,
            center_type: "school".into(),
        },
        EvacuationCenter {
            name: "Marikina Sports Center".into(),
            latitude: 14.6545,
            longitude: 121.1089,
            capacity: 500,
            center_type: "gymnasium".into(),
        },
        EvacuationCenter {
            name: "Barangay Concepcion Covered Court".into(),
            latitude: 14.6480,
            longitude: 121.0980,
            capacity: 150,
            center_type: "covered_court".into(),
        },
    ]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::environment::Node;

    fn planner_with_graph() -> RoutePlanner {
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
            (2, 1, 0, 100.0),
            (3, 2, 0, 150.0),
            (4, 3, 0, 200.0),
        ];
        let graph = Arc::new(RoadGraph::from_parts(nodes, edges));
        let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));
        // Default paths do not exist in the test environment, so the planner
        // falls back to the built-in sample centers.
        let config = Arc::new(SystemConfig::default());
        RoutePlanner::new(graph, index, config)
    }

    #[test]
    fn route_between_nearby_coordinates() {
        let planner = planner_with_graph();
        let response = planner
            .calculate_route(
                GeoPoint::new(14.6500, 121.1000),
                GeoPoint::new(14.6500, 121.1014),
                &RoutePreferences::default(),
            )
            .unwrap();
        assert_eq!(response.status, RouteStatus::Success);
        assert!(response.distance > 0.0);
        assert!(!response.path.is_empty());
    }

    #[test]
    fn out_of_bounds_rejected() {
        let planner = planner_with_graph();
        let err = planner
            .calculate_route(
                GeoPoint::new(48.85, 2.35),
                GeoPoint::new(14.6500, 121.1014),
                &RoutePreferences::default(),
            )
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidLocation(_)));
    }

    #[test]
    fn unreachable_coordinate_rejected() {
        let planner = planner_with_graph();
        // In bounds but several km from the network
        let err = planner
            .calculate_route(
                GeoPoint::new(14.80, 121.20),
                GeoPoint::new(14.6500, 121.1014),
                &RoutePreferences::default(),
            )
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidLocation(_)));
    }

    #[test]
    fn nearest_node_cache_hits_on_repeat() {
        let planner = planner_with_graph();
        let point = GeoPoint::new(14.6500, 121.1000);
        planner.nearest_node(point);
        planner.nearest_node(point);
        let (hits, misses) = planner.cache_stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[test]
    fn evacuation_ranking_prefers_low_risk_then_time() {
        let planner = planner_with_graph();
        let rec = planner
            .find_nearest_center(GeoPoint::new(14.6500, 121.1000), &RoutePreferences::safest())
            .unwrap();
        // Sample centers: the first two snap to the test graph; ranking picks one
        assert_eq!(rec.status, "success");
        assert!(rec.center.is_some());
        assert!(rec.route.is_some());
        assert!(rec.candidates_evaluated >= 1);
    }
}
