//! Hazard Fusion Agent — observations to per-edge risk
//!
//! Central fusion hub: receives INFORM batches from the collector and scout
//! agents, maintains time-decaying caches, and owns every risk write to the
//! road graph. The fusion pipeline runs on demand (`process_and_update`):
//!
//! 1. expiry sweep of stale cache entries (scout 45 min, flood 90 min TTL)
//! 2. exponential decay of existing per-edge risk
//! 3. optional raster depth lookup per edge, converted depth -> risk
//! 4. global environmental modifier from fused location risk
//! 5. spatial propagation of coordinate-tagged scout reports
//!
//! A confident high-risk visual observation *replaces* the computed value at
//! the impacted nodes instead of averaging into it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::Agent;
use crate::comms::{
    AclMessage, LocationRiskSummary, MessageBody, MessageBus, Performative, RiskLevel, RiskTrend,
    RiskUpdateSummary,
};
use crate::config::SystemConfig;
use crate::environment::{haversine_m, EdgeId, RoadGraph, SpatialIndex};
use crate::types::{FloodObservation, GeoPoint, ReportType, ScoutReport};

/// Optional georeferenced flood-depth collaborator. Layers are keyed by
/// `(return_period, time_step)`.
pub trait FloodRaster: Send + Sync {
    fn depth_at(&self, lon: f64, lat: f64, return_period: &str, time_step: u8) -> Option<f64>;
}

const VALID_RETURN_PERIODS: &[&str] = &["rr01", "rr02", "rr03", "rr04"];

/// Exponential time decay: `value * exp(-rate * age_minutes)`.
fn apply_time_decay(value: f64, age_minutes: f64, rate: f64) -> f64 {
    if age_minutes <= 0.0 {
        return value;
    }
    value * (-rate * age_minutes).exp()
}

fn age_minutes(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - timestamp).num_milliseconds() as f64 / 60_000.0).max(0.0)
}

/// Piecewise flood depth (m) to risk conversion.
fn depth_to_risk(depth: f64) -> f64 {
    if depth <= 0.3 {
        depth
    } else if depth <= 0.6 {
        0.3 + (depth - 0.3)
    } else if depth <= 1.0 {
        0.6 + 0.5 * (depth - 0.6)
    } else {
        (0.8 + 0.2 * (depth - 1.0)).min(1.0)
    }
}

pub struct HazardFusionAgent {
    agent_id: String,
    bus: Arc<MessageBus>,
    config: Arc<SystemConfig>,
    graph: Arc<RoadGraph>,
    index: Arc<SpatialIndex>,
    raster: Option<Arc<dyn FloodRaster>>,
    return_period: String,
    time_step: u8,

    flood_cache: HashMap<String, FloodObservation>,
    scout_cache: VecDeque<ScoutReport>,

    previous_average_risk: f64,
    last_update_time: Option<DateTime<Utc>>,
    risk_history: VecDeque<(DateTime<Utc>, f64)>,
}

impl HazardFusionAgent {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        config: Arc<SystemConfig>,
        graph: Arc<RoadGraph>,
        index: Arc<SpatialIndex>,
        raster: Option<Arc<dyn FloodRaster>>,
    ) -> Self {
        let agent_id = agent_id.into();
        info!(
            agent = %agent_id,
            raster = raster.is_some(),
            weights = ?config.hazard.risk_weights,
            "hazard fusion agent initialized"
        );
        Self {
            agent_id,
            bus,
            config,
            graph,
            index,
            raster,
            return_period: "rr01".into(),
            time_step: 1,
            flood_cache: HashMap::new(),
            scout_cache: VecDeque::new(),
            previous_average_risk: 0.0,
            last_update_time: None,
            risk_history: VecDeque::new(),
        }
    }

    /// Switch the raster scenario. Return period must be one of the fixed
    /// layer keys; time step must be in `[1, 18]`.
    pub fn set_flood_scenario(&mut self, return_period: &str, time_step: u8) -> Result<(), String> {
        if !VALID_RETURN_PERIODS.contains(&return_period) {
            return Err(format!(
                "invalid return_period '{return_period}', must be one of {VALID_RETURN_PERIODS:?}"
            ));
        }
        if !(1..=18).contains(&time_step) {
            return Err(format!("invalid time_step {time_step}, must be between 1 and 18"));
        }
        self.return_period = return_period.to_string();
        self.time_step = time_step;
        info!(agent = %self.agent_id, return_period, time_step, "flood scenario updated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cache ingestion
    // ------------------------------------------------------------------

    /// Validate and upsert a flood data batch; bounded cache evicts oldest.
    pub fn ingest_flood_batch(&mut self, data: HashMap<String, FloodObservation>) -> usize {
        let mut valid = 0;
        for (location, obs) in data {
            if !obs.is_valid() {
                warn!(location = %location, "rejecting invalid flood observation");
                continue;
            }
            self.flood_cache.insert(location, obs);
            valid += 1;
        }
        while self.flood_cache.len() > self.config.hazard.max_flood_cache {
            let oldest = self
                .flood_cache
                .iter()
                .min_by_key(|(_, obs)| obs.timestamp())
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    self.flood_cache.remove(&key);
                }
                None => break,
            }
        }
        debug!(agent = %self.agent_id, valid, cache = self.flood_cache.len(), "flood batch ingested");
        valid
    }

    /// Validate, dedupe by `(location, text)`, and append scout reports.
    pub fn ingest_scout_batch(&mut self, reports: Vec<ScoutReport>) -> usize {
        let mut added = 0;
        for report in reports {
            if !report.is_valid() {
                warn!(location = %report.location, "rejecting invalid scout report");
                continue;
            }
            let duplicate = self
                .scout_cache
                .iter()
                .any(|existing| existing.identity() == report.identity());
            if duplicate {
                debug!(location = %report.location, "skipping duplicate scout report");
                continue;
            }
            self.scout_cache.push_back(report);
            added += 1;
        }
        while self.scout_cache.len() > self.config.hazard.max_scout_cache {
            self.scout_cache.pop_front();
        }
        debug!(agent = %self.agent_id, added, cache = self.scout_cache.len(), "scout batch ingested");
        added
    }

    // ------------------------------------------------------------------
    // Fusion pipeline
    // ------------------------------------------------------------------

    fn clean_expired(&mut self, now: DateTime<Utc>) -> (usize, usize) {
        let scout_ttl = self.config.hazard.scout_ttl_minutes;
        let before_scouts = self.scout_cache.len();
        self.scout_cache.retain(|r| age_minutes(r.timestamp, now) < scout_ttl);

        let flood_ttl = self.config.hazard.flood_ttl_minutes;
        let before_floods = self.flood_cache.len();
        self.flood_cache.retain(|_, obs| age_minutes(obs.timestamp(), now) < flood_ttl);

        let expired =
            (before_scouts - self.scout_cache.len(), before_floods - self.flood_cache.len());
        if expired.0 > 0 || expired.1 > 0 {
            info!(
                agent = %self.agent_id,
                scouts = expired.0,
                flood_locations = expired.1,
                "expired cache entries removed"
            );
        }
        expired
    }

    /// Any cached river or dam at alert level or above (or within 90% of its
    /// alert threshold) means flood water recedes slowly.
    fn river_levels_elevated(&self) -> bool {
        self.flood_cache
            .values()
            .any(|obs| obs.status().is_elevated() || obs.near_alert_level())
    }

    fn scout_decay_rate(&self, report_type: ReportType) -> f64 {
        let hazard = &self.config.hazard;
        if self.river_levels_elevated() {
            hazard.scout_decay_rate_slow
        } else if report_type == ReportType::Flood {
            hazard.scout_decay_rate_fast
        } else {
            (hazard.scout_decay_rate_fast + hazard.scout_decay_rate_slow) / 2.0
        }
    }

    /// Fuse cached observations into per-location risk. Coordinate-tagged
    /// scout reports are excluded; they get spatial treatment instead.
    fn fuse_locations(&self, now: DateTime<Utc>) -> HashMap<String, f64> {
        let weights = &self.config.hazard.risk_weights;
        let mut fused: HashMap<String, f64> = HashMap::new();

        for (location, obs) in &self.flood_cache {
            let flood_risk = obs
                .flood_depth_m()
                .map_or_else(|| obs.risk_score(), |depth| (depth / 2.0).min(1.0));
            *fused.entry(location.clone()).or_insert(0.0) += flood_risk * weights.flood_depth;
        }

        for report in &self.scout_cache {
            if report.coordinates.is_some() {
                continue;
            }
            let rate = self.scout_decay_rate(report.report_type);
            let decayed =
                apply_time_decay(report.severity, age_minutes(report.timestamp, now), rate);
            *fused.entry(report.location.clone()).or_insert(0.0) +=
                decayed * report.confidence * weights.crowdsourced;
        }

        for risk in fused.values_mut() {
            *risk = risk.min(1.0);
        }
        fused
    }

    /// Decay existing per-edge risk; entries below the minimum threshold are
    /// dropped from the new score map (and thereby cleared on write).
    fn decayed_edge_risk(&self, now: DateTime<Utc>) -> HashMap<EdgeId, f64> {
        let hazard = &self.config.hazard;
        let mut scores = HashMap::new();
        for (edge, risk, last_update) in self.graph.edges_with_risk() {
            let decayed = match last_update {
                Some(at) => apply_time_decay(risk, age_minutes(at, now), hazard.spatial_decay_rate),
                None => risk,
            };
            if decayed > hazard.min_risk_threshold {
                scores.insert(edge, decayed);
            } else {
                // Write an explicit zero so the stale risk clears
                scores.insert(edge, 0.0);
            }
        }
        scores
    }

    /// Raster depth sampling: average of the two endpoint depths per edge.
    fn raster_edge_risk(&self, scores: &mut HashMap<EdgeId, f64>) {
        let Some(raster) = &self.raster else { return };
        let weights = &self.config.hazard.risk_weights;
        let mut flooded = 0;

        for (u, v, key) in self.graph.all_edges() {
            let (Some(a), Some(b)) = (self.graph.node_coords(u), self.graph.node_coords(v)) else {
                continue;
            };
            let depths: Vec<f64> = [a, b]
                .iter()
                .filter_map(|p| raster.depth_at(p.lon, p.lat, &self.return_period, self.time_step))
                .collect();
            if depths.is_empty() {
                continue;
            }
            let avg_depth = depths.iter().sum::<f64>() / depths.len() as f64;
            if avg_depth <= 0.01 {
                continue;
            }
            scores.insert((u, v, key), depth_to_risk(avg_depth) * weights.flood_depth);
            flooded += 1;
        }
        if flooded > 0 {
            info!(agent = %self.agent_id, flooded, "raster flood depths applied");
        }
    }

    /// Spatial propagation of coordinate-tagged scout reports. At the nearest
    /// node the risk is `severity * confidence`; within the radius it decays
    /// linearly with distance and is skipped below 0.05. A qualifying visual
    /// observation replaces the computed value outright.
    fn propagate_scout_reports(&self, scores: &mut HashMap<EdgeId, f64>) -> usize {
        let hazard = &self.config.hazard;
        let radius = hazard.risk_radius_m;
        let mut nodes_updated = 0;

        for report in &self.scout_cache {
            let Some(coords) = report.coordinates else { continue };
            let point = GeoPoint::new(coords.lat, coords.lon);

            let risk_level = report.severity * report.confidence;
            let overrides = report.visual_evidence
                && report.severity >= hazard.visual_override.risk_threshold
                && report.confidence >= hazard.visual_override.confidence_threshold;

            let Some((nearest, _)) =
                self.index.nearest_node(point, self.config.routing.max_node_distance_m)
            else {
                warn!(location = %report.location, "no graph node near scout report");
                continue;
            };

            let apply = |scores: &mut HashMap<EdgeId, f64>, node, value: f64, replace: bool| {
                for edge in self.graph.incident_edges(node) {
                    let entry = scores.entry(edge).or_insert(0.0);
                    if replace {
                        *entry = value;
                    } else {
                        *entry = entry.max(value);
                    }
                }
            };

            let at_nearest = if overrides { report.severity } else { risk_level };
            apply(scores, nearest, at_nearest, overrides);
            nodes_updated += 1;

            for (node, distance) in self.index.nodes_within_radius(point, radius) {
                if node == nearest {
                    continue;
                }
                let decayed = at_nearest * (1.0 - distance / radius);
                if decayed < 0.05 {
                    continue;
                }
                apply(scores, node, decayed, false);
                nodes_updated += 1;
            }

            if overrides {
                debug!(
                    location = %report.location,
                    severity = report.severity,
                    confidence = report.confidence,
                    "visual override applied"
                );
            }
        }
        nodes_updated
    }

    /// Run the full fusion pipeline and write the result to the graph.
    pub fn process_and_update(&mut self) -> RiskUpdateSummary {
        let now = Utc::now();
        info!(agent = %self.agent_id, "processing hazard data");

        self.clean_expired(now);

        let mut scores = self.decayed_edge_risk(now);
        self.raster_edge_risk(&mut scores);

        // Environmental modifier: per-location fused risk applied as a global
        // additive term across the network
        let fused = self.fuse_locations(now);
        let weights = &self.config.hazard.risk_weights;
        for risk_level in fused.values() {
            if *risk_level <= 0.0 {
                continue;
            }
            let environmental = risk_level * (weights.crowdsourced + weights.historical);
            for (u, v, key) in self.graph.all_edges() {
                let entry = scores.entry((u, v, key)).or_insert(0.0);
                *entry = (*entry + environmental).min(1.0);
            }
        }

        self.propagate_scout_reports(&mut scores);

        let edges_updated = self.graph.batch_update(&scores);

        // Trend over the written scores
        let average_risk = if scores.is_empty() {
            0.0
        } else {
            scores.values().sum::<f64>() / scores.len() as f64
        };
        let (risk_trend, risk_change_rate) = match self.last_update_time {
            Some(last) => {
                let minutes = age_minutes(last, now);
                if minutes > 0.0 {
                    let rate = (average_risk - self.previous_average_risk) / minutes;
                    let trend = if rate > 0.001 {
                        RiskTrend::Increasing
                    } else if rate < -0.001 {
                        RiskTrend::Decreasing
                    } else {
                        RiskTrend::Stable
                    };
                    (trend, rate)
                } else {
                    (RiskTrend::Stable, 0.0)
                }
            }
            None => (RiskTrend::Stable, 0.0),
        };

        self.risk_history.push_back((now, average_risk));
        while self.risk_history.len() > 20 {
            self.risk_history.pop_front();
        }
        self.previous_average_risk = average_risk;
        self.last_update_time = Some(now);

        let oldest_report_age_min = self
            .scout_cache
            .iter()
            .map(|r| age_minutes(r.timestamp, now))
            .fold(0.0, f64::max);

        info!(
            agent = %self.agent_id,
            locations = fused.len(),
            edges = edges_updated,
            avg_risk = average_risk,
            trend = ?risk_trend,
            "risk update complete"
        );

        RiskUpdateSummary {
            locations_processed: fused.len(),
            edges_updated,
            average_risk,
            risk_trend,
            risk_change_rate,
            active_reports: self.scout_cache.len(),
            oldest_report_age_min,
            timestamp: now,
        }
    }

    /// Aggregate current edge risk around a point.
    pub fn query_risk_at_location(&self, lat: f64, lon: f64, radius_m: f64) -> LocationRiskSummary {
        let point = GeoPoint::new(lat, lon);
        let nodes = self.index.nodes_within_radius(point, radius_m);

        let mut edges: HashSet<EdgeId> = HashSet::new();
        for (node, _) in &nodes {
            edges.extend(self.graph.incident_edges(*node));
        }

        if edges.is_empty() {
            return LocationRiskSummary {
                status: "no_nodes".into(),
                avg_risk: 0.0,
                max_risk: 0.0,
                risk_level: RiskLevel::Minimal,
                edge_count: 0,
                high_risk_edges: 0,
                impassable_edges: 0,
                lat,
                lon,
                radius_m,
            };
        }

        let mut total = 0.0;
        let mut max_risk: f64 = 0.0;
        let mut high = 0;
        let mut impassable = 0;
        let mut count = 0;
        for (u, v, key) in &edges {
            let Some(view) = self.graph.edge_view(*u, *v, *key) else { continue };
            total += view.risk;
            max_risk = max_risk.max(view.risk);
            if view.risk >= 0.7 {
                high += 1;
            }
            if view.risk >= self.config.routing.critical_risk_threshold {
                impassable += 1;
            }
            count += 1;
        }
        let avg_risk = if count > 0 { total / count as f64 } else { 0.0 };

        LocationRiskSummary {
            status: "ok".into(),
            avg_risk,
            max_risk,
            risk_level: RiskLevel::from_avg(avg_risk),
            edge_count: count,
            high_risk_edges: high,
            impassable_edges: impassable,
            lat,
            lon,
            radius_m,
        }
    }

    /// Distance helper exposed for diagnostics.
    pub fn distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
        haversine_m(a, b)
    }

    fn reply(&self, request: &AclMessage, body: MessageBody) {
        let reply = AclMessage::inform_reply(request, self.agent_id.clone(), body);
        if let Err(e) = self.bus.send(reply) {
            warn!(agent = %self.agent_id, error = %e, "failed to send reply");
        }
    }
}

#[async_trait]
impl Agent for HazardFusionAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn step(&mut self) {
        while let Ok(Some(msg)) = self.bus.try_receive(&self.agent_id) {
            match (msg.performative, msg.body.clone()) {
                (Performative::Inform, MessageBody::FloodDataBatch { data }) => {
                    self.ingest_flood_batch(data);
                }
                (Performative::Inform, MessageBody::ScoutReportBatch { reports, .. }) => {
                    self.ingest_scout_batch(reports);
                }
                (Performative::Request, MessageBody::ProcessAndUpdate) => {
                    let summary = self.process_and_update();
                    self.reply(&msg, MessageBody::RiskUpdateResult(summary));
                }
                (Performative::Request, MessageBody::QueryRiskAtLocation { lat, lon, radius_m }) => {
                    let summary = self.query_risk_at_location(lat, lon, radius_m);
                    self.reply(&msg, MessageBody::LocationRiskResult(summary));
                }
                (performative, body) => {
                    warn!(
                        agent = %self.agent_id,
                        %performative,
                        tag = body.tag(),
                        from = %msg.sender,
                        "unhandled message"
                    );
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults;
    use crate::environment::Node;
    use chrono::Duration;

    fn test_graph() -> Arc<RoadGraph> {
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
        ];
        Arc::new(RoadGraph::from_parts(nodes, edges))
    }

    fn agent() -> HazardFusionAgent {
        let config = Arc::new(SystemConfig::default());
        let bus = Arc::new(MessageBus::new(&config.runtime));
        bus.register("hazard_agent_001").unwrap();
        let graph = test_graph();
        let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));
        HazardFusionAgent::new("hazard_agent_001", bus, config, graph, index, None)
    }

    fn depth_obs(location: &str, depth: f64) -> (String, FloodObservation) {
        (
            location.to_string(),
            FloodObservation::FloodDepth {
                location: location.to_string(),
                flood_depth_m: depth,
                timestamp: Utc::now(),
                source: "test".into(),
            },
        )
    }

    fn scout_report(location: &str, severity: f64, confidence: f64) -> ScoutReport {
        ScoutReport {
            location: location.to_string(),
            coordinates: None,
            severity,
            confidence,
            report_type: ReportType::Flood,
            passable: None,
            visual_evidence: false,
            visual: None,
            text: format!("report about {location}"),
            source: "test".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn decay_composes_multiplicatively() {
        let rate = 0.1;
        let step = 5.0;
        let once = apply_time_decay(0.8, step, rate);
        let twice = apply_time_decay(once, step, rate);
        let direct = apply_time_decay(0.8, 2.0 * step, rate);
        assert!((twice - direct).abs() < 1e-12);
    }

    #[test]
    fn depth_to_risk_piecewise() {
        assert!((depth_to_risk(0.2) - 0.2).abs() < 1e-9);
        assert!((depth_to_risk(0.5) - 0.5).abs() < 1e-9);
        assert!((depth_to_risk(0.8) - 0.7).abs() < 1e-9);
        assert!((depth_to_risk(1.5) - 0.9).abs() < 1e-9);
        assert!((depth_to_risk(3.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flood_inform_fusion_produces_positive_average() {
        // Two sources: an official depth reading plus a scout report.
        let mut hazard = agent();
        hazard.ingest_flood_batch([depth_obs("Marikina River", 2.5)].into_iter().collect());
        hazard.ingest_scout_batch(vec![scout_report("Marcos Highway", 0.85, 0.9)]);

        let summary = hazard.process_and_update();
        assert_eq!(summary.locations_processed, 2);
        assert!(summary.average_risk > 0.0);
        assert!(summary.edges_updated > 0);
        assert_eq!(summary.active_reports, 1);
    }

    #[test]
    fn invalid_entries_rejected() {
        let mut hazard = agent();
        let accepted =
            hazard.ingest_flood_batch([depth_obs("Somewhere", 99.0)].into_iter().collect());
        assert_eq!(accepted, 0);

        let accepted = hazard.ingest_scout_batch(vec![scout_report("X", 1.4, 0.9)]);
        assert_eq!(accepted, 0);
    }

    #[test]
    fn duplicate_scout_reports_deduped() {
        let mut hazard = agent();
        let report = scout_report("Nangka", 0.5, 0.8);
        assert_eq!(hazard.ingest_scout_batch(vec![report.clone()]), 1);
        assert_eq!(hazard.ingest_scout_batch(vec![report]), 0);
    }

    #[test]
    fn expiry_sweep_removes_stale_entries() {
        let mut hazard = agent();
        let mut old_report = scout_report("Nangka", 0.5, 0.8);
        old_report.timestamp = Utc::now() - Duration::minutes(60);
        hazard.ingest_scout_batch(vec![old_report]);

        let (expired_scouts, _) = hazard.clean_expired(Utc::now());
        assert_eq!(expired_scouts, 1);
        assert!(hazard.scout_cache.is_empty());
    }

    #[test]
    fn spatial_propagation_hits_nearby_edges() {
        let mut hazard = agent();
        let mut report = scout_report("near node 1", 0.9, 1.0);
        report.coordinates = Some(GeoPoint::new(14.6500, 121.1000));
        hazard.ingest_scout_batch(vec![report]);

        hazard.process_and_update();

        // Edges incident to node 1 get severity * confidence
        let view = hazard.graph.edge_view(1, 2, 0).unwrap();
        assert!(view.risk > 0.8, "risk was {}", view.risk);
        // The far edge (3 -> 4) only receives distance-decayed risk
        let far = hazard.graph.edge_view(3, 4, 0).unwrap();
        assert!(far.risk < view.risk);
    }

    #[test]
    fn visual_override_replaces_value() {
        let mut hazard = agent();
        let mut report = scout_report("flooded crossing", 0.8, 0.8);
        report.coordinates = Some(GeoPoint::new(14.6500, 121.1000));
        report.visual_evidence = true;
        // Low confidence-weighted product (0.64) but override uses severity
        hazard.ingest_scout_batch(vec![report]);

        hazard.process_and_update();
        let view = hazard.graph.edge_view(1, 2, 0).unwrap();
        assert!((view.risk - 0.8).abs() < 1e-9, "override should set exactly 0.8, got {}", view.risk);
    }

    #[test]
    fn risk_decays_between_updates() {
        let hazard = agent();
        hazard.graph.update_edge_risk(1, 2, 0, 0.8).unwrap();

        // Evaluate the decay as if 10 minutes had passed since the stamp
        let future = Utc::now() + Duration::minutes(10);
        let scores = hazard.decayed_edge_risk(future);
        let decayed = scores.get(&(1, 2, 0)).copied().unwrap_or(0.0);

        let expected = apply_time_decay(0.8, 10.0, hazard.config.hazard.spatial_decay_rate);
        assert!(decayed < 0.8);
        assert!((decayed - expected).abs() < 0.01);
    }

    #[test]
    fn query_risk_classifies_levels() {
        let hazard = agent();
        hazard.graph.update_edge_risk(1, 2, 0, 0.95).unwrap();
        hazard.graph.update_edge_risk(2, 3, 0, 0.75).unwrap();

        let summary = hazard.query_risk_at_location(14.6505, 121.1005, 500.0);
        assert_eq!(summary.status, "ok");
        assert!(summary.max_risk >= 0.95);
        assert_eq!(summary.impassable_edges, 1);
        assert!(summary.high_risk_edges >= 2);
        assert!(summary.edge_count >= 2);
    }

    #[test]
    fn query_far_from_graph_returns_no_nodes() {
        let hazard = agent();
        let summary = hazard.query_risk_at_location(15.5, 122.0, 500.0);
        assert_eq!(summary.status, "no_nodes");
        assert_eq!(summary.risk_level, RiskLevel::Minimal);
    }

    #[test]
    fn scenario_validation() {
        let mut hazard = agent();
        assert!(hazard.set_flood_scenario("rr03", 12).is_ok());
        assert!(hazard.set_flood_scenario("rr09", 1).is_err());
        assert!(hazard.set_flood_scenario("rr01", 19).is_err());
    }

    struct ConstantRaster(f64);
    impl FloodRaster for ConstantRaster {
        fn depth_at(&self, _lon: f64, _lat: f64, _rp: &str, _ts: u8) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn raster_depth_drives_edge_risk() {
        let config = Arc::new(SystemConfig::default());
        let bus = Arc::new(MessageBus::new(&config.runtime));
        bus.register("hazard_agent_001").unwrap();
        let graph = test_graph();
        let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));
        let mut hazard = HazardFusionAgent::new(
            "hazard_agent_001",
            bus,
            config,
            graph,
            index,
            Some(Arc::new(ConstantRaster(0.5))),
        );

        hazard.process_and_update();
        // depth 0.5 m -> piecewise risk 0.5, scaled by flood_depth weight 0.5
        let view = hazard.graph.edge_view(1, 2, 0).unwrap();
        assert!((view.risk - 0.25).abs() < 1e-9, "got {}", view.risk);
    }

    #[tokio::test]
    async fn request_reply_over_bus() {
        let config = Arc::new(SystemConfig::default());
        let bus = Arc::new(MessageBus::new(&config.runtime));
        bus.register("hazard_agent_001").unwrap();
        bus.register("orchestrator_main").unwrap();
        let graph = test_graph();
        let index = Arc::new(SpatialIndex::build(&graph, defaults::GRID_CELL_DEGREES));
        let mut hazard = HazardFusionAgent::new(
            "hazard_agent_001",
            Arc::clone(&bus),
            config,
            graph,
            index,
            None,
        );

        let request = AclMessage::request(
            "orchestrator_main",
            "hazard_agent_001",
            MessageBody::ProcessAndUpdate,
            Some("m42".into()),
        );
        bus.send(request).unwrap();

        hazard.step().await;

        let reply = bus.try_receive("orchestrator_main").unwrap().unwrap();
        assert_eq!(reply.conversation_id.as_deref(), Some("m42"));
        assert!(matches!(reply.body, MessageBody::RiskUpdateResult(_)));
    }
}
