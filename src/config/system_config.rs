//! System Configuration — all runtime tunables as operator-editable TOML
//!
//! Each struct implements `Default` with values matching the calibration the
//! pipelines were tuned against, so behavior is unchanged when no config file
//! is present. `deny_unknown_fields` on every section means a typo'd key in
//! an explicit config file is a startup error, not a silent default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a deployment.
///
/// Load with [`SystemConfig::load`], which searches:
/// 1. `$AGOS_CONFIG` env var
/// 2. `./agos_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    /// Scheduler tick rate and runtime knobs
    pub runtime: RuntimeConfig,
    /// Flood collector intervals and source thresholds
    pub collector: CollectorConfig,
    /// Hazard fusion weights, decay rates, TTLs
    pub hazard: HazardConfig,
    /// Risk-aware routing penalties and search limits
    pub routing: RoutingConfig,
    /// Orchestrator mission timeouts and retention
    pub orchestrator: OrchestratorConfig,
    /// Evacuation manager behavior
    pub evacuation: EvacuationConfig,
    /// LLM facade endpoint and models
    pub llm: LlmConfig,
    /// Coordinate validation bounds
    pub bounds: BoundsConfig,
    /// HTTP server bind address
    pub server: ServerConfig,
    /// On-disk file locations
    pub paths: PathsConfig,
    /// Outbound external source endpoints
    pub sources: SourcesConfig,
}

impl SystemConfig {
    /// Load configuration using the standard search order.
    ///
    /// A file named by `AGOS_CONFIG` that fails to load is fatal; a missing
    /// `./agos_config.toml` silently falls through to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("AGOS_CONFIG") {
            let p = PathBuf::from(&path);
            if !p.exists() {
                return Err(ConfigError::Missing(p));
            }
            let config = Self::load_from_file(&p)?;
            info!(path = %p.display(), "Loaded system config from AGOS_CONFIG");
            return Ok(config);
        }

        let local = PathBuf::from("agos_config.toml");
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!("Loaded system config from ./agos_config.toml");
            return Ok(config);
        }

        info!("No agos_config.toml found — using built-in defaults");
        Ok(Self::default())
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.hazard.risk_weights;
        let total = w.flood_depth + w.crowdsourced + w.historical;
        if (total - 1.0).abs() > 1e-6 {
            return Err(ConfigError::Invalid(format!(
                "hazard.risk_weights must sum to 1.0 (got {total:.4})"
            )));
        }
        let p = &self.routing.risk_penalties;
        if p.safest < p.balanced || p.balanced < p.fastest {
            return Err(ConfigError::Invalid(
                "routing.risk_penalties must satisfy safest >= balanced >= fastest".into(),
            ));
        }
        if p.fastest < 0.0 {
            return Err(ConfigError::Invalid(
                "routing.risk_penalties.fastest must be non-negative".into(),
            ));
        }
        for (name, v) in [
            ("routing.critical_risk_threshold", self.routing.critical_risk_threshold),
            ("hazard.visual_override.risk_threshold", self.hazard.visual_override.risk_threshold),
            (
                "hazard.visual_override.confidence_threshold",
                self.hazard.visual_override.confidence_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{name} must be in [0, 1] (got {v})")));
            }
        }
        let r = &self.collector.rainfall_thresholds_mm;
        if !(r.light <= r.moderate && r.moderate <= r.heavy && r.heavy <= r.extreme) {
            return Err(ConfigError::Invalid(
                "collector.rainfall_thresholds_mm must be ordered light <= moderate <= heavy <= extreme"
                    .into(),
            ));
        }
        if self.bounds.min_lat >= self.bounds.max_lat || self.bounds.min_lon >= self.bounds.max_lon {
            return Err(ConfigError::Invalid("bounds: min must be below max".into()));
        }
        if self.runtime.tick_interval_seconds <= 0.0 {
            return Err(ConfigError::Invalid("runtime.tick_interval_seconds must be positive".into()));
        }
        if self.orchestrator.max_concurrent_missions == 0
            || self.orchestrator.max_completed_history == 0
        {
            return Err(ConfigError::Invalid(
                "orchestrator mission limits must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Check a coordinate pair against the configured deployment bounds.
    pub fn in_bounds(&self, lat: f64, lon: f64) -> bool {
        (self.bounds.min_lat..=self.bounds.max_lat).contains(&lat)
            && (self.bounds.min_lon..=self.bounds.max_lon).contains(&lon)
    }
}

/// Configuration loading errors. Fatal at startup (exit code 1).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to read config {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("missing credential: {0}")]
    MissingCredential(String),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Scheduler tick period in seconds
    pub tick_interval_seconds: f64,
    /// Inbox depth above which the bus evicts oldest messages
    pub max_inbox_size: usize,
    /// Message TTL in seconds; older queued messages are dropped on receive
    pub message_ttl_seconds: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: defaults::TICK_INTERVAL_SECONDS,
            max_inbox_size: 10_000,
            message_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Seconds between periodic multi-source pulls
    pub flood_update_interval_sec: u64,
    /// Rainfall intensity cut points in mm/hr
    pub rainfall_thresholds_mm: RainfallThresholds,
    /// River gauge fallback thresholds (used when a station reports none)
    pub water_level: LevelThresholds,
    /// Dam deviation-from-NHWL thresholds
    pub dam: LevelThresholds,
    /// Gauge name substrings selecting the stations to monitor
    pub station_keywords: Vec<String>,
    /// Consecutive empty cycles before a CRITICAL alert
    pub failure_alert_threshold: u32,
    /// Generate simulated observations when every source is empty
    pub enable_simulated_fallback: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            flood_update_interval_sec: defaults::FLOOD_UPDATE_INTERVAL_SEC,
            rainfall_thresholds_mm: RainfallThresholds::default(),
            water_level: LevelThresholds { alert: 0.5, alarm: 1.0, critical: 2.0 },
            dam: LevelThresholds { alert: 0.5, alarm: 1.0, critical: 2.0 },
            station_keywords: [
                "sto nino",
                "sto. nino",
                "santo nino",
                "nangka",
                "tumana",
                "montalban",
                "rosario",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            failure_alert_threshold: defaults::COLLECTOR_FAILURE_ALERT_THRESHOLD,
            enable_simulated_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RainfallThresholds {
    pub light: f64,
    pub moderate: f64,
    pub heavy: f64,
    pub extreme: f64,
}

impl Default for RainfallThresholds {
    fn default() -> Self {
        Self { light: 2.5, moderate: 7.5, heavy: 15.0, extreme: 30.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LevelThresholds {
    pub alert: f64,
    pub alarm: f64,
    pub critical: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self { alert: 0.5, alarm: 1.0, critical: 2.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HazardConfig {
    /// Scout report TTL in minutes
    pub scout_ttl_minutes: f64,
    /// Official flood data TTL in minutes
    pub flood_ttl_minutes: f64,
    /// Source fusion weights; must sum to 1
    pub risk_weights: RiskWeights,
    /// Flood depth → risk conversion tuning
    pub depth_to_risk: DepthToRisk,
    /// Fast scout decay (rain flooding), per minute
    pub scout_decay_rate_fast: f64,
    /// Slow scout decay (river/dam flooding), per minute
    pub scout_decay_rate_slow: f64,
    /// Decay applied to existing per-edge risk, per minute
    pub spatial_decay_rate: f64,
    /// Risk below this is cleared from edges
    pub min_risk_threshold: f64,
    /// Scout spatial propagation radius in meters
    pub risk_radius_m: f64,
    /// Visual override gates
    pub visual_override: VisualOverride,
    /// Flood cache capacity (oldest entry evicted when full)
    pub max_flood_cache: usize,
    /// Scout cache capacity
    pub max_scout_cache: usize,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            scout_ttl_minutes: defaults::SCOUT_TTL_MINUTES,
            flood_ttl_minutes: defaults::FLOOD_TTL_MINUTES,
            risk_weights: RiskWeights::default(),
            depth_to_risk: DepthToRisk::default(),
            scout_decay_rate_fast: defaults::SCOUT_DECAY_RATE_FAST,
            scout_decay_rate_slow: defaults::SCOUT_DECAY_RATE_SLOW,
            spatial_decay_rate: defaults::SPATIAL_DECAY_RATE,
            min_risk_threshold: defaults::MIN_RISK_THRESHOLD,
            risk_radius_m: defaults::RISK_RADIUS_M,
            visual_override: VisualOverride::default(),
            max_flood_cache: 100,
            max_scout_cache: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskWeights {
    pub flood_depth: f64,
    pub crowdsourced: f64,
    pub historical: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self { flood_depth: 0.5, crowdsourced: 0.3, historical: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DepthToRisk {
    /// "piecewise" (default) or "sigmoid"
    pub method: String,
    pub sigmoid_steepness: f64,
    pub sigmoid_inflection: f64,
    pub max_depth_m: f64,
}

impl Default for DepthToRisk {
    fn default() -> Self {
        Self {
            method: "piecewise".into(),
            sigmoid_steepness: 8.0,
            sigmoid_inflection: 0.3,
            max_depth_m: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisualOverride {
    pub risk_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for VisualOverride {
    fn default() -> Self {
        Self { risk_threshold: 0.7, confidence_threshold: 0.75 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// Per-mode risk penalties (length-proportional multiplier)
    pub risk_penalties: RiskPenalties,
    /// Edge risk at or above this blocks the edge in every mode
    pub critical_risk_threshold: f64,
    /// Maximum snap distance to a graph node in meters
    pub max_node_distance_m: f64,
    /// Nominal travel speed used for ETA
    pub base_speed_kmh: f64,
    /// Fractional speed loss at average risk 1.0
    pub speed_reduction_factor: f64,
    /// Routes longer than this get an informational warning, in meters
    pub long_route_threshold_m: f64,
    /// Nearest-node cache TTL in seconds
    pub node_cache_ttl_seconds: u64,
    /// Nearest-node cache capacity
    pub node_cache_max_entries: usize,
    /// Evacuation candidates evaluated per request
    pub max_centers_to_evaluate: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            risk_penalties: RiskPenalties::default(),
            critical_risk_threshold: defaults::CRITICAL_RISK_THRESHOLD,
            max_node_distance_m: defaults::MAX_NODE_DISTANCE_M,
            base_speed_kmh: 30.0,
            speed_reduction_factor: 0.5,
            long_route_threshold_m: 10_000.0,
            node_cache_ttl_seconds: 3600,
            node_cache_max_entries: 10_000,
            max_centers_to_evaluate: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskPenalties {
    pub safest: f64,
    pub balanced: f64,
    pub fastest: f64,
}

impl Default for RiskPenalties {
    fn default() -> Self {
        Self { safest: 100.0, balanced: 3.0, fastest: 0.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorConfig {
    /// Per-mission-type timeouts in seconds
    pub mission_timeouts: MissionTimeouts,
    pub max_concurrent_missions: usize,
    pub max_completed_history: usize,
    /// Chat history cap, in user/assistant turns
    pub max_chat_turns: usize,
    /// Named-location fallback table: name -> [lat, lon]
    pub barangay_coords: HashMap<String, [f64; 2]>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let barangay_coords = [
            ("tumana", [14.6608, 121.1004]),
            ("malanday", [14.6653, 121.1023]),
            ("concepcion uno", [14.6416, 121.0978]),
            ("concepcion dos", [14.6440, 121.0958]),
            ("nangka", [14.6568, 121.1107]),
            ("sto. nino", [14.6395, 121.0908]),
            ("santo nino", [14.6395, 121.0908]),
            ("industrial valley", [14.6332, 121.0959]),
            ("jesus dela pena", [14.6283, 121.0985]),
            ("marikina heights", [14.6350, 121.1080]),
            ("parang", [14.6475, 121.0955]),
            ("kalumpang", [14.6540, 121.0970]),
            ("shoe ave", [14.6380, 121.1010]),
            ("sta. elena", [14.6490, 121.1060]),
            ("santa elena", [14.6490, 121.1060]),
            ("barangka", [14.6445, 121.1020]),
            ("tanong", [14.6520, 121.0990]),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            mission_timeouts: MissionTimeouts::default(),
            max_concurrent_missions: 10,
            max_completed_history: 100,
            max_chat_turns: 20,
            barangay_coords,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MissionTimeouts {
    pub default: f64,
    pub assess_risk: f64,
    pub coordinated_evacuation: f64,
    pub route_calculation: f64,
    pub cascade_risk_update: f64,
}

impl Default for MissionTimeouts {
    fn default() -> Self {
        Self {
            default: 60.0,
            assess_risk: 120.0,
            coordinated_evacuation: 60.0,
            route_calculation: 30.0,
            cascade_risk_update: 120.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvacuationConfig {
    /// Force safest routing mode for distress calls
    pub always_use_safest_mode: bool,
    /// Bounded distress/feedback history depth
    pub max_history: usize,
    /// Confidence attached to feedback reports by type
    pub feedback_confidence: FeedbackConfidence,
}

impl Default for EvacuationConfig {
    fn default() -> Self {
        Self {
            always_use_safest_mode: true,
            max_history: 1000,
            feedback_confidence: FeedbackConfidence::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedbackConfidence {
    pub blocked: f64,
    pub blocked_with_photo: f64,
    pub flooded: f64,
    pub clear: f64,
    pub traffic: f64,
}

impl Default for FeedbackConfidence {
    fn default() -> Self {
        Self { blocked: 0.8, blocked_with_photo: 0.9, flooded: 0.7, clear: 0.6, traffic: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub enabled: bool,
    /// Ollama-compatible API base URL
    pub base_url: String,
    pub text_model: String,
    pub vision_model: String,
    pub timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    /// Use the filename-pattern analyzer when the vision model is down
    pub vision_fallback: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:11434".into(),
            text_model: "llama3.2:latest".into(),
            vision_model: "moondream:latest".into(),
            timeout_seconds: 30,
            cache_ttl_seconds: defaults::LLM_CACHE_TTL_SEC,
            cache_max_entries: defaults::LLM_CACHE_MAX_ENTRIES,
            vision_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoundsConfig {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self { min_lat: 4.0, max_lat: 21.0, min_lon: 116.0, max_lon: 127.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: "0.0.0.0:8000".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Base road graph file (JSON)
    pub graph_file: PathBuf,
    /// Risk snapshot file, written atomically
    pub snapshot_file: PathBuf,
    /// Evacuation centers CSV (name, latitude, longitude, capacity, type)
    pub evacuation_centers_csv: PathBuf,
    /// Geocoder locations CSV
    pub geocoder_csv: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            graph_file: "data/road_graph.json".into(),
            snapshot_file: "data/risk_snapshot.json".into(),
            evacuation_centers_csv: "data/evacuation_centers.csv".into(),
            geocoder_csv: "data/locations.csv".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourcesConfig {
    /// River gauge JSON endpoint
    pub gauges_url: Option<String>,
    /// Dam level JSON endpoint
    pub dams_url: Option<String>,
    /// Weather forecast JSON endpoint
    pub weather_url: Option<String>,
    /// Advisory HTML page
    pub advisory_url: Option<String>,
    /// Advisory RSS 2.0 feed
    pub advisory_rss_url: Option<String>,
    /// Crowdsourced social feed JSON endpoint
    pub social_url: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_sec: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            gauges_url: None,
            dams_url: None,
            weather_url: None,
            advisory_url: None,
            advisory_rss_url: None,
            social_url: None,
            request_timeout_sec: 10,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        SystemConfig::default().validate().unwrap();
    }

    #[test]
    fn risk_weights_must_sum_to_one() {
        let mut config = SystemConfig::default();
        config.hazard.risk_weights.flood_depth = 0.9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn penalty_ordering_enforced() {
        let mut config = SystemConfig::default();
        config.routing.risk_penalties.balanced = 500.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_rejected() {
        let toml = "[runtime]\ntick_interval_seconds = 1.0\nbogus_key = 5\n";
        let parsed: Result<SystemConfig, _> = toml::from_str(toml);
        assert!(parsed.is_err());
    }

    #[test]
    fn bounds_check() {
        let config = SystemConfig::default();
        assert!(config.in_bounds(14.65, 121.10));
        assert!(!config.in_bounds(48.8, 2.35));
    }

    #[test]
    fn rainfall_thresholds_ordering() {
        let mut config = SystemConfig::default();
        config.collector.rainfall_thresholds_mm.moderate = 1.0;
        assert!(config.validate().is_err());
    }
}
