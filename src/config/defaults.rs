//! Built-in configuration defaults
//!
//! Constants shared between `SystemConfig::default()` and tests so the two
//! can never drift apart. Values mirror the calibration the fusion and
//! routing pipelines were tuned against.

/// Scheduler tick period in seconds (1 Hz).
pub const TICK_INTERVAL_SECONDS: f64 = 1.0;

/// Collector pull period in seconds.
pub const FLOOD_UPDATE_INTERVAL_SEC: u64 = 300;

/// Consecutive empty collector cycles before a CRITICAL alert.
pub const COLLECTOR_FAILURE_ALERT_THRESHOLD: u32 = 3;

/// Scout report time-to-live in minutes.
pub const SCOUT_TTL_MINUTES: f64 = 45.0;

/// Official flood data time-to-live in minutes.
pub const FLOOD_TTL_MINUTES: f64 = 90.0;

/// Per-minute exponential decay applied to spatial edge risk.
pub const SPATIAL_DECAY_RATE: f64 = 0.08;

/// Fast scout decay (rain flooding drains quickly), per minute.
pub const SCOUT_DECAY_RATE_FAST: f64 = 0.10;

/// Slow scout decay (river/dam flooding recedes slowly), per minute.
pub const SCOUT_DECAY_RATE_SLOW: f64 = 0.03;

/// Risk below this value is cleared outright.
pub const MIN_RISK_THRESHOLD: f64 = 0.01;

/// Radius for scout spatial propagation, in meters.
pub const RISK_RADIUS_M: f64 = 500.0;

/// Edge risk at or above this is impassable regardless of routing mode.
pub const CRITICAL_RISK_THRESHOLD: f64 = 0.9;

/// Maximum snap distance from a query point to a graph node, in meters.
pub const MAX_NODE_DISTANCE_M: f64 = 500.0;

/// Minimum wall-clock gap between risk snapshots, in seconds.
pub const SNAPSHOT_MIN_INTERVAL_SEC: u64 = 600;

/// LLM health-check cache TTL in seconds.
pub const LLM_HEALTH_TTL_SEC: u64 = 60;

/// LLM response cache TTL in seconds.
pub const LLM_CACHE_TTL_SEC: u64 = 300;

/// LLM response cache capacity.
pub const LLM_CACHE_MAX_ENTRIES: usize = 100;

/// Advisory dedup ring capacity (MD5 hashes of seen advisory text).
pub const ADVISORY_HASH_RING_CAPACITY: usize = 5000;

/// Spatial index cell size in degrees (~1.1 km at the equator).
pub const GRID_CELL_DEGREES: f64 = 0.01;

/// City-center fallback coordinate used when the LLM omits an endpoint.
pub const CITY_CENTER: (f64, f64) = (14.6507, 121.1029);
