//! Domain types shared across agents
//!
//! - Observation records flowing from collectors and scouts into hazard fusion
//! - Mission records driven by the orchestrator's state machines
//! - Route requests, responses, and path metrics

pub mod mission;
pub mod observation;
pub mod route;

pub use mission::{Mission, MissionState, MissionType};
pub use observation::{
    AlertStatus, FloodObservation, GeoPoint, ParsedAdvisory, RainfallIntensity, ReportType,
    ScoutReport, VisualAnalysis, WarningColor,
};
pub use route::{
    EvacuationCenter, PathMetrics, RouteMode, RoutePreferences, RouteResponse, RouteStatus,
};
