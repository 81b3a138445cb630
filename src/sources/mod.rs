//! Outbound external source clients
//!
//! Thin HTTP clients for the official and crowdsourced feeds the collector
//! and scout agents pull from. Each returns typed records or a
//! [`SourceError`]; retry/fallback policy lives in the agents, not here.

pub mod advisories;
pub mod dams;
pub mod gauges;
pub mod simulated;
pub mod social;
pub mod weather;

use std::time::Duration;

pub use advisories::AdvisoryClient;
pub use dams::{DamClient, DamRecord};
pub use gauges::{GaugeClient, StationRecord};
pub use social::{SocialClient, SocialPost};
pub use weather::{WeatherClient, WeatherForecast};

/// Data collection errors: transient by policy, absorbed by the agents.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("parse failure: {0}")]
    Parse(String),
}

/// Shared HTTP client with the configured per-request timeout.
pub(crate) fn http_client(timeout_sec: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_sec))
        .build()
        .unwrap_or_default()
}
