//! Route requests, responses, and path metrics

use serde::{Deserialize, Serialize};

use super::observation::GeoPoint;

/// Routing mode selecting the risk penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    Safest,
    #[default]
    Balanced,
    Fastest,
}

impl std::fmt::Display for RouteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Safest => "safest",
            Self::Balanced => "balanced",
            Self::Fastest => "fastest",
        };
        f.write_str(s)
    }
}

/// Caller routing preferences. `mode` wins when present; the legacy boolean
/// flags are still accepted from older clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePreferences {
    pub mode: Option<RouteMode>,
    pub avoid_floods: bool,
    pub fastest: bool,
}

impl RoutePreferences {
    pub fn resolve_mode(&self) -> RouteMode {
        if let Some(mode) = self.mode {
            return mode;
        }
        if self.avoid_floods {
            RouteMode::Safest
        } else if self.fastest {
            RouteMode::Fastest
        } else {
            RouteMode::Balanced
        }
    }

    pub fn safest() -> Self {
        Self { mode: Some(RouteMode::Safest), ..Self::default() }
    }
}

/// Outcome category of a routing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Success,
    /// No path even ignoring risk (fastest mode) — everything is blocked
    Impassable,
    /// No path under the current risk penalty (safest/balanced)
    NoSafeRoute,
    Error,
}

/// Metrics over the exact edges A* selected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathMetrics {
    /// Total length in meters
    pub total_distance: f64,
    /// Distance-weighted average risk: sum(risk * length) / sum(length)
    pub average_risk: f64,
    pub max_risk: f64,
    /// Estimated travel time in minutes
    pub estimated_time: f64,
    pub num_segments: usize,
}

/// Full route reply surfaced to callers and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
    pub status: RouteStatus,
    /// Node coordinates along the path (empty when no route)
    pub path: Vec<GeoPoint>,
    pub distance: f64,
    pub estimated_time: f64,
    pub risk_level: f64,
    pub max_risk: f64,
    pub num_segments: usize,
    pub mode: RouteMode,
    pub warnings: Vec<String>,
}

impl RouteResponse {
    /// A no-route reply carrying the mode-appropriate status and warning.
    pub fn not_found(mode: RouteMode) -> Self {
        let (status, warning) = if mode == RouteMode::Fastest {
            (
                RouteStatus::Impassable,
                "IMPASSABLE: No route found. All paths contain critically flooded or \
                 impassable roads. Consider waiting for conditions to improve or using \
                 evacuation assistance."
                    .to_string(),
            )
        } else {
            (
                RouteStatus::NoSafeRoute,
                "No safe route found. Try 'fastest' mode to see if any path exists, or \
                 consider evacuation to a nearby shelter."
                    .to_string(),
            )
        };
        Self {
            status,
            path: Vec::new(),
            distance: 0.0,
            estimated_time: 0.0,
            risk_level: 1.0,
            max_risk: 1.0,
            num_segments: 0,
            mode,
            warnings: vec![warning],
        }
    }
}

/// Evacuation center metadata loaded at startup. Capacity is informational
/// only; it is never debited when a mission completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvacuationCenter {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: u32,
    #[serde(rename = "type")]
    pub center_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_resolution_precedence() {
        let prefs = RoutePreferences { mode: Some(RouteMode::Fastest), avoid_floods: true, fastest: false };
        assert_eq!(prefs.resolve_mode(), RouteMode::Fastest);

        let prefs = RoutePreferences { mode: None, avoid_floods: true, fastest: false };
        assert_eq!(prefs.resolve_mode(), RouteMode::Safest);

        let prefs = RoutePreferences { mode: None, avoid_floods: false, fastest: true };
        assert_eq!(prefs.resolve_mode(), RouteMode::Fastest);

        assert_eq!(RoutePreferences::default().resolve_mode(), RouteMode::Balanced);
    }

    #[test]
    fn not_found_status_by_mode() {
        assert_eq!(RouteResponse::not_found(RouteMode::Fastest).status, RouteStatus::Impassable);
        assert_eq!(RouteResponse::not_found(RouteMode::Balanced).status, RouteStatus::NoSafeRoute);
        assert_eq!(RouteResponse::not_found(RouteMode::Safest).status, RouteStatus::NoSafeRoute);
    }
}
