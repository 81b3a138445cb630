//! Observation records — normalized environmental inputs
//!
//! Every record carries its source timestamp so downstream decay functions
//! can score staleness. Collectors normalize heterogeneous upstream payloads
//! into these tagged variants before anything crosses the message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Gauge / dam alert classification, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Normal,
    Watch,
    Alert,
    Alarm,
    Critical,
}

impl AlertStatus {
    /// Alert or worse — used to pick the slow scout decay rate.
    pub fn is_elevated(self) -> bool {
        self >= Self::Alert
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Normal => "normal",
            Self::Watch => "watch",
            Self::Alert => "alert",
            Self::Alarm => "alarm",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Rainfall intensity category from mm/hr cut points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RainfallIntensity {
    None,
    Light,
    Moderate,
    Heavy,
    Intense,
    Torrential,
}

/// PAGASA-style rainfall warning color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningColor {
    None,
    Blue,
    Yellow,
    Orange,
    Red,
}

/// Structured advisory extracted from bulletin text (LLM or rule-based).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedAdvisory {
    /// rainfall / flood / dam / typhoon / general
    pub advisory_type: String,
    pub warning_level: WarningColor,
    pub affected_areas: Vec<String>,
    pub expected_rainfall_mm: Option<f64>,
    pub key_points: Vec<String>,
    /// "llm" or "rule_based"
    pub parsing_method: String,
    pub source_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// A single normalized observation from an official source.
///
/// Keyed by location name inside a `flood_data_batch` INFORM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FloodObservation {
    RiverStation {
        station_name: String,
        water_level_m: Option<f64>,
        alert_level_m: Option<f64>,
        alarm_level_m: Option<f64>,
        critical_level_m: Option<f64>,
        status: AlertStatus,
        risk_score: f64,
        timestamp: DateTime<Utc>,
        source: String,
    },
    Dam {
        dam_name: String,
        reservoir_water_level_m: Option<f64>,
        normal_high_water_level_m: Option<f64>,
        deviation_from_nhwl_m: Option<f64>,
        status: AlertStatus,
        risk_score: f64,
        timestamp: DateTime<Utc>,
        source: String,
    },
    Rainfall {
        location: String,
        rate_mm_hr: f64,
        accumulated_24h_mm: f64,
        forecast_6h_mm: f64,
        intensity: RainfallIntensity,
        timestamp: DateTime<Utc>,
        source: String,
    },
    Advisory {
        advisory: ParsedAdvisory,
        timestamp: DateTime<Utc>,
        source: String,
    },
    /// Direct depth measurement (simulated generator or manual injection).
    FloodDepth {
        location: String,
        flood_depth_m: f64,
        timestamp: DateTime<Utc>,
        source: String,
    },
}

impl FloodObservation {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::RiverStation { timestamp, .. }
            | Self::Dam { timestamp, .. }
            | Self::Rainfall { timestamp, .. }
            | Self::Advisory { timestamp, .. }
            | Self::FloodDepth { timestamp, .. } => *timestamp,
        }
    }

    /// Source-derived risk contribution in [0, 1].
    pub fn risk_score(&self) -> f64 {
        match self {
            Self::RiverStation { risk_score, .. } | Self::Dam { risk_score, .. } => *risk_score,
            Self::Rainfall { intensity, .. } => match intensity {
                RainfallIntensity::None => 0.0,
                RainfallIntensity::Light => 0.1,
                RainfallIntensity::Moderate => 0.25,
                RainfallIntensity::Heavy => 0.5,
                RainfallIntensity::Intense => 0.75,
                RainfallIntensity::Torrential => 1.0,
            },
            Self::Advisory { advisory, .. } => match advisory.warning_level {
                WarningColor::None => 0.0,
                WarningColor::Blue => 0.2,
                WarningColor::Yellow => 0.4,
                WarningColor::Orange => 0.7,
                WarningColor::Red => 1.0,
            },
            Self::FloodDepth { flood_depth_m, .. } => (flood_depth_m / 2.0).min(1.0),
        }
    }

    pub fn status(&self) -> AlertStatus {
        match self {
            Self::RiverStation { status, .. } | Self::Dam { status, .. } => *status,
            _ => AlertStatus::Normal,
        }
    }

    /// Reported flood depth in meters, if this observation carries one.
    pub fn flood_depth_m(&self) -> Option<f64> {
        match self {
            Self::FloodDepth { flood_depth_m, .. } => Some(*flood_depth_m),
            _ => None,
        }
    }

    /// Water level relative to alert threshold, if both are known.
    pub fn near_alert_level(&self) -> bool {
        if let Self::RiverStation { water_level_m: Some(wl), alert_level_m: Some(alert), .. } = self
        {
            return *wl >= alert * 0.9;
        }
        false
    }

    /// Structural validation before a batch entry is admitted to the cache.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::FloodDepth { flood_depth_m, .. } => (0.0..=10.0).contains(flood_depth_m),
            Self::RiverStation { risk_score, .. } | Self::Dam { risk_score, .. } => {
                (0.0..=1.0).contains(risk_score)
            }
            Self::Rainfall { rate_mm_hr, .. } => *rate_mm_hr >= 0.0,
            Self::Advisory { .. } => true,
        }
    }
}

/// Crowdsourced report category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Flood,
    Clear,
    Blocked,
    Flooded,
    Traffic,
    Observation,
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Flood => "flood",
            Self::Clear => "clear",
            Self::Blocked => "blocked",
            Self::Flooded => "flooded",
            Self::Traffic => "traffic",
            Self::Observation => "observation",
        };
        f.write_str(s)
    }
}

/// Vision-model output attached to a scout report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAnalysis {
    pub estimated_depth_m: Option<f64>,
    pub risk_score: f64,
    pub vehicles_passable: Vec<String>,
    pub visual_indicators: Option<String>,
    pub confidence: f64,
    /// True when produced by the filename-pattern fallback analyzer
    pub simulated: bool,
}

/// Normalized crowdsourced scout report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoutReport {
    pub location: String,
    pub coordinates: Option<GeoPoint>,
    /// Fused severity in [0, 1]
    pub severity: f64,
    /// Reporter confidence in [0, 1]
    pub confidence: f64,
    pub report_type: ReportType,
    pub passable: Option<bool>,
    pub visual_evidence: bool,
    pub visual: Option<VisualAnalysis>,
    /// Raw post text; used with `location` for dedup identity
    pub text: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl ScoutReport {
    /// Structural validation before admission to the scout cache.
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.severity) && (0.0..=1.0).contains(&self.confidence)
    }

    /// Dedup identity: same place, same words.
    pub fn identity(&self) -> (&str, &str) {
        (&self.location, &self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_status_ordering() {
        assert!(AlertStatus::Critical > AlertStatus::Alarm);
        assert!(AlertStatus::Alert.is_elevated());
        assert!(!AlertStatus::Watch.is_elevated());
    }

    #[test]
    fn flood_depth_validation() {
        let obs = FloodObservation::FloodDepth {
            location: "Nangka".into(),
            flood_depth_m: 2.5,
            timestamp: Utc::now(),
            source: "test".into(),
        };
        assert!(obs.is_valid());

        let bad = FloodObservation::FloodDepth {
            location: "Nangka".into(),
            flood_depth_m: 12.0,
            timestamp: Utc::now(),
            source: "test".into(),
        };
        assert!(!bad.is_valid());
    }

    #[test]
    fn scout_report_validation() {
        let mut report = ScoutReport {
            location: "Marcos Highway".into(),
            coordinates: Some(GeoPoint::new(14.63, 121.10)),
            severity: 0.85,
            confidence: 0.9,
            report_type: ReportType::Flood,
            passable: Some(false),
            visual_evidence: false,
            visual: None,
            text: "baha".into(),
            source: "social".into(),
            timestamp: Utc::now(),
        };
        assert!(report.is_valid());
        report.severity = 1.5;
        assert!(!report.is_valid());
    }

    #[test]
    fn near_alert_level_uses_ninety_percent() {
        let obs = FloodObservation::RiverStation {
            station_name: "Nangka".into(),
            water_level_m: Some(0.46),
            alert_level_m: Some(0.5),
            alarm_level_m: None,
            critical_level_m: None,
            status: AlertStatus::Normal,
            risk_score: 0.2,
            timestamp: Utc::now(),
            source: "gauges".into(),
        };
        assert!(obs.near_alert_level());
    }
}
