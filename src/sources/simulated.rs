//! Simulated observation generator
//!
//! Produces a plausible batch of observations when every real source comes
//! back empty and the simulated fallback is enabled. Everything generated
//! here is stamped `source = "simulated"` so downstream consumers can see
//! they are running on synthetic data.

use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;

use crate::types::{AlertStatus, FloodObservation, RainfallIntensity};

const STATIONS: &[&str] = &["Sto Nino", "Nangka", "Tumana"];

/// Generate a simulated batch keyed by location name.
pub fn generate_batch() -> HashMap<String, FloodObservation> {
    let mut rng = rand::thread_rng();
    let now = Utc::now();
    let mut batch = HashMap::new();

    for station in STATIONS {
        let water_level: f64 = rng.gen_range(0.2..2.2);
        let (status, risk_score) = if water_level >= 2.0 {
            (AlertStatus::Critical, 1.0)
        } else if water_level >= 1.0 {
            (AlertStatus::Alarm, 0.8)
        } else if water_level >= 0.5 {
            (AlertStatus::Alert, 0.5)
        } else {
            (AlertStatus::Normal, 0.2)
        };
        batch.insert(
            (*station).to_string(),
            FloodObservation::RiverStation {
                station_name: (*station).to_string(),
                water_level_m: Some((water_level * 100.0).round() / 100.0),
                alert_level_m: Some(0.5),
                alarm_level_m: Some(1.0),
                critical_level_m: Some(2.0),
                status,
                risk_score,
                timestamp: now,
                source: "simulated".into(),
            },
        );
    }

    let rate = rng.gen_range(0.0..20.0_f64);
    let intensity = if rate <= 0.0 {
        RainfallIntensity::None
    } else if rate <= 2.5 {
        RainfallIntensity::Light
    } else if rate <= 7.5 {
        RainfallIntensity::Moderate
    } else if rate <= 15.0 {
        RainfallIntensity::Heavy
    } else {
        RainfallIntensity::Intense
    };
    batch.insert(
        "Marikina_weather".into(),
        FloodObservation::Rainfall {
            location: "Marikina".into(),
            rate_mm_hr: (rate * 10.0).round() / 10.0,
            accumulated_24h_mm: (rate * 24.0 * 10.0).round() / 10.0,
            forecast_6h_mm: (rate * 6.0 * 10.0).round() / 10.0,
            intensity,
            timestamp: now,
            source: "simulated".into(),
        },
    );

    batch
}
