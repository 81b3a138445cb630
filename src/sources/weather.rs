//! Weather forecast source client

use serde::Deserialize;
use std::collections::HashMap;

use super::SourceError;

/// `rain` sub-object: keys like "1h" mapping to mm.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RainBlock(pub HashMap<String, f64>);

impl RainBlock {
    pub fn one_hour(&self) -> f64 {
        self.0.get("1h").copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeatherEntry {
    #[serde(default)]
    pub dt: Option<i64>,
    #[serde(default)]
    pub rain: RainBlock,
}

/// Forecast payload: current conditions plus hourly entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WeatherForecast {
    #[serde(default)]
    pub current: WeatherEntry,
    #[serde(default)]
    pub hourly: Vec<WeatherEntry>,
}

impl WeatherForecast {
    /// Current rainfall rate in mm/hr.
    pub fn current_rain_mm(&self) -> f64 {
        self.current.rain.one_hour()
    }

    /// Accumulated rainfall over the next `hours` forecast entries.
    pub fn accumulated_mm(&self, hours: usize) -> f64 {
        self.hourly.iter().take(hours).map(|h| h.rain.one_hour()).sum()
    }
}

pub struct WeatherClient {
    http: reqwest::Client,
    url: String,
}

impl WeatherClient {
    pub fn new(url: String, timeout_sec: u64) -> Self {
        Self { http: super::http_client(timeout_sec), url }
    }

    pub async fn get_forecast(&self, lat: f64, lon: f64) -> Result<WeatherForecast, SourceError> {
        let resp = self
            .http
            .get(&self.url)
            .query(&[("lat", lat.to_string()), ("lon", lon.to_string())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SourceError::BadResponse(format!(
                "weather endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<WeatherForecast>().await.map_err(|e| SourceError::Parse(e.to_string()))
    }
}
