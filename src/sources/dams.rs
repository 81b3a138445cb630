//! Dam level source client

use serde::Deserialize;

use super::SourceError;

/// One dam record: reservoir water level against normal high water level.
#[derive(Debug, Clone, Deserialize)]
pub struct DamRecord {
    pub dam_name: String,
    #[serde(default)]
    pub rwl_m: Option<f64>,
    #[serde(default)]
    pub nhwl_m: Option<f64>,
    #[serde(default)]
    pub deviation_from_nhwl_m: Option<f64>,
}

impl DamRecord {
    /// Deviation from NHWL, derived when the feed omits it.
    pub fn deviation(&self) -> Option<f64> {
        self.deviation_from_nhwl_m.or_else(|| match (self.rwl_m, self.nhwl_m) {
            (Some(rwl), Some(nhwl)) => Some(rwl - nhwl),
            _ => None,
        })
    }
}

pub struct DamClient {
    http: reqwest::Client,
    url: String,
}

impl DamClient {
    pub fn new(url: String, timeout_sec: u64) -> Self {
        Self { http: super::http_client(timeout_sec), url }
    }

    pub async fn get_dam_levels(&self) -> Result<Vec<DamRecord>, SourceError> {
        let resp = self.http.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::BadResponse(format!(
                "dams endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<Vec<DamRecord>>().await.map_err(|e| SourceError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deviation_derived_from_levels() {
        let record = DamRecord {
            dam_name: "La Mesa".into(),
            rwl_m: Some(80.6),
            nhwl_m: Some(80.15),
            deviation_from_nhwl_m: None,
        };
        assert!((record.deviation().unwrap() - 0.45).abs() < 1e-9);
    }

    #[test]
    fn explicit_deviation_wins() {
        let record = DamRecord {
            dam_name: "Ipo".into(),
            rwl_m: Some(100.0),
            nhwl_m: Some(101.0),
            deviation_from_nhwl_m: Some(0.2),
        };
        assert!((record.deviation().unwrap() - 0.2).abs() < 1e-9);
    }
}
