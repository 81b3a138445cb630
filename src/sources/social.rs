//! Crowdsourced social feed client

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::SourceError;

/// One raw crowdsourced post, possibly with an attached image.
#[derive(Debug, Clone, Deserialize)]
pub struct SocialPost {
    pub tweet_id: String,
    #[serde(default)]
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
}

pub struct SocialClient {
    http: reqwest::Client,
    url: String,
}

impl SocialClient {
    pub fn new(url: String, timeout_sec: u64) -> Self {
        Self { http: super::http_client(timeout_sec), url }
    }

    /// Fetch the latest posts from the feed.
    pub async fn get_posts(&self) -> Result<Vec<SocialPost>, SourceError> {
        let resp = self.http.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(SourceError::BadResponse(format!(
                "social endpoint returned {}",
                resp.status()
            )));
        }
        resp.json::<Vec<SocialPost>>().await.map_err(|e| SourceError::Parse(e.to_string()))
    }
}
