//! LLM Service Facade
//!
//! Single gateway to the external text and vision models behind an
//! Ollama-compatible HTTP API. Callers never crash on model failure: every
//! method degrades to an empty result (or the simulated vision analyzer) and
//! logs, so the pipeline keeps moving on rule-based fallbacks.
//!
//! - Health state is cached (TTL 60 s) so `is_available()` is cheap to call
//!   from hot paths.
//! - Responses are cached by MD5 of the prompt (TTL ~5 min, LRU-bounded) to
//!   absorb repeated identical requests during a flood event.

pub mod json_repair;
pub mod simulated_vision;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{defaults, LlmConfig};
use crate::types::{ParsedAdvisory, VisualAnalysis, WarningColor};
use simulated_vision::SimulatedImageAnalyzer;

/// One turn in a multi-turn chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into(), images: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into(), images: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into(), images: None }
    }
}

/// Structured extraction from a text flood report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextAnalysis {
    pub location: Option<String>,
    pub severity: f64,
    pub is_flood_related: bool,
    pub report_type: Option<String>,
    pub urgency: Option<String>,
    pub description: Option<String>,
    pub confidence: f64,
}

/// Detailed health snapshot for the API surface.
#[derive(Debug, Clone, Serialize)]
pub struct LlmHealth {
    pub available: bool,
    pub enabled: bool,
    pub text_model: String,
    pub vision_model: String,
    pub base_url: String,
    pub models_loaded: Vec<String>,
    pub cache_size: usize,
    pub last_check_age_seconds: Option<u64>,
}

struct HealthState {
    available: Option<bool>,
    models: Vec<String>,
    last_check: Option<Instant>,
}

struct ResponseCache {
    entries: HashMap<String, (Value, Instant)>,
}

impl ResponseCache {
    fn get(&mut self, key: &str, ttl: Duration) -> Option<Value> {
        match self.entries.get(key) {
            Some((value, at)) if at.elapsed() < ttl => {
                debug!(key = &key[..key.len().min(16)], "llm cache hit");
                Some(value.clone())
            }
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&mut self, key: String, value: Value, max_entries: usize) {
        if self.entries.len() >= max_entries {
            if let Some(oldest) =
                self.entries.iter().min_by_key(|(_, (_, at))| *at).map(|(k, _)| k.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(key, (value, Instant::now()));
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatReply {
    message: OllamaChatMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTags {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    #[serde(default)]
    name: String,
}

/// Centralized LLM access with caching and graceful unavailability.
pub struct LlmService {
    config: LlmConfig,
    http: reqwest::Client,
    health: Mutex<HealthState>,
    cache: Mutex<ResponseCache>,
    vision_fallback: SimulatedImageAnalyzer,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        info!(
            enabled = config.enabled,
            text_model = %config.text_model,
            vision_model = %config.vision_model,
            base_url = %config.base_url,
            "LLM service initialized"
        );
        Self {
            config,
            http,
            health: Mutex::new(HealthState { available: None, models: Vec::new(), last_check: None }),
            cache: Mutex::new(ResponseCache { entries: HashMap::new() }),
            vision_fallback: SimulatedImageAnalyzer::default(),
        }
    }

    fn cache_key(prefix: &str, content: &str) -> String {
        format!("{prefix}:{:x}", md5::compute(content.as_bytes()))
    }

    fn cached(&self, key: &str) -> Option<Value> {
        let ttl = Duration::from_secs(self.config.cache_ttl_seconds);
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(key, ttl)
    }

    fn store(&self, key: String, value: Value) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, value, self.config.cache_max_entries);
    }

    /// Whether the backing service is reachable. Cached for 60 s.
    pub async fn is_available(&self) -> bool {
        if !self.config.enabled {
            return false;
        }
        {
            let health = self.health.lock().unwrap_or_else(|e| e.into_inner());
            if let (Some(available), Some(at)) = (health.available, health.last_check) {
                if at.elapsed() < Duration::from_secs(defaults::LLM_HEALTH_TTL_SEC) {
                    return available;
                }
            }
        }

        let url = format!("{}/api/tags", self.config.base_url);
        let result = self.http.get(&url).send().await;
        let (available, models) = match result {
            Ok(resp) if resp.status().is_success() => match resp.json::<OllamaTags>().await {
                Ok(tags) => (true, tags.models.into_iter().map(|m| m.name).collect()),
                Err(e) => {
                    warn!(error = %e, "LLM health check returned malformed model list");
                    (true, Vec::new())
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "LLM health check failed");
                (false, Vec::new())
            }
            Err(e) => {
                warn!(error = %e, "LLM health check failed");
                (false, Vec::new())
            }
        };

        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        health.available = Some(available);
        health.models = models;
        health.last_check = Some(Instant::now());
        available
    }

    /// Detailed health for the API surface.
    pub async fn get_health(&self) -> LlmHealth {
        let available = self.is_available().await;
        let health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let cache_size = self.cache.lock().unwrap_or_else(|e| e.into_inner()).entries.len();
        LlmHealth {
            available,
            enabled: self.config.enabled,
            text_model: self.config.text_model.clone(),
            vision_model: self.config.vision_model.clone(),
            base_url: self.config.base_url.clone(),
            models_loaded: health.models.clone(),
            cache_size,
            last_check_age_seconds: health.last_check.map(|t| t.elapsed().as_secs()),
        }
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Option<String> {
        let url = format!("{}/api/chat", self.config.base_url);
        let payload = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": false,
        });
        match self.http.post(&url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<OllamaChatReply>().await {
                Ok(reply) => {
                    let text = reply.message.content.trim().to_string();
                    if text.is_empty() { None } else { Some(text) }
                }
                Err(e) => {
                    warn!(error = %e, "LLM reply was not parseable");
                    None
                }
            },
            Ok(resp) => {
                warn!(status = %resp.status(), model, "LLM chat request rejected");
                None
            }
            Err(e) => {
                warn!(error = %e, model, "LLM chat request failed");
                None
            }
        }
    }

    /// General-purpose single-prompt chat. Empty string on any failure.
    pub async fn text_chat(&self, prompt: &str) -> String {
        if prompt.trim().is_empty() {
            return String::new();
        }
        let key = Self::cache_key("chat", prompt);
        if let Some(Value::String(text)) = self.cached(&key) {
            return text;
        }
        if !self.is_available().await {
            return String::new();
        }

        match self.chat(&self.config.text_model, &[ChatMessage::user(prompt)]).await {
            Some(text) => {
                self.store(key, Value::String(text.clone()));
                text
            }
            None => String::new(),
        }
    }

    /// Multi-turn chat with conversation history. Empty string on failure.
    pub async fn text_chat_multi(&self, messages: &[ChatMessage]) -> String {
        if messages.is_empty() || !self.is_available().await {
            return String::new();
        }
        self.chat(&self.config.text_model, messages).await.unwrap_or_default()
    }

    /// Extract structured flood data from an unstructured text report.
    /// `None` when the model is unavailable or replies with garbage.
    pub async fn analyze_text_report(&self, text: &str) -> Option<TextAnalysis> {
        if text.trim().is_empty() {
            return None;
        }
        let key = Self::cache_key("text", text);
        if let Some(cached) = self.cached(&key) {
            return serde_json::from_value(cached).ok();
        }
        if !self.is_available().await {
            return None;
        }

        let prompt = format!(
            "You are a flood report analyzer for Marikina City, Philippines.\n\
             Analyze this flood report and extract JSON with fields:\n\
             {{\"location\": \"string or null\", \"severity\": 0.0-1.0,\n\
             \"is_flood_related\": bool, \"description\": \"brief summary\",\n\
             \"report_type\": \"flood/clear/blocked/traffic/observation\",\n\
             \"urgency\": \"low/medium/high/critical\"}}\n\
             Severity maps from depth: ankle ~0.15, knee ~0.4, waist ~0.6, chest ~0.8, neck+ ~0.95.\n\
             If the text is in Filipino/Tagalog, translate key details.\n\
             Report: \"{text}\"\n\
             Return ONLY valid JSON, no explanation or markdown."
        );

        let raw = self.chat(&self.config.text_model, &[ChatMessage::user(&prompt)]).await?;
        let value = json_repair::extract_json(&raw)?;

        let is_flood_related = json_repair::bool_field(&value, "is_flood_related").unwrap_or(false);
        let analysis = TextAnalysis {
            location: json_repair::str_field(&value, "location").filter(|s| !s.is_empty()),
            severity: json_repair::f64_field(&value, "severity").unwrap_or(0.0).clamp(0.0, 1.0),
            is_flood_related,
            report_type: json_repair::str_field(&value, "report_type"),
            urgency: json_repair::str_field(&value, "urgency"),
            description: json_repair::str_field(&value, "description"),
            confidence: if is_flood_related { 0.8 } else { 0.5 },
        };

        if let Ok(v) = serde_json::to_value(&analysis) {
            self.store(key, v);
        }
        debug!(
            location = ?analysis.location,
            severity = analysis.severity,
            flood = analysis.is_flood_related,
            "text analysis complete"
        );
        Some(analysis)
    }

    /// Estimate flood depth and risk from an image. When the vision model is
    /// down and fallback is enabled, delegates to the simulated analyzer.
    pub async fn analyze_flood_image(&self, image_path: &str) -> Option<VisualAnalysis> {
        if image_path.is_empty() {
            return None;
        }

        let mtime = std::fs::metadata(image_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        let key = Self::cache_key("image", &format!("{image_path}:{mtime}"));
        if let Some(cached) = self.cached(&key) {
            return serde_json::from_value(cached).ok();
        }

        let file_exists = std::path::Path::new(image_path).exists();
        if !file_exists || !self.is_available().await {
            if self.config.vision_fallback {
                debug!(image = image_path, "vision model unavailable, using simulated analyzer");
                return Some(self.vision_fallback.analyze(image_path));
            }
            return None;
        }

        let prompt = "You are a flood depth estimator analyzing an image from Marikina City.\n\
             Estimate the water depth and return JSON:\n\
             {\"estimated_depth_m\": float, \"risk_score\": 0.0-1.0,\n\
             \"vehicles_passable\": [\"car\",\"suv\",\"truck\",\"motorcycle\",\"bicycle\"],\n\
             \"visual_indicators\": \"what indicates severity\"}\n\
             Depth references: ankle ~0.1-0.15m, knee ~0.3-0.45m, waist ~0.6-0.9m, chest ~1.0-1.2m.\n\
             Return ONLY valid JSON.";

        let message = ChatMessage {
            role: "user".into(),
            content: prompt.into(),
            images: Some(vec![image_path.to_string()]),
        };
        let raw = self.chat(&self.config.vision_model, &[message]).await;

        let Some(raw) = raw else {
            return if self.config.vision_fallback {
                Some(self.vision_fallback.analyze(image_path))
            } else {
                None
            };
        };
        let value = json_repair::extract_json(&raw)?;

        let estimated_depth_m = json_repair::f64_field(&value, "estimated_depth_m");
        let risk_score = json_repair::f64_field(&value, "risk_score").unwrap_or(0.0).clamp(0.0, 1.0);
        let visual_indicators = json_repair::str_field(&value, "visual_indicators");
        let vehicles_passable = value
            .get("vehicles_passable")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();

        // Confidence from response completeness
        let confidence = match (estimated_depth_m.is_some(), visual_indicators.is_some()) {
            (true, true) => 0.85,
            (true, false) => 0.7,
            _ => 0.5,
        };

        let analysis = VisualAnalysis {
            estimated_depth_m,
            risk_score,
            vehicles_passable,
            visual_indicators,
            confidence,
            simulated: false,
        };
        if let Ok(v) = serde_json::to_value(&analysis) {
            self.store(key, v);
        }
        Some(analysis)
    }

    /// Parse an official advisory bulletin into a structured warning.
    pub async fn parse_advisory(&self, advisory_text: &str) -> Option<ParsedAdvisory> {
        if advisory_text.trim().is_empty() {
            return None;
        }
        let key = Self::cache_key("advisory", advisory_text);
        if let Some(cached) = self.cached(&key) {
            return serde_json::from_value(cached).ok();
        }
        if !self.is_available().await {
            return None;
        }

        let prompt = format!(
            "Parse this weather advisory and extract structured information.\n\
             Advisory:\n{advisory_text}\n\
             Return JSON: {{\"advisory_type\": \"rainfall/flood/dam/typhoon/general\",\n\
             \"warning_level\": \"blue/yellow/orange/red/none\",\n\
             \"affected_areas\": [\"...\"], \"expected_rainfall_mm\": float or null,\n\
             \"key_points\": [\"...\"]}}\n\
             Return ONLY valid JSON."
        );

        let raw = self.chat(&self.config.text_model, &[ChatMessage::user(&prompt)]).await?;
        let value = json_repair::extract_json(&raw)?;

        let warning_level = match json_repair::str_field(&value, "warning_level").as_deref() {
            Some("blue") => WarningColor::Blue,
            Some("yellow") => WarningColor::Yellow,
            Some("orange") => WarningColor::Orange,
            Some("red") => WarningColor::Red,
            _ => WarningColor::None,
        };
        let string_list = |field: &str| -> Vec<String> {
            value
                .get(field)
                .and_then(Value::as_array)
                .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default()
        };

        let advisory = ParsedAdvisory {
            advisory_type: json_repair::str_field(&value, "advisory_type")
                .unwrap_or_else(|| "general".into()),
            warning_level,
            affected_areas: string_list("affected_areas"),
            expected_rainfall_mm: json_repair::f64_field(&value, "expected_rainfall_mm"),
            key_points: string_list("key_points"),
            parsing_method: "llm".into(),
            source_url: None,
            fetched_at: chrono::Utc::now(),
        };
        if let Ok(v) = serde_json::to_value(&advisory) {
            self.store(key, v);
        }
        Some(advisory)
    }

    /// Drop all cached responses, returning the evicted count.
    pub fn clear_cache(&self) -> usize {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let count = cache.entries.len();
        cache.entries.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_service() -> LlmService {
        LlmService::new(LlmConfig { enabled: false, ..LlmConfig::default() })
    }

    #[tokio::test]
    async fn disabled_service_is_unavailable() {
        let llm = disabled_service();
        assert!(!llm.is_available().await);
        assert_eq!(llm.text_chat("hello").await, "");
        assert!(llm.analyze_text_report("baha sa nangka").await.is_none());
    }

    #[tokio::test]
    async fn vision_falls_back_when_disabled() {
        let llm = disabled_service();
        // Path does not exist, model disabled: simulated analyzer still answers
        let result = llm.analyze_flood_image("uploads/knee_deep_crossing.jpg").await.unwrap();
        assert!(result.simulated);
        assert!(result.risk_score > 0.0);
    }

    #[tokio::test]
    async fn vision_fallback_can_be_switched_off() {
        let llm = LlmService::new(LlmConfig {
            enabled: false,
            vision_fallback: false,
            ..LlmConfig::default()
        });
        assert!(llm.analyze_flood_image("uploads/knee_deep.jpg").await.is_none());
    }

    #[test]
    fn cache_eviction_is_bounded() {
        let mut cache = ResponseCache { entries: HashMap::new() };
        for i in 0..5 {
            cache.put(format!("k{i}"), Value::Null, 3);
        }
        assert!(cache.entries.len() <= 3);
    }
}
