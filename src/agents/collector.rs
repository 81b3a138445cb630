//! Flood Collector Agent — periodic multi-source pull of official data
//!
//! Every cycle pulls river gauges, dam levels, weather, and advisories,
//! normalizes them into observation records, and emits one batched INFORM
//! (`flood_data_batch`) to the hazard agent. A `collect_data` REQUEST forces
//! a cycle; the reply carries the originating conversation id.
//!
//! The fetch itself runs in a spawned worker task so `step()` never blocks
//! on network I/O. Consecutive whole-cycle failures (no source returned
//! data) are counted; at the configured threshold a CRITICAL alert is
//! logged and, when enabled, the simulated generator stands in.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Agent;
use crate::comms::{AclMessage, MessageBody, MessageBus, Performative};
use crate::config::{defaults, SystemConfig};
use crate::llm::LlmService;
use crate::sources::{
    simulated, AdvisoryClient, DamClient, GaugeClient, WeatherClient,
};
use crate::types::{
    AlertStatus, FloodObservation, ParsedAdvisory, RainfallIntensity, WarningColor,
};

/// Clients for the configured official sources. Absent URL = absent client.
pub struct CollectorClients {
    pub gauges: Option<GaugeClient>,
    pub dams: Option<DamClient>,
    pub weather: Option<WeatherClient>,
    pub advisories: Option<AdvisoryClient>,
}

impl CollectorClients {
    pub fn from_config(config: &SystemConfig) -> Self {
        let timeout = config.sources.request_timeout_sec;
        Self {
            gauges: config.sources.gauges_url.clone().map(|u| GaugeClient::new(u, timeout)),
            dams: config.sources.dams_url.clone().map(|u| DamClient::new(u, timeout)),
            weather: config.sources.weather_url.clone().map(|u| WeatherClient::new(u, timeout)),
            advisories: match (&config.sources.advisory_url, &config.sources.advisory_rss_url) {
                (None, None) => None,
                (html, rss) => Some(AdvisoryClient::new(html.clone(), rss.clone(), timeout)),
            },
        }
    }
}

struct CollectorState {
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    advisory_hashes: HashSet<String>,
    last_batch_size: usize,
    cycles_run: u64,
}

pub struct FloodCollectorAgent {
    agent_id: String,
    bus: Arc<MessageBus>,
    hazard_agent_id: String,
    config: Arc<SystemConfig>,
    llm: Arc<LlmService>,
    clients: Arc<CollectorClients>,
    state: Arc<Mutex<CollectorState>>,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    last_cycle_started: Option<Instant>,
}

impl FloodCollectorAgent {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        hazard_agent_id: impl Into<String>,
        config: Arc<SystemConfig>,
        llm: Arc<LlmService>,
        cancel: CancellationToken,
    ) -> Self {
        let agent_id = agent_id.into();
        let clients = Arc::new(CollectorClients::from_config(&config));
        info!(
            agent = %agent_id,
            interval_sec = config.collector.flood_update_interval_sec,
            gauges = clients.gauges.is_some(),
            dams = clients.dams.is_some(),
            weather = clients.weather.is_some(),
            advisories = clients.advisories.is_some(),
            "flood collector initialized"
        );
        Self {
            agent_id,
            bus,
            hazard_agent_id: hazard_agent_id.into(),
            config,
            llm,
            clients,
            state: Arc::new(Mutex::new(CollectorState {
                consecutive_failures: 0,
                last_success: None,
                advisory_hashes: HashSet::new(),
                last_batch_size: 0,
                cycles_run: 0,
            })),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel,
            last_cycle_started: None,
        }
    }

    fn cycle_due(&self) -> bool {
        self.last_cycle_started.map_or(true, |t| {
            t.elapsed().as_secs() >= self.config.collector.flood_update_interval_sec
        })
    }

    /// Spawn one collection cycle as a worker task. `reply_to` carries the
    /// originating REQUEST for correlated replies.
    fn spawn_cycle(&mut self, reply_to: Option<AclMessage>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(agent = %self.agent_id, "collection cycle already in flight");
            // Still acknowledge a forced request so the mission is not starved
            if let Some(request) = reply_to {
                let body = MessageBody::CollectDataResult {
                    status: "in_progress".into(),
                    locations_collected: 0,
                    error: None,
                };
                let reply = AclMessage::inform_reply(&request, self.agent_id.clone(), body);
                if let Err(e) = self.bus.send(reply) {
                    warn!(agent = %self.agent_id, error = %e, "failed to acknowledge request");
                }
            }
            return;
        }
        self.last_cycle_started = Some(Instant::now());

        let worker = CycleWorker {
            agent_id: self.agent_id.clone(),
            bus: Arc::clone(&self.bus),
            hazard_agent_id: self.hazard_agent_id.clone(),
            config: Arc::clone(&self.config),
            llm: Arc::clone(&self.llm),
            clients: Arc::clone(&self.clients),
            state: Arc::clone(&self.state),
            in_flight: Arc::clone(&self.in_flight),
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(async move { worker.run(reply_to).await });
    }

    /// Inject an advisory by hand (operator escape hatch). Forwarded to the
    /// hazard agent as a single-entry batch.
    pub fn inject_advisory(&self, text: &str, location: &str) -> Result<(), String> {
        let advisory = parse_advisory_rule_based(text);
        let mut data = HashMap::new();
        data.insert(
            location.to_string(),
            FloodObservation::Advisory {
                advisory,
                timestamp: Utc::now(),
                source: "manual_injection".into(),
            },
        );
        let msg = AclMessage::inform(
            self.agent_id.clone(),
            self.hazard_agent_id.clone(),
            MessageBody::FloodDataBatch { data },
            None,
        );
        self.bus.send(msg).map_err(|e| e.to_string())
    }

    pub fn stats(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::json!({
            "agent_id": self.agent_id,
            "cycles_run": state.cycles_run,
            "consecutive_failures": state.consecutive_failures,
            "last_success": state.last_success.map(|t| t.to_rfc3339()),
            "last_batch_size": state.last_batch_size,
            "processed_advisories": state.advisory_hashes.len(),
            "update_interval_seconds": self.config.collector.flood_update_interval_sec,
        })
    }
}

#[async_trait]
impl Agent for FloodCollectorAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn step(&mut self) {
        while let Ok(Some(msg)) = self.bus.try_receive(&self.agent_id) {
            match (msg.performative, msg.body.clone()) {
                (Performative::Request, MessageBody::CollectData) => {
                    info!(agent = %self.agent_id, from = %msg.sender, "forced collection requested");
                    self.spawn_cycle(Some(msg));
                }
                (performative, body) => {
                    warn!(
                        agent = %self.agent_id,
                        %performative,
                        tag = body.tag(),
                        from = %msg.sender,
                        "unhandled message"
                    );
                }
            }
        }

        if self.cycle_due() && !self.in_flight.load(Ordering::SeqCst) {
            self.spawn_cycle(None);
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct CycleWorker {
    agent_id: String,
    bus: Arc<MessageBus>,
    hazard_agent_id: String,
    config: Arc<SystemConfig>,
    llm: Arc<LlmService>,
    clients: Arc<CollectorClients>,
    state: Arc<Mutex<CollectorState>>,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl CycleWorker {
    async fn run(self, reply_to: Option<AclMessage>) {
        let result = tokio::select! {
            () = self.cancel.cancelled() => None,
            batch = self.collect() => Some(batch),
        };
        self.in_flight.store(false, Ordering::SeqCst);

        let Some(batch) = result else {
            debug!(agent = %self.agent_id, "collection cycle cancelled");
            return;
        };

        // Cancellation acknowledged: never enqueue afterwards
        if self.cancel.is_cancelled() {
            return;
        }

        let count = batch.len();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.cycles_run += 1;
            state.last_batch_size = count;
        }

        if count > 0 {
            let msg = AclMessage::inform(
                self.agent_id.clone(),
                self.hazard_agent_id.clone(),
                MessageBody::FloodDataBatch { data: batch },
                None,
            );
            match self.bus.send(msg) {
                Ok(()) => info!(
                    agent = %self.agent_id,
                    locations = count,
                    to = %self.hazard_agent_id,
                    "flood data batch sent"
                ),
                Err(e) => error!(agent = %self.agent_id, error = %e, "failed to send batch"),
            }
        } else {
            warn!(agent = %self.agent_id, "no data collected from any source");
        }

        if let Some(request) = reply_to {
            let body = MessageBody::CollectDataResult {
                status: if count > 0 { "success".into() } else { "no_data".into() },
                locations_collected: count,
                error: None,
            };
            let reply = AclMessage::inform_reply(&request, self.agent_id.clone(), body);
            if let Err(e) = self.bus.send(reply) {
                error!(agent = %self.agent_id, error = %e, "failed to reply to collect request");
            }
        }
    }

    /// One full multi-source pull, with failure tracking and the simulated
    /// fallback when everything comes back empty.
    async fn collect(&self) -> HashMap<String, FloodObservation> {
        let mut batch = HashMap::new();

        let (rivers, dams, weather) = tokio::join!(
            self.fetch_river_levels(),
            self.fetch_dam_levels(),
            self.fetch_weather(),
        );
        batch.extend(rivers);
        batch.extend(dams);
        batch.extend(weather);
        batch.extend(self.fetch_advisories().await);

        let threshold = self.config.collector.failure_alert_threshold;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if batch.is_empty() {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= threshold {
                    let staleness = state.last_success.map_or_else(
                        || "never succeeded".to_string(),
                        |t| format!("last success {}s ago", (Utc::now() - t).num_seconds()),
                    );
                    error!(
                        agent = %self.agent_id,
                        failures = state.consecutive_failures,
                        %staleness,
                        "ALERT: all real sources failed consecutively; system operating on stale or simulated data"
                    );
                }
            } else {
                if state.consecutive_failures > 0 {
                    info!(
                        agent = %self.agent_id,
                        after = state.consecutive_failures,
                        "real source data restored"
                    );
                }
                state.consecutive_failures = 0;
                state.last_success = Some(Utc::now());
            }
        }

        if batch.is_empty() && self.config.collector.enable_simulated_fallback {
            warn!(agent = %self.agent_id, "falling back to simulated data");
            batch = simulated::generate_batch();
        }

        batch
    }

    async fn fetch_river_levels(&self) -> HashMap<String, FloodObservation> {
        let Some(client) = &self.clients.gauges else { return HashMap::new() };
        let stations = match client.get_river_levels().await {
            Ok(stations) => stations,
            Err(e) => {
                error!(agent = %self.agent_id, error = %e, "river gauge fetch failed");
                return HashMap::new();
            }
        };

        let keywords = &self.config.collector.station_keywords;
        let cfg = &self.config.collector.water_level;
        let mut data = HashMap::new();

        for station in stations {
            let name_lower = station.station_name.to_lowercase();
            if !keywords.iter().any(|kw| name_lower.contains(kw)) {
                continue;
            }

            let (status, risk_score) = match station.water_level_m {
                Some(level) => {
                    // Station-reported thresholds win over configured defaults
                    let critical = station.critical_level_m.unwrap_or(cfg.critical);
                    let alarm = station.alarm_level_m.unwrap_or(cfg.alarm);
                    let alert = station.alert_level_m.unwrap_or(cfg.alert);
                    if level >= critical {
                        (AlertStatus::Critical, 1.0)
                    } else if level >= alarm {
                        (AlertStatus::Alarm, 0.8)
                    } else if level >= alert {
                        (AlertStatus::Alert, 0.5)
                    } else {
                        (AlertStatus::Normal, 0.2)
                    }
                }
                None => (AlertStatus::Normal, 0.0),
            };

            if let Some(level) = station.water_level_m {
                info!("River level is {level:.2}m at {}", station.station_name);
            }

            data.insert(
                station.station_name.clone(),
                FloodObservation::RiverStation {
                    station_name: station.station_name,
                    water_level_m: station.water_level_m,
                    alert_level_m: station.alert_level_m,
                    alarm_level_m: station.alarm_level_m,
                    critical_level_m: station.critical_level_m,
                    status,
                    risk_score,
                    timestamp: Utc::now(),
                    source: "gauges".into(),
                },
            );
        }
        info!(agent = %self.agent_id, stations = data.len(), "river levels fetched");
        data
    }

    async fn fetch_dam_levels(&self) -> HashMap<String, FloodObservation> {
        let Some(client) = &self.clients.dams else { return HashMap::new() };
        let dams = match client.get_dam_levels().await {
            Ok(dams) => dams,
            Err(e) => {
                error!(agent = %self.agent_id, error = %e, "dam level fetch failed");
                return HashMap::new();
            }
        };

        let cfg = &self.config.collector.dam;
        let mut data = HashMap::new();
        for dam in dams {
            let deviation = dam.deviation();
            let (status, risk_score) = match deviation {
                Some(dev) if dev >= cfg.critical => (AlertStatus::Critical, 1.0),
                Some(dev) if dev >= cfg.alarm => (AlertStatus::Alarm, 0.8),
                Some(dev) if dev >= cfg.alert => (AlertStatus::Alert, 0.5),
                Some(dev) if dev >= 0.0 => (AlertStatus::Watch, 0.3),
                Some(_) => (AlertStatus::Normal, 0.1),
                None => (AlertStatus::Normal, 0.0),
            };

            if let Some(rwl) = dam.rwl_m {
                info!("Dam level is {rwl:.2}m at {}", dam.dam_name);
            }

            data.insert(
                dam.dam_name.clone(),
                FloodObservation::Dam {
                    dam_name: dam.dam_name,
                    reservoir_water_level_m: dam.rwl_m,
                    normal_high_water_level_m: dam.nhwl_m,
                    deviation_from_nhwl_m: deviation,
                    status,
                    risk_score,
                    timestamp: Utc::now(),
                    source: "dams".into(),
                },
            );
        }
        info!(agent = %self.agent_id, dams = data.len(), "dam levels fetched");
        data
    }

    async fn fetch_weather(&self) -> HashMap<String, FloodObservation> {
        let Some(client) = &self.clients.weather else { return HashMap::new() };
        let (lat, lon) = defaults::CITY_CENTER;
        let forecast = match client.get_forecast(lat, lon).await {
            Ok(forecast) => forecast,
            Err(e) => {
                error!(agent = %self.agent_id, error = %e, "weather fetch failed");
                return HashMap::new();
            }
        };

        let rate = forecast.current_rain_mm();
        let intensity = rainfall_intensity(rate, &self.config);
        info!("Rainfall in Marikina is {rate:.2}mm");

        let mut data = HashMap::new();
        data.insert(
            "Marikina_weather".into(),
            FloodObservation::Rainfall {
                location: "Marikina".into(),
                rate_mm_hr: rate,
                accumulated_24h_mm: forecast.accumulated_mm(24),
                forecast_6h_mm: forecast.accumulated_mm(6),
                intensity,
                timestamp: Utc::now(),
                source: "weather".into(),
            },
        );
        data
    }

    async fn fetch_advisories(&self) -> HashMap<String, FloodObservation> {
        let Some(client) = &self.clients.advisories else { return HashMap::new() };
        let mut data = HashMap::new();
        let mut index = 0;

        if let Ok(Some(text)) = client.fetch_advisory_text().await {
            if !self.is_duplicate_advisory(&text) {
                let advisory = self.parse_advisory(&text, None).await;
                data.insert(
                    format!("advisory_{index}"),
                    FloodObservation::Advisory {
                        advisory,
                        timestamp: Utc::now(),
                        source: "advisory_page".into(),
                    },
                );
                index += 1;
            }
        }

        match client.fetch_rss_items().await {
            Ok(items) => {
                for item in items {
                    let text = item.text();
                    if text.len() < 50 || self.is_duplicate_advisory(&text) {
                        continue;
                    }
                    let advisory = self.parse_advisory(&text, Some(item.link.clone())).await;
                    // Keep only items that actually carry a signal
                    if advisory.warning_level == WarningColor::None
                        && advisory.affected_areas.is_empty()
                    {
                        continue;
                    }
                    data.insert(
                        format!("advisory_{index}"),
                        FloodObservation::Advisory {
                            advisory,
                            timestamp: Utc::now(),
                            source: "advisory_rss".into(),
                        },
                    );
                    index += 1;
                }
            }
            Err(e) => error!(agent = %self.agent_id, error = %e, "advisory RSS fetch failed"),
        }

        if !data.is_empty() {
            info!(agent = %self.agent_id, advisories = data.len(), "advisories collected");
        }
        data
    }

    /// LLM structured parse first; deterministic rule-based parse on failure.
    async fn parse_advisory(&self, text: &str, source_url: Option<String>) -> ParsedAdvisory {
        let mut advisory = match self.llm.parse_advisory(text).await {
            Some(parsed) => parsed,
            None => parse_advisory_rule_based(text),
        };
        advisory.source_url = source_url;
        advisory
    }

    /// MD5-hash dedup ring; records the hash when new.
    fn is_duplicate_advisory(&self, text: &str) -> bool {
        let hash = format!("{:x}", md5::compute(text.trim().as_bytes()));
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.advisory_hashes.contains(&hash) {
            debug!(agent = %self.agent_id, hash = &hash[..8], "skipping duplicate advisory");
            return true;
        }
        if state.advisory_hashes.len() > defaults::ADVISORY_HASH_RING_CAPACITY {
            state.advisory_hashes.clear();
        }
        state.advisory_hashes.insert(hash);
        false
    }
}

/// Rainfall intensity from configured mm/hr cut points.
fn rainfall_intensity(rate_mm_hr: f64, config: &SystemConfig) -> RainfallIntensity {
    let t = &config.collector.rainfall_thresholds_mm;
    if rate_mm_hr <= 0.0 {
        RainfallIntensity::None
    } else if rate_mm_hr <= t.light {
        RainfallIntensity::Light
    } else if rate_mm_hr <= t.moderate {
        RainfallIntensity::Moderate
    } else if rate_mm_hr <= t.heavy {
        RainfallIntensity::Heavy
    } else if rate_mm_hr <= t.extreme {
        RainfallIntensity::Intense
    } else {
        RainfallIntensity::Torrential
    }
}

/// Deterministic advisory parse: keyword matching on type, warning color,
/// and affected areas; first sentences become key points.
fn parse_advisory_rule_based(text: &str) -> ParsedAdvisory {
    let lower = text.to_lowercase();

    let advisory_type = if lower.contains("heavy rainfall") || lower.contains("rainfall warning") {
        "rainfall"
    } else if lower.contains("flood") {
        "flood"
    } else if lower.contains("dam") || lower.contains("spillway") {
        "dam"
    } else if lower.contains("typhoon") || lower.contains("bagyo") {
        "typhoon"
    } else {
        "general"
    };

    let warning_level = if lower.contains("red warning") || lower.contains("red rainfall") {
        WarningColor::Red
    } else if lower.contains("orange warning") || lower.contains("orange rainfall") {
        WarningColor::Orange
    } else if lower.contains("yellow warning") || lower.contains("yellow rainfall") {
        WarningColor::Yellow
    } else if lower.contains("blue warning") || lower.contains("blue rainfall") {
        WarningColor::Blue
    } else {
        WarningColor::None
    };

    let mut affected_areas = Vec::new();
    if lower.contains("marikina") {
        affected_areas.push("Marikina".to_string());
    }

    let key_points: Vec<String> = text
        .split('.')
        .map(str::trim)
        .filter(|s| s.len() > 20)
        .take(5)
        .map(String::from)
        .collect();

    ParsedAdvisory {
        advisory_type: advisory_type.into(),
        warning_level,
        affected_areas,
        expected_rainfall_mm: None,
        key_points,
        parsing_method: "rule_based".into(),
        source_url: None,
        fetched_at: Utc::now(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_based_advisory_parse() {
        let advisory = parse_advisory_rule_based(
            "PAGASA Heavy Rainfall Warning: ORANGE WARNING over Metro Manila including \
             Marikina City. Residents near the Marikina River are advised to prepare for \
             possible evacuation.",
        );
        assert_eq!(advisory.advisory_type, "rainfall");
        assert_eq!(advisory.warning_level, WarningColor::Orange);
        assert_eq!(advisory.affected_areas, vec!["Marikina"]);
        assert!(!advisory.key_points.is_empty());
        assert_eq!(advisory.parsing_method, "rule_based");
    }

    #[test]
    fn rule_based_dam_advisory() {
        let advisory =
            parse_advisory_rule_based("La Mesa dam nears spilling level, spillway gates may open.");
        assert_eq!(advisory.advisory_type, "dam");
        assert_eq!(advisory.warning_level, WarningColor::None);
    }

    #[test]
    fn rainfall_intensity_cut_points() {
        let config = SystemConfig::default();
        assert_eq!(rainfall_intensity(0.0, &config), RainfallIntensity::None);
        assert_eq!(rainfall_intensity(2.0, &config), RainfallIntensity::Light);
        assert_eq!(rainfall_intensity(5.0, &config), RainfallIntensity::Moderate);
        assert_eq!(rainfall_intensity(10.0, &config), RainfallIntensity::Heavy);
        assert_eq!(rainfall_intensity(20.0, &config), RainfallIntensity::Intense);
        assert_eq!(rainfall_intensity(45.0, &config), RainfallIntensity::Torrential);
    }

    fn collector_for_test(config: Arc<SystemConfig>) -> (FloodCollectorAgent, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(&config.runtime));
        bus.register("flood_agent_001").unwrap();
        bus.register("hazard_agent_001").unwrap();
        let llm = Arc::new(LlmService::new(crate::config::LlmConfig {
            enabled: false,
            ..crate::config::LlmConfig::default()
        }));
        let agent = FloodCollectorAgent::new(
            "flood_agent_001",
            Arc::clone(&bus),
            "hazard_agent_001",
            config,
            llm,
            CancellationToken::new(),
        );
        (agent, bus)
    }

    #[tokio::test]
    async fn forced_cycle_replies_with_correlation() {
        // No sources configured: the simulated fallback produces the batch.
        let config = Arc::new(SystemConfig::default());
        let (mut agent, bus) = collector_for_test(config);
        bus.register("orchestrator_main").unwrap();

        let request = AclMessage::request(
            "orchestrator_main",
            "flood_agent_001",
            MessageBody::CollectData,
            Some("m99".into()),
        );
        bus.send(request).unwrap();

        agent.step().await;

        // Worker runs in the background; wait for both messages to land
        let mut reply = None;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if let Some(msg) = bus.try_receive("orchestrator_main").unwrap() {
                reply = Some(msg);
                break;
            }
        }
        let reply = reply.expect("collector never replied");
        assert_eq!(reply.conversation_id.as_deref(), Some("m99"));
        assert!(matches!(reply.body, MessageBody::CollectDataResult { .. }));

        // Hazard received the simulated batch
        let mut batch = None;
        for _ in 0..50 {
            if let Some(msg) = bus.try_receive("hazard_agent_001").unwrap() {
                batch = Some(msg);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(matches!(batch.unwrap().body, MessageBody::FloodDataBatch { .. }));
    }

    #[tokio::test]
    async fn simulated_fallback_disabled_counts_failures() {
        let mut config = SystemConfig::default();
        config.collector.enable_simulated_fallback = false;
        let (mut agent, _bus) = collector_for_test(Arc::new(config));

        agent.step().await;
        // Let the worker finish a full cycle
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if agent.state.lock().unwrap().cycles_run >= 1 {
                break;
            }
        }
        let state = agent.state.lock().unwrap();
        assert_eq!(state.cycles_run, 1);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.last_batch_size, 0);
    }

    #[test]
    fn advisory_dedup_by_hash() {
        let config = Arc::new(SystemConfig::default());
        let (agent, _bus) = collector_for_test(config);
        let worker = CycleWorker {
            agent_id: agent.agent_id.clone(),
            bus: Arc::clone(&agent.bus),
            hazard_agent_id: agent.hazard_agent_id.clone(),
            config: Arc::clone(&agent.config),
            llm: Arc::clone(&agent.llm),
            clients: Arc::clone(&agent.clients),
            state: Arc::clone(&agent.state),
            in_flight: Arc::clone(&agent.in_flight),
            cancel: CancellationToken::new(),
        };

        assert!(!worker.is_duplicate_advisory("  Orange warning over Marikina  "));
        assert!(worker.is_duplicate_advisory("Orange warning over Marikina"));
        assert!(!worker.is_duplicate_advisory("A different advisory entirely"));
    }

    #[tokio::test]
    async fn manual_injection_forwards_to_hazard() {
        let config = Arc::new(SystemConfig::default());
        let (agent, bus) = collector_for_test(config);
        agent.inject_advisory("Red warning: flood in Marikina", "Marikina").unwrap();

        let msg = bus.try_receive("hazard_agent_001").unwrap().unwrap();
        match msg.body {
            MessageBody::FloodDataBatch { data } => {
                assert!(data.contains_key("Marikina"));
            }
            other => panic!("unexpected body {:?}", other.tag()),
        }
    }
}
