//! Scout Agent — crowdsourced posts into normalized flood reports
//!
//! Pulls raw posts from the social feed and runs each through the pipeline:
//! vision analysis when an image is attached, text analysis (LLM preferred,
//! rule-based NLP fallback), cross-modal fusion (`final_risk = max(visual,
//! text)`), then geocoding. Reports without resolvable coordinates are
//! dropped. One INFORM (`scout_report_batch`) per cycle goes to the hazard
//! agent, tagged with counts and a processing-version string.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Agent;
use crate::comms::{AclMessage, MessageBody, MessageBus, Performative};
use crate::config::SystemConfig;
use crate::llm::LlmService;
use crate::nlp::geocoder::Geocoder;
use crate::nlp::NlpProcessor;
use crate::sources::{SocialClient, SocialPost};
use crate::types::{ReportType, ScoutReport};

const PROCESSING_VERSION: &str = "v2_llm_enhanced";
/// Seconds between social feed polls.
const POLL_INTERVAL_SEC: u64 = 60;

#[derive(Default)]
struct ScoutStats {
    posts_processed: u64,
    reports_emitted: u64,
    skipped_no_coordinates: u64,
    last_batch_size: usize,
    last_visual_count: usize,
}

pub struct ScoutAgent {
    agent_id: String,
    bus: Arc<MessageBus>,
    hazard_agent_id: String,
    config: Arc<SystemConfig>,
    llm: Arc<LlmService>,
    nlp: Arc<NlpProcessor>,
    geocoder: Arc<Geocoder>,
    social: Option<Arc<SocialClient>>,
    seen_posts: Arc<Mutex<HashSet<String>>>,
    stats: Arc<Mutex<ScoutStats>>,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
    last_poll: Option<Instant>,
}

impl ScoutAgent {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        hazard_agent_id: impl Into<String>,
        config: Arc<SystemConfig>,
        llm: Arc<LlmService>,
        geocoder: Arc<Geocoder>,
        cancel: CancellationToken,
    ) -> Self {
        let agent_id = agent_id.into();
        let social = config
            .sources
            .social_url
            .clone()
            .map(|u| Arc::new(SocialClient::new(u, config.sources.request_timeout_sec)));
        info!(
            agent = %agent_id,
            social_feed = social.is_some(),
            "scout agent initialized"
        );
        Self {
            agent_id,
            bus,
            hazard_agent_id: hazard_agent_id.into(),
            config,
            llm,
            nlp: Arc::new(NlpProcessor::new()),
            geocoder,
            social,
            seen_posts: Arc::new(Mutex::new(HashSet::new())),
            stats: Arc::new(Mutex::new(ScoutStats::default())),
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel,
            last_poll: None,
        }
    }

    fn poll_due(&self) -> bool {
        self.last_poll.map_or(true, |t| t.elapsed().as_secs() >= POLL_INTERVAL_SEC)
    }

    fn spawn_poll(&mut self) {
        let Some(social) = self.social.clone() else { return };
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        self.last_poll = Some(Instant::now());

        let worker = PollWorker {
            agent_id: self.agent_id.clone(),
            bus: Arc::clone(&self.bus),
            hazard_agent_id: self.hazard_agent_id.clone(),
            config: Arc::clone(&self.config),
            llm: Arc::clone(&self.llm),
            nlp: Arc::clone(&self.nlp),
            geocoder: Arc::clone(&self.geocoder),
            social,
            seen_posts: Arc::clone(&self.seen_posts),
            stats: Arc::clone(&self.stats),
            in_flight: Arc::clone(&self.in_flight),
            cancel: self.cancel.child_token(),
        };
        tokio::spawn(async move { worker.run().await });
    }

    pub fn stats(&self) -> serde_json::Value {
        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::json!({
            "agent_id": self.agent_id,
            "posts_processed": stats.posts_processed,
            "reports_emitted": stats.reports_emitted,
            "skipped_no_coordinates": stats.skipped_no_coordinates,
            "last_batch_size": stats.last_batch_size,
            "last_visual_count": stats.last_visual_count,
            "processing_version": PROCESSING_VERSION,
        })
    }
}

#[async_trait]
impl Agent for ScoutAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn step(&mut self) {
        while let Ok(Some(msg)) = self.bus.try_receive(&self.agent_id) {
            match (msg.performative, &msg.body) {
                (Performative::Request, MessageBody::ScanLocation { location }) => {
                    let coordinates = self.geocoder.get_coordinates(location);
                    let reports_cached = {
                        let stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                        stats.last_batch_size
                    };
                    let body = MessageBody::ScoutScanResult {
                        location: location.clone(),
                        coordinates,
                        reports_cached,
                    };
                    let reply = AclMessage::inform_reply(&msg, self.agent_id.clone(), body);
                    if let Err(e) = self.bus.send(reply) {
                        warn!(agent = %self.agent_id, error = %e, "failed to reply to scan request");
                    }
                    // A scan is also a good moment to refresh the feed
                    self.spawn_poll();
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

        if self.poll_due() && !self.in_flight.load(Ordering::SeqCst) {
            self.spawn_poll();
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct PollWorker {
    agent_id: String,
    bus: Arc<MessageBus>,
    hazard_agent_id: String,
    config: Arc<SystemConfig>,
    llm: Arc<LlmService>,
    nlp: Arc<NlpProcessor>,
    geocoder: Arc<Geocoder>,
    social: Arc<SocialClient>,
    seen_posts: Arc<Mutex<HashSet<String>>>,
    stats: Arc<Mutex<ScoutStats>>,
    in_flight: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl PollWorker {
    async fn run(self) {
        let reports = tokio::select! {
            () = self.cancel.cancelled() => None,
            reports = self.poll_and_process() => Some(reports),
        };
        self.in_flight.store(false, Ordering::SeqCst);

        let Some(reports) = reports else { return };
        if self.cancel.is_cancelled() || reports.is_empty() {
            return;
        }

        let visual_evidence_count = reports.iter().filter(|r| r.visual_evidence).count();
        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.reports_emitted += reports.len() as u64;
            stats.last_batch_size = reports.len();
            stats.last_visual_count = visual_evidence_count;
        }

        let count = reports.len();
        let msg = AclMessage::inform(
            self.agent_id.clone(),
            self.hazard_agent_id.clone(),
            MessageBody::ScoutReportBatch {
                reports,
                report_count: count,
                visual_evidence_count,
                processing_version: PROCESSING_VERSION.into(),
            },
            None,
        );
        match self.bus.send(msg) {
            Ok(()) => info!(
                agent = %self.agent_id,
                reports = count,
                visual = visual_evidence_count,
                "scout report batch sent"
            ),
            Err(e) => error!(agent = %self.agent_id, error = %e, "failed to send scout batch"),
        }
    }

    async fn poll_and_process(&self) -> Vec<ScoutReport> {
        let posts = match self.social.get_posts().await {
            Ok(posts) => posts,
            Err(e) => {
                error!(agent = %self.agent_id, error = %e, "social feed fetch failed");
                return Vec::new();
            }
        };

        let new_posts: Vec<SocialPost> = {
            let mut seen = self.seen_posts.lock().unwrap_or_else(|e| e.into_inner());
            posts
                .into_iter()
                .filter(|p| seen.insert(p.tweet_id.clone()))
                .collect()
        };
        if new_posts.is_empty() {
            debug!(agent = %self.agent_id, "no new posts this cycle");
            return Vec::new();
        }
        info!(agent = %self.agent_id, posts = new_posts.len(), "processing new posts");

        // Posts analyze independently; vision and text calls run concurrently
        let outcomes =
            futures::future::join_all(new_posts.iter().map(|post| self.process_post(post))).await;

        let mut reports = Vec::new();
        let mut skipped_no_coords = 0u64;
        for outcome in outcomes {
            match outcome {
                PostOutcome::Report(report) => reports.push(*report),
                PostOutcome::NoCoordinates => skipped_no_coords += 1,
                PostOutcome::NotFloodRelated => {}
            }
        }

        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            stats.posts_processed += new_posts.len() as u64;
            stats.skipped_no_coordinates += skipped_no_coords;
        }
        if skipped_no_coords > 0 {
            warn!(
                agent = %self.agent_id,
                skipped = skipped_no_coords,
                "flood-related posts dropped for lack of coordinates"
            );
        }
        reports
    }

    async fn process_post(&self, post: &SocialPost) -> PostOutcome {
        // 1. Vision, when an image rides along
        let visual = match &post.image_path {
            Some(path) => self.llm.analyze_flood_image(path).await,
            None => None,
        };
        let visual_evidence = visual
            .as_ref()
            .map_or(false, |v| v.estimated_depth_m.is_some() || v.risk_score > 0.0);
        let visual_risk = visual.as_ref().map_or(0.0, |v| v.risk_score);

        // 2. Text: LLM preferred, deterministic NLP fallback
        let (location_hint, text_severity, text_confidence, report_type, passable, flood_related) =
            match self.llm.analyze_text_report(&post.text).await {
                Some(analysis) => {
                    let report_type = match analysis.report_type.as_deref() {
                        Some("clear") => ReportType::Clear,
                        Some("blocked") => ReportType::Blocked,
                        Some("traffic") => ReportType::Traffic,
                        Some("observation") => ReportType::Observation,
                        _ => ReportType::Flood,
                    };
                    (
                        analysis.location,
                        analysis.severity,
                        analysis.confidence,
                        report_type,
                        None,
                        analysis.is_flood_related,
                    )
                }
                None => {
                    let info = self.nlp.extract_flood_info(&post.text);
                    (
                        info.location,
                        info.severity,
                        info.confidence,
                        info.report_type,
                        info.passable,
                        info.is_flood_related,
                    )
                }
            };

        if !flood_related && !visual_evidence {
            return PostOutcome::NotFloodRelated;
        }

        // 3. Cross-modal fusion
        let final_risk = visual_risk.max(text_severity);
        let confidence = if visual_evidence && final_risk > 0.5 { 0.9 } else { text_confidence };
        let report_type = if final_risk > 0.3 { report_type } else { ReportType::Observation };

        // 4. Geocode; no coordinates means no spatial anchor, drop the report
        let location = location_hint.unwrap_or_else(|| "Marikina".to_string());
        let Some(coordinates) = self.geocoder.get_coordinates(&location) else {
            debug!(agent = %self.agent_id, location = %location, "post location not geocodable");
            return PostOutcome::NoCoordinates;
        };
        if !self.config.in_bounds(coordinates.lat, coordinates.lon) {
            return PostOutcome::NoCoordinates;
        }

        PostOutcome::Report(Box::new(ScoutReport {
            location,
            coordinates: Some(coordinates),
            severity: final_risk.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            report_type,
            passable,
            visual_evidence,
            visual,
            text: post.text.clone(),
            source: "social".into(),
            timestamp: post.timestamp.unwrap_or_else(Utc::now),
        }))
    }
}

enum PostOutcome {
    Report(Box<ScoutReport>),
    NoCoordinates,
    NotFloodRelated,
}

// ============================================================================
// Tests
// ============================================================================
