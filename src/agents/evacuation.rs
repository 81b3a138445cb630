//! Evacuation Manager Agent — distress calls and user feedback
//!
//! Distress handling: classify urgency via the LLM (defaults on failure),
//! force safest mode when configured, find the nearest evacuation center
//! through the shared planner, synthesize short instructions (LLM or a fixed
//! bilingual fallback), and record the call in a bounded history.
//!
//! User feedback (`clear | blocked | flooded | traffic`) is converted into a
//! synthesized scout report with type-dependent confidence and forwarded to
//! the hazard agent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::Agent;
use crate::comms::{AclMessage, DistressOutcome, MessageBody, MessageBus, Performative};
use crate::config::SystemConfig;
use crate::llm::{json_repair, LlmService};
use crate::routing::RoutePlanner;
use crate::types::{GeoPoint, ReportType, RoutePreferences, ScoutReport};

const FALLBACK_INSTRUCTIONS: &str = "Pumunta sa pinakamalapit na evacuation center. \
     Mag-ingat sa malalim na baha at malakas na agos.";

/// Distress classification with graceful defaults.
#[derive(Debug, Clone)]
struct DistressContext {
    urgency: String,
    injury: bool,
    children: bool,
    elderly: bool,
    mobility: bool,
}

impl Default for DistressContext {
    fn default() -> Self {
        Self {
            urgency: "medium".into(),
            injury: false,
            children: false,
            elderly: false,
            mobility: false,
        }
    }
}

#[derive(Debug, Clone)]
struct DistressRecord {
    location: GeoPoint,
    message: String,
    urgency: String,
    status: String,
    timestamp: DateTime<Utc>,
}

pub struct EvacuationManagerAgent {
    agent_id: String,
    bus: Arc<MessageBus>,
    hazard_agent_id: String,
    config: Arc<SystemConfig>,
    llm: Arc<LlmService>,
    planner: Arc<RoutePlanner>,
    distress_history: Arc<Mutex<VecDeque<DistressRecord>>>,
    feedback_count: u64,
    cancel: CancellationToken,
}

impl EvacuationManagerAgent {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        hazard_agent_id: impl Into<String>,
        config: Arc<SystemConfig>,
        llm: Arc<LlmService>,
        planner: Arc<RoutePlanner>,
        cancel: CancellationToken,
    ) -> Self {
        let agent_id = agent_id.into();
        info!(
            agent = %agent_id,
            safest_mode = config.evacuation.always_use_safest_mode,
            "evacuation manager initialized"
        );
        Self {
            agent_id,
            bus,
            hazard_agent_id: hazard_agent_id.into(),
            config,
            llm,
            planner,
            distress_history: Arc::new(Mutex::new(VecDeque::new())),
            feedback_count: 0,
            cancel,
        }
    }

    fn spawn_distress_call(&self, msg: AclMessage, user_location: GeoPoint, message: String) {
        let agent_id = self.agent_id.clone();
        let bus = Arc::clone(&self.bus);
        let config = Arc::clone(&self.config);
        let llm = Arc::clone(&self.llm);
        let planner = Arc::clone(&self.planner);
        let history = Arc::clone(&self.distress_history);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let outcome =
                handle_distress_call(&agent_id, &config, &llm, &planner, user_location, &message)
                    .await;

            {
                let mut history = history.lock().unwrap_or_else(|e| e.into_inner());
                history.push_back(DistressRecord {
                    location: user_location,
                    message: message.clone(),
                    urgency: outcome.urgency.clone(),
                    status: outcome.status.clone(),
                    timestamp: Utc::now(),
                });
                while history.len() > config.evacuation.max_history {
                    history.pop_front();
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            let reply = AclMessage::inform_reply(
                &msg,
                agent_id.clone(),
                MessageBody::DistressCallResult(outcome),
            );
            if let Err(e) = bus.send(reply) {
                warn!(agent = %agent_id, error = %e, "failed to send distress reply");
            }
        });
    }

    /// Convert user feedback into a synthesized scout report for the hazard
    /// agent. Confidence depends on the feedback type and evidence.
    /// Returns `(accepted, confidence)`.
    pub fn collect_feedback(
        &mut self,
        feedback_type: &str,
        location: Option<GeoPoint>,
        severity: Option<f64>,
        description: Option<String>,
        has_photo: bool,
    ) -> (bool, f64) {
        let fc = &self.config.evacuation.feedback_confidence;
        let (report_type, confidence, default_severity) = match feedback_type {
            "blocked" => (
                ReportType::Blocked,
                if has_photo { fc.blocked_with_photo } else { fc.blocked },
                0.8,
            ),
            "flooded" => (ReportType::Flooded, fc.flooded, 0.7),
            "clear" => (ReportType::Clear, fc.clear, 0.0),
            "traffic" => (ReportType::Traffic, fc.traffic, 0.3),
            other => {
                warn!(agent = %self.agent_id, feedback_type = other, "unknown feedback type");
                return (false, 0.0);
            }
        };

        let Some(location) = location else {
            warn!(agent = %self.agent_id, "feedback without location dropped");
            return (false, 0.0);
        };

        let report = ScoutReport {
            location: format!("{:.4},{:.4}", location.lat, location.lon),
            coordinates: Some(location),
            severity: severity.unwrap_or(default_severity).clamp(0.0, 1.0),
            confidence,
            report_type,
            passable: match report_type {
                ReportType::Clear => Some(true),
                ReportType::Blocked | ReportType::Flooded => Some(false),
                _ => None,
            },
            visual_evidence: has_photo,
            visual: None,
            text: description.unwrap_or_else(|| format!("user feedback: {feedback_type}")),
            source: "user_feedback".into(),
            timestamp: Utc::now(),
        };

        let msg = AclMessage::inform(
            self.agent_id.clone(),
            self.hazard_agent_id.clone(),
            MessageBody::ScoutReportBatch {
                reports: vec![report],
                report_count: 1,
                visual_evidence_count: usize::from(has_photo),
                processing_version: "feedback".into(),
            },
            None,
        );
        match self.bus.send(msg) {
            Ok(()) => {
                self.feedback_count += 1;
                info!(
                    agent = %self.agent_id,
                    feedback_type,
                    confidence,
                    "feedback forwarded as scout report"
                );
                (true, confidence)
            }
            Err(e) => {
                warn!(agent = %self.agent_id, error = %e, "failed to forward feedback");
                (false, confidence)
            }
        }
    }

    pub fn stats(&self) -> serde_json::Value {
        let history = self.distress_history.lock().unwrap_or_else(|e| e.into_inner());
        serde_json::json!({
            "agent_id": self.agent_id,
            "distress_calls": history.len(),
            "feedback_received": self.feedback_count,
        })
    }
}

#[async_trait]
impl Agent for EvacuationManagerAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn step(&mut self) {
        while let Ok(Some(msg)) = self.bus.try_receive(&self.agent_id) {
            match (msg.performative, msg.body.clone()) {
                (Performative::Request, MessageBody::HandleDistressCall { user_location, message }) => {
                    info!(agent = %self.agent_id, from = %msg.sender, "distress call received");
                    self.spawn_distress_call(msg, user_location, message);
                }
                (
                    Performative::Request,
                    MessageBody::CollectFeedback {
                        feedback_type,
                        location,
                        severity,
                        description,
                        has_photo,
                        ..
                    },
                ) => {
                    let (accepted, confidence) = self.collect_feedback(
                        &feedback_type,
                        location,
                        severity,
                        description,
                        has_photo,
                    );
                    let reply = AclMessage::inform_reply(
                        &msg,
                        self.agent_id.clone(),
                        MessageBody::FeedbackResult { accepted, confidence },
                    );
                    if let Err(e) = self.bus.send(reply) {
                        warn!(agent = %self.agent_id, error = %e, "failed to reply to feedback");
                    }
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
    }
}

// ============================================================================
// Distress pipeline (worker side)
// ============================================================================

async fn handle_distress_call(
    agent_id: &str,
    config: &SystemConfig,
    llm: &LlmService,
    planner: &RoutePlanner,
    location: GeoPoint,
    message: &str,
) -> DistressOutcome {
    if !config.in_bounds(location.lat, location.lon) {
        return DistressOutcome {
            status: "error".into(),
            urgency: "medium".into(),
            instructions: FALLBACK_INSTRUCTIONS.into(),
            recommendation: None,
            error: Some(format!(
                "invalid coordinates ({:.4}, {:.4})",
                location.lat, location.lon
            )),
        };
    }

    let context = classify_distress(llm, message).await;
    info!(
        agent = %agent_id,
        urgency = %context.urgency,
        children = context.children,
        elderly = context.elderly,
        "distress call classified"
    );

    let preferences = if config.evacuation.always_use_safest_mode {
        RoutePreferences::safest()
    } else {
        RoutePreferences::default()
    };

    let recommendation = match planner.find_nearest_center(location, &preferences) {
        Ok(rec) => rec,
        Err(e) => {
            return DistressOutcome {
                status: "error".into(),
                urgency: context.urgency,
                instructions: FALLBACK_INSTRUCTIONS.into(),
                recommendation: None,
                error: Some(e.to_string()),
            };
        }
    };

    let instructions = generate_instructions(llm, &context, &recommendation).await;
    let status = recommendation.status.clone();

    DistressOutcome {
        status,
        urgency: context.urgency,
        instructions,
        recommendation: Some(recommendation),
        error: None,
    }
}

/// LLM urgency classification; defaults to medium on any failure.
async fn classify_distress(llm: &LlmService, message: &str) -> DistressContext {
    let defaults = DistressContext::default();
    if message.trim().is_empty() || !llm.is_available().await {
        return defaults;
    }

    let prompt = format!(
        "You are a flood emergency dispatcher for Marikina City.\n\
         Classify this distress message. Return ONLY JSON:\n\
         {{\"urgency\": \"critical/high/medium/low\", \"injury\": bool,\n\
         \"children\": bool, \"elderly\": bool, \"mobility\": bool}}\n\
         Rules: critical = life-threatening or trapped; high = imminent danger,\n\
         children/elderly present; medium = requesting evacuation; low = precautionary.\n\
         Message: \"{message}\""
    );

    let raw = llm.text_chat(&prompt).await;
    let Some(value) = json_repair::extract_json(&raw) else { return defaults };

    let urgency = match json_repair::str_field(&value, "urgency").as_deref() {
        Some(u @ ("critical" | "high" | "medium" | "low")) => u.to_string(),
        _ => defaults.urgency.clone(),
    };
    DistressContext {
        urgency,
        injury: json_repair::bool_field(&value, "injury").unwrap_or(false),
        children: json_repair::bool_field(&value, "children").unwrap_or(false),
        elderly: json_repair::bool_field(&value, "elderly").unwrap_or(false),
        mobility: json_repair::bool_field(&value, "mobility").unwrap_or(false),
    }
}

/// 2-3 sentence instructions via the LLM, or the fixed bilingual fallback.
async fn generate_instructions(
    llm: &LlmService,
    context: &DistressContext,
    recommendation: &crate::comms::EvacuationRecommendation,
) -> String {
    if !llm.is_available().await {
        return FALLBACK_INSTRUCTIONS.into();
    }

    let target = recommendation
        .center
        .as_ref()
        .map_or("the nearest evacuation center".to_string(), |c| c.name.clone());
    let (distance, risk) = recommendation
        .route
        .as_ref()
        .map_or((0.0, 0.0), |r| (r.distance, r.risk_level));

    let prompt = format!(
        "You are a flood evacuation assistant for Marikina City. Generate 2-3 sentences \
         of clear evacuation instructions in simple English with Filipino terms where \
         helpful.\nTarget center: {target}\nDistance: {distance:.0} meters\n\
         Route risk: {risk:.2}\nUrgency: {}\nChildren present: {}\nElderly present: {}\n\
         Mobility impaired: {}\nInjury reported: {}\n\
         Return ONLY the instruction text.",
        context.urgency, context.children, context.elderly, context.mobility, context.injury
    );

    let text = llm.text_chat(&prompt).await;
    if text.trim().len() > 10 {
        text.trim().to_string()
    } else {
        FALLBACK_INSTRUCTIONS.into()
    }
}

// ============================================================================
// Tests
// ============================================================================
