//! Orchestrator Agent — chat interpretation and mission state machines
//!
//! Central coordinator. Missions are finite state machines advanced by
//! INFORM replies correlated on `conversation_id = mission_id`:
//!
//! | mission | transitions |
//! |---|---|
//! | `assess_risk` | PENDING -> AWAITING_SCOUT? -> AWAITING_FLOOD -> AWAITING_HAZARD -> AWAITING_RISK_QUERY -> COMPLETED |
//! | `coordinated_evacuation` | PENDING -> AWAITING_EVACUATION -> COMPLETED |
//! | `route_calculation` | PENDING -> AWAITING_ROUTING -> COMPLETED |
//! | `cascade_risk_update` | PENDING -> AWAITING_FLOOD -> AWAITING_HAZARD -> COMPLETED |
//!
//! FAILURE/REFUSE move the mission to FAILED; the per-tick timeout scan moves
//! overdue missions to TIMED_OUT. Terminal missions land in a bounded history
//! ring with an id index kept consistent on eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use super::Agent;
use crate::comms::{AclMessage, MessageBody, MessageBus, Performative};
use crate::config::{defaults, SystemConfig};
use crate::llm::{json_repair, ChatMessage, LlmService};
use crate::nlp::geocoder::Geocoder;
use crate::types::{GeoPoint, Mission, MissionState, MissionType, RoutePreferences};

const SYSTEM_PROMPT: &str = "You are the brain of a multi-agent flood routing system EXCLUSIVELY \
for Marikina City, Philippines. Interpret the user's natural language request and decide which \
mission to create. You have conversation history, so follow-up messages like \"now route me \
there\" must resolve against it.\n\
SCOPE RESTRICTION: you ONLY handle Marikina City flood routing, risk assessment, evacuation, \
and navigation. For anything else (general knowledge, coding, math, jokes, other cities) \
respond with {\"mission_type\": \"off_topic\", \"params\": {}, \"reasoning\": \"This query is \
outside my scope.\"}\n\
Available mission types:\n\
1. \"assess_risk\" - full risk pipeline. Params: \"location\" (string). Omit location to just \
refresh flood+hazard data.\n\
2. \"route_calculation\" - safe route between two points. Params: \"start\" and \"end\", BOTH \
as [lat, lng] arrays. If only one place is known, use the city center [14.6507, 121.1029] for \
the other.\n\
3. \"coordinated_evacuation\" - distress call. Params: \"user_location\" ([lat, lng]) and \
\"message\" (string).\n\
4. \"cascade_risk_update\" - refresh flood data and recalculate risk. No params.\n\
Reference coordinates: city center [14.6507, 121.1029]; Tumana [14.6608, 121.1004]; Malanday \
[14.6653, 121.1023]; Concepcion Uno [14.6416, 121.0978]; Nangka [14.6568, 121.1107]; Sto. Nino \
[14.6395, 121.0908]; Industrial Valley [14.6332, 121.0959].\n\
If the user names a place without exact coordinates, use \"assess_risk\" with the location \
name. Flood/risk questions -> assess_risk. Going somewhere -> route_calculation. In danger -> \
coordinated_evacuation. Refresh/update -> cascade_risk_update.\n\
Respond with ONLY valid JSON: {\"mission_type\": \"...\", \"params\": {...}, \"reasoning\": \
\"one sentence\"}";

const SUMMARIZE_PROMPT: &str = "You are the brain of a multi-agent flood routing system for \
Marikina City. Summarize the following mission results in 2-3 sentences for a user who needs \
clear, actionable information. Use simple language. If there is a route, mention the distance. \
If the mission failed, explain simply. The results may include a \"map_risk\" key with the \
current road-network risk at the queried location (avg_risk, max_risk, risk_level, \
high_risk_edges, impassable_edges); always include that information when present.\n\
Mission data:\n";

/// Roles the orchestrator coordinates, mapped to concrete agent ids at
/// construction time.
pub const ROLES: &[&str] = &["scout", "flood", "routing", "evacuation", "hazard"];

pub struct OrchestratorAgent {
    agent_id: String,
    bus: Arc<MessageBus>,
    config: Arc<SystemConfig>,
    llm: Arc<LlmService>,
    geocoder: Arc<Geocoder>,
    /// role -> agent id
    sub_agents: HashMap<String, String>,

    missions: HashMap<String, Mission>,
    completed_order: VecDeque<String>,
    completed: HashMap<String, Mission>,
    mission_seq: u64,

    chat_history: Vec<ChatMessage>,
}

impl OrchestratorAgent {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        config: Arc<SystemConfig>,
        llm: Arc<LlmService>,
        geocoder: Arc<Geocoder>,
        sub_agents: HashMap<String, String>,
    ) -> Self {
        let agent_id = agent_id.into();
        for role in ROLES {
            if !sub_agents.contains_key(*role) {
                warn!(agent = %agent_id, role, "orchestrator missing sub-agent for role");
            }
        }
        info!(
            agent = %agent_id,
            agents = ?sub_agents.keys().collect::<Vec<_>>(),
            "orchestrator initialized"
        );
        Self {
            agent_id,
            bus,
            config,
            llm,
            geocoder,
            sub_agents,
            missions: HashMap::new(),
            completed_order: VecDeque::new(),
            completed: HashMap::new(),
            mission_seq: 0,
            chat_history: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Mission lifecycle
    // ------------------------------------------------------------------

    fn next_mission_id(&mut self) -> String {
        self.mission_seq += 1;
        let seed = format!("{}-{}", self.mission_seq, Utc::now().timestamp_nanos_opt().unwrap_or(0));
        format!("{:x}", md5::compute(seed.as_bytes()))[..8].to_string()
    }

    fn timeout_for(&self, mission_type: MissionType) -> f64 {
        let t = &self.config.orchestrator.mission_timeouts;
        match mission_type {
            MissionType::AssessRisk => t.assess_risk,
            MissionType::CoordinatedEvacuation => t.coordinated_evacuation,
            MissionType::RouteCalculation => t.route_calculation,
            MissionType::CascadeRiskUpdate => t.cascade_risk_update,
        }
    }

    /// Create and start a new mission. Returns a tracking handle or an error
    /// object when the concurrency limit is reached.
    pub fn start_mission(&mut self, mission_type: MissionType, params: Value) -> Value {
        let max = self.config.orchestrator.max_concurrent_missions;
        if self.missions.len() >= max {
            return json!({
                "status": "error",
                "message": format!("Max concurrent missions ({max}) reached"),
            });
        }

        let id = self.next_mission_id();
        let timeout = self.timeout_for(mission_type);
        let mission = Mission::new(id.clone(), mission_type, params, timeout);
        info!(mission = %id, %mission_type, timeout, "mission created");
        self.missions.insert(id.clone(), mission);

        self.advance_mission(&id);

        // The first advance may already have completed or failed the mission
        let snapshot = self.mission_snapshot(&id);
        snapshot.map_or_else(
            || json!({"status": "error", "message": "mission vanished"}),
            |m| {
                json!({
                    "mission_id": m["mission_id"],
                    "type": m["type"],
                    "state": m["state"],
                    "created_at": m["created_at"],
                })
            },
        )
    }

    /// Full mission record, active or archived.
    pub fn mission_snapshot(&self, mission_id: &str) -> Option<Value> {
        let mission = self.missions.get(mission_id).or_else(|| self.completed.get(mission_id))?;
        Some(json!({
            "mission_id": mission.id,
            "type": mission.mission_type.as_str(),
            "state": mission.state.to_string(),
            "params": mission.params,
            "results": mission.results,
            "error": mission.error,
            "created_at": mission.created_at.to_rfc3339(),
            "completed_at": mission.completed_at.map(|t| t.to_rfc3339()),
            "elapsed_seconds": mission.elapsed_seconds(),
        }))
    }

    pub fn active_missions(&self) -> Vec<Value> {
        self.missions
            .values()
            .map(|m| {
                json!({
                    "mission_id": m.id,
                    "type": m.mission_type.as_str(),
                    "state": m.state.to_string(),
                    "elapsed_seconds": m.elapsed_seconds(),
                })
            })
            .collect()
    }

    fn complete_mission(&mut self, mission_id: &str, state: MissionState, error: Option<String>) {
        let Some(mut mission) = self.missions.remove(mission_id) else { return };
        mission.state = state;
        mission.completed_at = Some(Utc::now());
        if error.is_some() {
            mission.error = error;
        }
        info!(
            mission = %mission_id,
            state = %state,
            mission_type = %mission.mission_type,
            error = ?mission.error,
            "mission finished"
        );

        // Ring eviction keeps the index consistent with the order queue
        if self.completed_order.len() >= self.config.orchestrator.max_completed_history {
            if let Some(evicted) = self.completed_order.pop_front() {
                self.completed.remove(&evicted);
            }
        }
        self.completed_order.push_back(mission_id.to_string());
        self.completed.insert(mission_id.to_string(), mission);
    }

    fn check_timeouts(&mut self) {
        let now = Utc::now();
        let overdue: Vec<String> = self
            .missions
            .values()
            .filter(|m| m.is_timed_out(now))
            .map(|m| m.id.clone())
            .collect();
        for id in overdue {
            warn!(mission = %id, "mission timed out");
            self.complete_mission(&id, MissionState::TimedOut, Some("Mission timed out".into()));
        }
    }

    // ------------------------------------------------------------------
    // FSM advancement
    // ------------------------------------------------------------------

    fn advance_mission(&mut self, mission_id: &str) {
        let Some(mission) = self.missions.get(mission_id) else { return };
        match mission.mission_type {
            MissionType::AssessRisk => self.advance_assess_risk(mission_id),
            MissionType::CoordinatedEvacuation => self.advance_evacuation(mission_id),
            MissionType::RouteCalculation => self.advance_route_calculation(mission_id),
            MissionType::CascadeRiskUpdate => self.advance_cascade_update(mission_id),
        }
    }

    fn advance_assess_risk(&mut self, mission_id: &str) {
        let Some(mission) = self.missions.get(mission_id) else { return };
        let state = mission.state;
        let location = mission
            .params
            .get("location")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from);

        match state {
            MissionState::Pending => match location {
                Some(location) => {
                    self.set_state(mission_id, MissionState::AwaitingScout);
                    self.send_request(mission_id, "scout", MessageBody::ScanLocation { location });
                }
                None => {
                    self.set_state(mission_id, MissionState::AwaitingFlood);
                    self.send_request(mission_id, "flood", MessageBody::CollectData);
                }
            },
            MissionState::AwaitingScout => {
                self.set_state(mission_id, MissionState::AwaitingFlood);
                self.send_request(mission_id, "flood", MessageBody::CollectData);
            }
            MissionState::AwaitingFlood => {
                self.set_state(mission_id, MissionState::AwaitingHazard);
                self.send_request(mission_id, "hazard", MessageBody::ProcessAndUpdate);
            }
            MissionState::AwaitingHazard => {
                // Prefer coordinates the scout resolved; fall back to the
                // configured named-location table
                let coords = self
                    .missions
                    .get(mission_id)
                    .and_then(|m| m.results.get("scout"))
                    .and_then(|scout| scout.get("coordinates"))
                    .and_then(|c| {
                        let lat = json_repair::f64_field(c, "lat")?;
                        let lon = json_repair::f64_field(c, "lon")?;
                        Some(GeoPoint::new(lat, lon))
                    })
                    .or_else(|| location.as_deref().and_then(|l| self.location_to_coords(l)));

                match coords {
                    Some(point) => {
                        self.set_state(mission_id, MissionState::AwaitingRiskQuery);
                        self.send_request(
                            mission_id,
                            "hazard",
                            MessageBody::QueryRiskAtLocation {
                                lat: point.lat,
                                lon: point.lon,
                                radius_m: self.config.hazard.risk_radius_m,
                            },
                        );
                    }
                    None => self.complete_mission(mission_id, MissionState::Completed, None),
                }
            }
            MissionState::AwaitingRiskQuery => {
                self.complete_mission(mission_id, MissionState::Completed, None);
            }
            _ => {}
        }
    }

    fn advance_evacuation(&mut self, mission_id: &str) {
        let Some(mission) = self.missions.get(mission_id) else { return };
        match mission.state {
            MissionState::Pending => {
                let user_location = mission
                    .params
                    .get("user_location")
                    .and_then(value_to_point);
                let message = mission
                    .params
                    .get("message")
                    .and_then(Value::as_str)
                    .map(String::from);
                let (Some(user_location), Some(message)) = (user_location, message) else {
                    self.complete_mission(
                        mission_id,
                        MissionState::Failed,
                        Some("Missing 'user_location' or 'message'".into()),
                    );
                    return;
                };
                self.set_state(mission_id, MissionState::AwaitingEvacuation);
                self.send_request(
                    mission_id,
                    "evacuation",
                    MessageBody::HandleDistressCall { user_location, message },
                );
            }
            MissionState::AwaitingEvacuation => {
                self.complete_mission(mission_id, MissionState::Completed, None);
            }
            _ => {}
        }
    }

    fn advance_route_calculation(&mut self, mission_id: &str) {
        let Some(mission) = self.missions.get(mission_id) else { return };
        match mission.state {
            MissionState::Pending => {
                let start = mission.params.get("start").and_then(value_to_point);
                let end = mission.params.get("end").and_then(value_to_point);
                let (Some(start), Some(end)) = (start, end) else {
                    self.complete_mission(
                        mission_id,
                        MissionState::Failed,
                        Some("Missing 'start' or 'end' coordinates".into()),
                    );
                    return;
                };
                let preferences = mission
                    .params
                    .get("preferences")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<RoutePreferences>(v).ok())
                    .unwrap_or_default();
                self.set_state(mission_id, MissionState::AwaitingRouting);
                self.send_request(
                    mission_id,
                    "routing",
                    MessageBody::CalculateRoute { start, end, preferences },
                );
            }
            MissionState::AwaitingRouting => {
                self.complete_mission(mission_id, MissionState::Completed, None);
            }
            _ => {}
        }
    }

    fn advance_cascade_update(&mut self, mission_id: &str) {
        let Some(mission) = self.missions.get(mission_id) else { return };
        match mission.state {
            MissionState::Pending => {
                self.set_state(mission_id, MissionState::AwaitingFlood);
                self.send_request(mission_id, "flood", MessageBody::CollectData);
            }
            MissionState::AwaitingFlood => {
                self.set_state(mission_id, MissionState::AwaitingHazard);
                self.send_request(mission_id, "hazard", MessageBody::ProcessAndUpdate);
            }
            MissionState::AwaitingHazard => {
                self.complete_mission(mission_id, MissionState::Completed, None);
            }
            _ => {}
        }
    }

    fn set_state(&mut self, mission_id: &str, state: MissionState) {
        if let Some(mission) = self.missions.get_mut(mission_id) {
            mission.state = state;
        }
    }

    fn send_request(&mut self, mission_id: &str, role: &str, body: MessageBody) {
        let Some(receiver) = self.sub_agents.get(role).cloned() else {
            error!(mission = %mission_id, role, "no agent registered for role");
            self.complete_mission(
                mission_id,
                MissionState::Failed,
                Some(format!("Agent for role '{role}' not available")),
            );
            return;
        };

        let action = body.tag();
        let msg = AclMessage::request(
            self.agent_id.clone(),
            receiver.clone(),
            body,
            Some(mission_id.to_string()),
        );
        match self.bus.send(msg) {
            Ok(()) => {
                info!(mission = %mission_id, to = %receiver, action, "REQUEST dispatched");
            }
            Err(e) => {
                error!(mission = %mission_id, to = %receiver, error = %e, "failed to send REQUEST");
                self.complete_mission(
                    mission_id,
                    MissionState::Failed,
                    Some(format!("Failed to send request to {role}: {e}")),
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Reply handling
    // ------------------------------------------------------------------

    fn role_of_sender(&self, sender: &str) -> String {
        self.sub_agents
            .iter()
            .find(|(_, id)| id.as_str() == sender)
            .map_or_else(|| sender.to_string(), |(role, _)| role.clone())
    }

    fn handle_inform(&mut self, msg: &AclMessage) {
        let Some(conv_id) = msg.conversation_id.clone() else {
            debug!(from = %msg.sender, "INFORM without conversation id ignored");
            return;
        };
        if !self.missions.contains_key(&conv_id) {
            debug!(conversation = %conv_id, from = %msg.sender, "INFORM for unknown conversation");
            return;
        }

        // Hazard sends two distinct INFORMs in one mission; keep both by
        // storing the location-risk reply under its own key
        let key = if msg.body.info_type() == Some("location_risk_result") {
            "map_risk".to_string()
        } else {
            self.role_of_sender(&msg.sender)
        };
        let value = msg.body.to_result_value();

        if let Some(mission) = self.missions.get_mut(&conv_id) {
            mission.results.insert(key, value);
            info!(
                mission = %conv_id,
                from = %msg.sender,
                info_type = ?msg.body.info_type(),
                state = %mission.state,
                "INFORM received"
            );
        }
        self.advance_mission(&conv_id);
    }

    fn handle_failure(&mut self, msg: &AclMessage) {
        let Some(conv_id) = msg.conversation_id.clone() else { return };
        if !self.missions.contains_key(&conv_id) {
            return;
        }
        let error = match &msg.body {
            MessageBody::Failure { error } => error.clone(),
            _ => "Unknown error".to_string(),
        };
        let role = self.role_of_sender(&msg.sender);
        if let Some(mission) = self.missions.get_mut(&conv_id) {
            mission.results.insert(role, json!({"error": error}));
        }
        warn!(mission = %conv_id, from = %msg.sender, error = %error, "FAILURE received");
        self.complete_mission(&conv_id, MissionState::Failed, Some(error));
    }

    fn handle_refuse(&mut self, msg: &AclMessage) {
        let Some(conv_id) = msg.conversation_id.clone() else { return };
        if !self.missions.contains_key(&conv_id) {
            return;
        }
        let reason = match &msg.body {
            MessageBody::Refusal { reason } => reason.clone(),
            _ => "Unknown reason".to_string(),
        };
        warn!(mission = %conv_id, from = %msg.sender, reason = %reason, "REFUSE received");
        self.complete_mission(
            &conv_id,
            MissionState::Failed,
            Some(format!("Refused by {}: {reason}", msg.sender)),
        );
    }

    // ------------------------------------------------------------------
    // Location helpers
    // ------------------------------------------------------------------

    /// Geocoder first, then the configured named-location fallback table.
    fn location_to_coords(&self, location: &str) -> Option<GeoPoint> {
        if let Some(point) = self.geocoder.get_coordinates(location) {
            return Some(point);
        }
        let query = location.to_lowercase();
        let query = query
            .trim_start_matches("barangay ")
            .trim_start_matches("brgy. ")
            .trim_start_matches("brgy ")
            .trim();
        self.config
            .orchestrator
            .barangay_coords
            .iter()
            .find(|(name, _)| query.contains(name.as_str()) || name.contains(query))
            .map(|(_, [lat, lon])| GeoPoint::new(*lat, *lon))
    }

    // ------------------------------------------------------------------
    // LLM-powered interpretation
    // ------------------------------------------------------------------

    /// Interpret a natural language request into a mission proposal.
    pub async fn interpret_request(&mut self, user_message: &str) -> Value {
        if !self.llm.is_available().await {
            return json!({
                "status": "error",
                "message": "LLM service is not currently reachable",
            });
        }

        let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
        messages.extend(self.chat_history.iter().cloned());
        messages.push(ChatMessage::user(user_message));

        let raw = self.llm.text_chat_multi(&messages).await;
        if raw.is_empty() {
            return json!({"status": "error", "message": "LLM returned empty response"});
        }

        let Some(parsed) = json_repair::extract_json(&raw) else {
            let preview: String = raw.chars().take(200).collect();
            warn!(raw = %preview, "LLM reply was not valid JSON");
            return json!({
                "status": "error",
                "message": "LLM response was not valid JSON",
                "raw_response": raw.chars().take(500).collect::<String>(),
            });
        };

        let mission_type = json_repair::str_field(&parsed, "mission_type").unwrap_or_default();
        let reasoning = json_repair::str_field(&parsed, "reasoning").unwrap_or_default();

        if mission_type == "off_topic" {
            self.append_chat(user_message, &raw);
            return json!({"status": "off_topic", "message": reasoning});
        }

        let Some(mission_type) = MissionType::parse(&mission_type) else {
            return json!({
                "status": "error",
                "message": format!("LLM chose invalid mission type: {mission_type}"),
                "raw_response": raw.chars().take(500).collect::<String>(),
            });
        };

        self.append_chat(user_message, &raw);
        info!(%mission_type, reasoning = %reasoning, "request interpreted");

        json!({
            "status": "ok",
            "mission_type": mission_type.as_str(),
            "params": parsed.get("params").cloned().unwrap_or_else(|| json!({})),
            "reasoning": reasoning,
        })
    }

    fn append_chat(&mut self, user_msg: &str, assistant_msg: &str) {
        self.chat_history.push(ChatMessage::user(user_msg));
        self.chat_history.push(ChatMessage::assistant(assistant_msg));
        let max_messages = self.config.orchestrator.max_chat_turns * 2;
        if self.chat_history.len() > max_messages {
            let excess = self.chat_history.len() - max_messages;
            self.chat_history.drain(..excess);
        }
    }

    pub fn clear_chat_history(&mut self) {
        self.chat_history.clear();
    }

    /// End-to-end: interpret, repair params, create the mission.
    pub async fn chat_and_execute(&mut self, user_message: &str) -> Value {
        let interpretation = self.interpret_request(user_message).await;
        let status = interpretation.get("status").and_then(Value::as_str).unwrap_or("error");

        if status == "off_topic" {
            return json!({"status": "off_topic", "interpretation": interpretation, "mission": Value::Null});
        }
        if status != "ok" {
            return json!({"status": "error", "interpretation": interpretation, "mission": Value::Null});
        }

        let mission_type = interpretation
            .get("mission_type")
            .and_then(Value::as_str)
            .and_then(MissionType::parse)
            .unwrap_or(MissionType::CascadeRiskUpdate);
        let mut params = interpretation.get("params").cloned().unwrap_or_else(|| json!({}));
        fix_params(mission_type, &mut params);

        let mission = self.start_mission(mission_type, params.clone());

        json!({
            "status": "ok",
            "interpretation": {
                "mission_type": mission_type.as_str(),
                "params": params,
                "reasoning": interpretation.get("reasoning").cloned().unwrap_or_default(),
            },
            "mission": mission,
        })
    }

    /// Human-readable mission summary: LLM when reachable, deterministic
    /// fallback otherwise.
    pub async fn summarize_mission(&self, mission_id: &str) -> Value {
        let Some(mission) = self.mission_snapshot(mission_id) else {
            return json!({"status": "error", "message": "Mission not found"});
        };

        if self.llm.is_available().await {
            let prompt = format!(
                "{SUMMARIZE_PROMPT}{}",
                serde_json::to_string_pretty(&mission).unwrap_or_default()
            );
            let summary = self.llm.text_chat(&prompt).await;
            if !summary.is_empty() {
                return json!({
                    "status": "ok",
                    "summary": summary,
                    "mission": mission,
                    "llm_used": true,
                });
            }
        }

        json!({
            "status": "ok",
            "summary": fallback_summary(&mission),
            "mission": mission,
            "llm_used": false,
        })
    }

    /// Aggregated liveness of the orchestrator and its sub-agents.
    pub fn system_status(&self) -> Value {
        let mut agents = serde_json::Map::new();
        for (role, agent_id) in &self.sub_agents {
            let queued = self.bus.size(agent_id).unwrap_or(0);
            agents.insert(
                role.clone(),
                json!({"agent_id": agent_id, "status": "online", "queued_messages": queued}),
            );
        }
        json!({
            "orchestrator": "online",
            "timestamp": Utc::now().to_rfc3339(),
            "active_missions": self.missions.len(),
            "completed_missions": self.completed.len(),
            "agents": agents,
        })
    }
}

#[async_trait]
impl Agent for OrchestratorAgent {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn step(&mut self) {
        let mut processed = 0;
        while let Ok(Some(msg)) = self.bus.try_receive(&self.agent_id) {
            processed += 1;
            match msg.performative {
                Performative::Inform => self.handle_inform(&msg),
                Performative::Failure => self.handle_failure(&msg),
                Performative::Refuse => self.handle_refuse(&msg),
                performative => warn!(
                    agent = %self.agent_id,
                    %performative,
                    from = %msg.sender,
                    "unhandled performative"
                ),
            }
        }
        if processed > 0 {
            debug!(agent = %self.agent_id, processed, "messages processed");
        }
        self.check_timeouts();
    }
}

// ============================================================================
// Param repair
// ============================================================================

/// Parse a `[lat, lon]` JSON array (tolerating stringified numbers).
fn value_to_point(value: &Value) -> Option<GeoPoint> {
    let arr = value.as_array()?;
    if arr.len() < 2 {
        return None;
    }
    let num = |v: &Value| -> Option<f64> {
        match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    Some(GeoPoint::new(num(&arr[0])?, num(&arr[1])?))
}

/// Repair common LLM formatting mistakes in mission params.
pub fn fix_params(mission_type: MissionType, params: &mut Value) {
    let Some(obj) = params.as_object_mut() else { return };

    let unstringify = |value: &mut Value| {
        if let Value::String(s) = value {
            if let Ok(parsed) = serde_json::from_str::<Value>(s) {
                *value = parsed;
            }
        }
    };

    match mission_type {
        MissionType::RouteCalculation => {
            for key in ["start", "end"] {
                if let Some(value) = obj.get_mut(key) {
                    unstringify(value);
                    // Unwrap nested coordinate arrays: start takes the first
                    // pair, end the last
                    if let Value::Array(arr) = value {
                        if arr.first().map_or(false, Value::is_array) {
                            let pick = if key == "start" {
                                arr.first().cloned()
                            } else {
                                arr.last().cloned()
                            };
                            if let Some(pair) = pick {
                                *value = pair;
                            }
                        }
                    }
                }
            }

            // Identical endpoints: consult alternates
            if obj.get("start") == obj.get("end") {
                if let Some(origin) = obj.remove("origin") {
                    obj.insert("start".into(), origin);
                }
                if let Some(destination) = obj.remove("destination") {
                    obj.insert("end".into(), destination);
                }
            }

            let city_center = json!([defaults::CITY_CENTER.0, defaults::CITY_CENTER.1]);
            for key in ["start", "end"] {
                let missing = obj
                    .get(key)
                    .map_or(true, |v| v.is_null() || value_to_point(v).is_none());
                if missing {
                    obj.insert(key.into(), city_center.clone());
                }
            }
        }
        MissionType::CoordinatedEvacuation => {
            if let Some(value) = obj.get_mut("user_location") {
                unstringify(value);
                if let Value::Array(arr) = value {
                    if arr.first().map_or(false, Value::is_array) {
                        if let Some(first) = arr.first().cloned() {
                            *value = first;
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Deterministic mission summary used when the LLM is down.
fn fallback_summary(mission: &Value) -> String {
    let state = mission.get("state").and_then(Value::as_str).unwrap_or("unknown");
    let mission_type = mission.get("type").and_then(Value::as_str).unwrap_or("unknown");
    let elapsed = mission.get("elapsed_seconds").and_then(Value::as_f64).unwrap_or(0.0);

    match state {
        "COMPLETED" => {
            let mut summary = format!(
                "Mission '{mission_type}' completed successfully in {elapsed:.1} seconds."
            );
            if let Some(map_risk) = mission.get("results").and_then(|r| r.get("map_risk")) {
                if map_risk.get("status").and_then(Value::as_str) == Some("ok") {
                    let level =
                        map_risk.get("risk_level").and_then(Value::as_str).unwrap_or("unknown");
                    let avg = map_risk.get("avg_risk").and_then(Value::as_f64).unwrap_or(0.0);
                    let max = map_risk.get("max_risk").and_then(Value::as_f64).unwrap_or(0.0);
                    let high =
                        map_risk.get("high_risk_edges").and_then(Value::as_u64).unwrap_or(0);
                    let impassable =
                        map_risk.get("impassable_edges").and_then(Value::as_u64).unwrap_or(0);
                    summary.push_str(&format!(
                        " Current map risk: {level} (avg={avg:.2}, max={max:.2}, \
                         {high} high-risk edges, {impassable} impassable)."
                    ));
                }
            }
            summary
        }
        "FAILED" | "TIMED_OUT" => {
            let error = mission.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            format!("Mission '{mission_type}' {}: {error}", state.to_lowercase())
        }
        _ => format!("Mission '{mission_type}' is in progress (state: {state})."),
    }
}

// ============================================================================
// Tests
// ============================================================================
