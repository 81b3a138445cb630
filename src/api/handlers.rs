//! API request handlers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::ApiError;
use crate::agents::{EvacuationManagerAgent, OrchestratorAgent};
use crate::comms::MessageBus;
use crate::llm::LlmService;
use crate::routing::RoutePlanner;
use crate::types::{GeoPoint, MissionType, RoutePreferences};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Mutex<OrchestratorAgent>>,
    pub evacuation: Arc<Mutex<EvacuationManagerAgent>>,
    pub planner: Arc<RoutePlanner>,
    pub llm: Arc<LlmService>,
    pub bus: Arc<MessageBus>,
    pub tick_count: Arc<AtomicU64>,
}

fn parse_point(value: &[f64]) -> Result<GeoPoint, ApiError> {
    if value.len() < 2 {
        return Err(ApiError::bad_request("coordinates must be [lat, lon]"));
    }
    Ok(GeoPoint::new(value[0], value[1]))
}

// ----------------------------------------------------------------------
// Health
// ----------------------------------------------------------------------

/// GET /api/health — service, agent liveness, LLM availability.
pub async fn get_health(State(state): State<ApiState>) -> Json<Value> {
    let agents = {
        let orchestrator = state.orchestrator.lock().await;
        orchestrator.system_status()
    };
    let llm = state.llm.get_health().await;
    Json(json!({
        "status": "ok",
        "scheduler_ticks": state.tick_count.load(Ordering::Relaxed),
        "registered_agents": state.bus.registered_agents(),
        "agents": agents,
        "llm": llm,
    }))
}

// ----------------------------------------------------------------------
// Orchestrator: missions and chat
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct MissionRequest {
    pub mission_type: String,
    #[serde(default)]
    pub params: Value,
}

/// POST /api/orchestrator/mission
pub async fn create_mission(
    State(state): State<ApiState>,
    Json(request): Json<MissionRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(mission_type) = MissionType::parse(&request.mission_type) else {
        return Err(ApiError::bad_request(format!(
            "unknown mission_type '{}'",
            request.mission_type
        )));
    };
    let params = if request.params.is_null() { json!({}) } else { request.params };

    let mut orchestrator = state.orchestrator.lock().await;
    Ok(Json(orchestrator.start_mission(mission_type, params)))
}

/// GET /api/orchestrator/mission/:id
pub async fn get_mission(
    State(state): State<ApiState>,
    Path(mission_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let orchestrator = state.orchestrator.lock().await;
    orchestrator
        .mission_snapshot(&mission_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("mission '{mission_id}' not found")))
}

/// GET /api/orchestrator/mission/:id/summary
pub async fn get_mission_summary(
    State(state): State<ApiState>,
    Path(mission_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let orchestrator = state.orchestrator.lock().await;
    let summary = orchestrator.summarize_mission(&mission_id).await;
    if summary.get("status").and_then(Value::as_str) == Some("error") {
        return Err(ApiError::not_found(format!("mission '{mission_id}' not found")));
    }
    Ok(Json(summary))
}

/// GET /api/orchestrator/missions — active mission list.
pub async fn list_missions(State(state): State<ApiState>) -> Json<Value> {
    let orchestrator = state.orchestrator.lock().await;
    Json(json!({"active": orchestrator.active_missions()}))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// POST /api/orchestrator/chat
pub async fn orchestrator_chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let mut orchestrator = state.orchestrator.lock().await;
    Ok(Json(orchestrator.chat_and_execute(&request.message).await))
}

// ----------------------------------------------------------------------
// Routing
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub start_location: Vec<f64>,
    pub end_location: Vec<f64>,
    #[serde(default)]
    pub preferences: Option<RoutePreferences>,
}

/// POST /api/route
pub async fn calculate_route(
    State(state): State<ApiState>,
    Json(request): Json<RouteRequest>,
) -> Result<Json<Value>, ApiError> {
    let start = parse_point(&request.start_location)?;
    let end = parse_point(&request.end_location)?;
    let preferences = request.preferences.unwrap_or_default();

    let route = state
        .planner
        .calculate_route(start, end, &preferences)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(serde_json::to_value(route).unwrap_or_default()))
}

// ----------------------------------------------------------------------
// Feedback
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub route_id: String,
    pub feedback_type: String,
    #[serde(default)]
    pub location: Option<Vec<f64>>,
    #[serde(default)]
    pub severity: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub has_photo: bool,
}

/// POST /api/feedback
pub async fn submit_feedback(
    State(state): State<ApiState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<Value>, ApiError> {
    let location = match &request.location {
        Some(coords) => Some(parse_point(coords)?),
        None => None,
    };

    let mut evacuation = state.evacuation.lock().await;
    let (accepted, confidence) = evacuation.collect_feedback(
        &request.feedback_type,
        location,
        request.severity,
        request.description.clone(),
        request.has_photo,
    );
    Ok(Json(json!({
        "route_id": request.route_id,
        "accepted": accepted,
        "confidence": confidence,
    })))
}

// ----------------------------------------------------------------------
// Evacuation centers
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct EvacuationCenterRequest {
    pub location: Vec<f64>,
    #[serde(default)]
    pub preferences: Option<RoutePreferences>,
}

/// POST /api/evacuation-center
pub async fn find_evacuation_center(
    State(state): State<ApiState>,
    Json(request): Json<EvacuationCenterRequest>,
) -> Result<Json<Value>, ApiError> {
    let location = parse_point(&request.location)?;
    let preferences = request.preferences.unwrap_or_else(RoutePreferences::safest);

    let recommendation = state
        .planner
        .find_nearest_center(location, &preferences)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(serde_json::to_value(recommendation).unwrap_or_default()))
}
