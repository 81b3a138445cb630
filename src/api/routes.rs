//! API route definitions
//!
//! Endpoints under `/api`:
//! - /health - service and agent liveness, LLM availability
//! - /orchestrator/mission - create and track missions
//! - /orchestrator/chat - natural-language mission creation
//! - /route - risk-aware route calculation
//! - /feedback - user road-status feedback
//! - /evacuation-center - nearest evacuation center

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

/// Create all API routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::get_health))
        // Orchestrator
        .route("/orchestrator/mission", post(handlers::create_mission))
        .route("/orchestrator/mission/:id", get(handlers::get_mission))
        .route("/orchestrator/mission/:id/summary", get(handlers::get_mission_summary))
        .route("/orchestrator/missions", get(handlers::list_missions))
        .route("/orchestrator/chat", post(handlers::orchestrator_chat))
        // Routing
        .route("/route", post(handlers::calculate_route))
        // Feedback loop
        .route("/feedback", post(handlers::submit_feedback))
        // Evacuation
        .route("/evacuation-center", post(handlers::find_evacuation_center))
        .with_state(state)
}
