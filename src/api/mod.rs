//! REST API module using Axum
//!
//! HTTP surface for the coordination runtime: health and liveness, mission
//! creation and tracking, natural-language chat, route calculation, user
//! feedback, and evacuation-center lookup.

pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::Router;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    let cors = CorsLayer::permissive();

    Router::new()
        .nest("/api", routes::api_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}

/// API error type for consistent error responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: axum::http::StatusCode,
    pub message: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            message: message.into(),
            code: "BAD_REQUEST".to_string(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::NOT_FOUND,
            message: message.into(),
            code: "NOT_FOUND".to_string(),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });

        (self.status, axum::Json(body)).into_response()
    }
}
