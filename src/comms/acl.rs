//! Agent Communication Language — typed FIPA-style messages
//!
//! Message content is a tagged variant per `(performative, action | info_type)`
//! pair instead of an open key/value payload, so a malformed request fails at
//! the sender's type checker, not in the receiver's dispatch loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{
    EvacuationCenter, FloodObservation, GeoPoint, RoutePreferences, RouteResponse, ScoutReport,
};

/// ACL message performatives (speech acts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Performative {
    Request,
    Inform,
    Query,
    Confirm,
    Refuse,
    Agree,
    Failure,
    Propose,
    Cfp,
}

impl std::fmt::Display for Performative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Request => "REQUEST",
            Self::Inform => "INFORM",
            Self::Query => "QUERY",
            Self::Confirm => "CONFIRM",
            Self::Refuse => "REFUSE",
            Self::Agree => "AGREE",
            Self::Failure => "FAILURE",
            Self::Propose => "PROPOSE",
            Self::Cfp => "CFP",
        };
        f.write_str(s)
    }
}

/// Observed direction of the average-risk trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Qualitative risk classification for a queried area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify an average risk value.
    pub fn from_avg(avg: f64) -> Self {
        if avg < 0.1 {
            Self::Minimal
        } else if avg < 0.3 {
            Self::Low
        } else if avg < 0.6 {
            Self::Moderate
        } else if avg < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Hazard reply to `process_and_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskUpdateSummary {
    pub locations_processed: usize,
    pub edges_updated: usize,
    pub average_risk: f64,
    pub risk_trend: RiskTrend,
    /// Average-risk change per minute
    pub risk_change_rate: f64,
    pub active_reports: usize,
    pub oldest_report_age_min: f64,
    pub timestamp: DateTime<Utc>,
}

/// Hazard reply to `query_risk_at_location`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRiskSummary {
    pub status: String,
    pub avg_risk: f64,
    pub max_risk: f64,
    pub risk_level: RiskLevel,
    pub edge_count: usize,
    pub high_risk_edges: usize,
    pub impassable_edges: usize,
    pub lat: f64,
    pub lon: f64,
    pub radius_m: f64,
}

/// Routing reply to `find_evacuation_center`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvacuationRecommendation {
    pub status: String,
    pub center: Option<EvacuationCenter>,
    pub route: Option<RouteResponse>,
    pub explanation: Option<String>,
    pub candidates_evaluated: usize,
}

/// Evacuation-manager reply to `handle_distress_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistressOutcome {
    pub status: String,
    pub urgency: String,
    pub instructions: String,
    pub recommendation: Option<EvacuationRecommendation>,
    pub error: Option<String>,
}

/// Typed message content: one variant per `(performative, action | info_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "body", rename_all = "snake_case")]
pub enum MessageBody {
    // --- REQUEST actions ---
    CollectData,
    ScanLocation {
        location: String,
    },
    ProcessAndUpdate,
    QueryRiskAtLocation {
        lat: f64,
        lon: f64,
        radius_m: f64,
    },
    CalculateRoute {
        start: GeoPoint,
        end: GeoPoint,
        preferences: RoutePreferences,
    },
    FindEvacuationCenter {
        location: GeoPoint,
        query: Option<String>,
        preferences: RoutePreferences,
    },
    HandleDistressCall {
        user_location: GeoPoint,
        message: String,
    },
    CollectFeedback {
        route_id: String,
        feedback_type: String,
        location: Option<GeoPoint>,
        severity: Option<f64>,
        description: Option<String>,
        has_photo: bool,
    },

    // --- INFORM payloads ---
    FloodDataBatch {
        data: HashMap<String, FloodObservation>,
    },
    ScoutReportBatch {
        reports: Vec<ScoutReport>,
        report_count: usize,
        visual_evidence_count: usize,
        processing_version: String,
    },
    CollectDataResult {
        status: String,
        locations_collected: usize,
        error: Option<String>,
    },
    ScoutScanResult {
        location: String,
        coordinates: Option<GeoPoint>,
        reports_cached: usize,
    },
    RiskUpdateResult(RiskUpdateSummary),
    LocationRiskResult(LocationRiskSummary),
    RouteResult(RouteResponse),
    EvacuationCenterResult(EvacuationRecommendation),
    DistressCallResult(DistressOutcome),
    FeedbackResult {
        accepted: bool,
        confidence: f64,
    },

    // --- FAILURE / REFUSE ---
    Failure {
        error: String,
    },
    Refusal {
        reason: String,
    },
}

impl MessageBody {
    /// The `action` tag for REQUEST bodies, used in logs and dispatch.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            Self::CollectData => Some("collect_data"),
            Self::ScanLocation { .. } => Some("scan_location"),
            Self::ProcessAndUpdate => Some("process_and_update"),
            Self::QueryRiskAtLocation { .. } => Some("query_risk_at_location"),
            Self::CalculateRoute { .. } => Some("calculate_route"),
            Self::FindEvacuationCenter { .. } => Some("find_evacuation_center"),
            Self::HandleDistressCall { .. } => Some("handle_distress_call"),
            Self::CollectFeedback { .. } => Some("collect_feedback"),
            _ => None,
        }
    }

    /// The `info_type` tag for INFORM bodies.
    pub fn info_type(&self) -> Option<&'static str> {
        match self {
            Self::FloodDataBatch { .. } => Some("flood_data_batch"),
            Self::ScoutReportBatch { .. } => Some("scout_report_batch"),
            Self::CollectDataResult { .. } => Some("collect_data_result"),
            Self::ScoutScanResult { .. } => Some("scout_scan_result"),
            Self::RiskUpdateResult(_) => Some("risk_update_result"),
            Self::LocationRiskResult(_) => Some("location_risk_result"),
            Self::RouteResult(_) => Some("route_result"),
            Self::EvacuationCenterResult(_) => Some("evacuation_center_result"),
            Self::DistressCallResult(_) => Some("distress_call_result"),
            Self::FeedbackResult { .. } => Some("feedback_result"),
            _ => None,
        }
    }

    /// Label for logging regardless of kind.
    pub fn tag(&self) -> &'static str {
        self.action().or_else(|| self.info_type()).unwrap_or(match self {
            Self::Failure { .. } => "failure",
            Self::Refusal { .. } => "refusal",
            _ => "unknown",
        })
    }

    /// Serialize the payload for storage in a mission result tree.
    pub fn to_result_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// An immutable inter-agent message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclMessage {
    pub performative: Performative,
    pub sender: String,
    pub receiver: String,
    pub body: MessageBody,
    /// Mission correlation id, propagated end-to-end
    pub conversation_id: Option<String>,
    /// Sender-chosen id for fine-grained reply correlation
    pub reply_with: Option<String>,
    /// Echo of the request's `reply_with`
    pub in_reply_to: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AclMessage {
    fn new(
        performative: Performative,
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: MessageBody,
    ) -> Self {
        Self {
            performative,
            sender: sender.into(),
            receiver: receiver.into(),
            body,
            conversation_id: None,
            reply_with: None,
            in_reply_to: None,
            timestamp: Utc::now(),
        }
    }

    /// Build a REQUEST message.
    pub fn request(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: MessageBody,
        conversation_id: Option<String>,
    ) -> Self {
        let mut msg = Self::new(Performative::Request, sender, receiver, body);
        msg.conversation_id = conversation_id;
        msg
    }

    /// Build an INFORM message.
    pub fn inform(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        body: MessageBody,
        conversation_id: Option<String>,
    ) -> Self {
        let mut msg = Self::new(Performative::Inform, sender, receiver, body);
        msg.conversation_id = conversation_id;
        msg
    }

    /// Build an INFORM reply to a request, echoing its correlation ids.
    pub fn inform_reply(request: &Self, sender: impl Into<String>, body: MessageBody) -> Self {
        let mut msg = Self::new(Performative::Inform, sender, request.sender.clone(), body);
        msg.conversation_id = request.conversation_id.clone();
        msg.in_reply_to = request.reply_with.clone();
        msg
    }

    /// Build a FAILURE reply to a request.
    pub fn failure_reply(request: &Self, sender: impl Into<String>, error: impl Into<String>) -> Self {
        let mut msg = Self::new(
            Performative::Failure,
            sender,
            request.sender.clone(),
            MessageBody::Failure { error: error.into() },
        );
        msg.conversation_id = request.conversation_id.clone();
        msg.in_reply_to = request.reply_with.clone();
        msg
    }

    /// Build a REFUSE reply to a request.
    pub fn refuse_reply(request: &Self, sender: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut msg = Self::new(
            Performative::Refuse,
            sender,
            request.sender.clone(),
            MessageBody::Refusal { reason: reason.into() },
        );
        msg.conversation_id = request.conversation_id.clone();
        msg.in_reply_to = request.reply_with.clone();
        msg
    }

    /// Re-address a copy to a different receiver (broadcast synthesis).
    pub fn readdressed(&self, receiver: impl Into<String>) -> Self {
        let mut msg = self.clone();
        msg.receiver = receiver.into();
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_echoes_correlation_ids() {
        let mut request = AclMessage::request(
            "orchestrator_main",
            "hazard_agent_001",
            MessageBody::ProcessAndUpdate,
            Some("m1234".into()),
        );
        request.reply_with = Some("rw-1".into());

        let reply = AclMessage::inform_reply(
            &request,
            "hazard_agent_001",
            MessageBody::CollectDataResult {
                status: "success".into(),
                locations_collected: 3,
                error: None,
            },
        );
        assert_eq!(reply.receiver, "orchestrator_main");
        assert_eq!(reply.conversation_id.as_deref(), Some("m1234"));
        assert_eq!(reply.in_reply_to.as_deref(), Some("rw-1"));
        assert_eq!(reply.performative, Performative::Inform);
    }

    #[test]
    fn body_tags() {
        assert_eq!(MessageBody::CollectData.action(), Some("collect_data"));
        assert_eq!(
            MessageBody::FloodDataBatch { data: HashMap::new() }.info_type(),
            Some("flood_data_batch"),
        );
        assert_eq!(MessageBody::Failure { error: "x".into() }.tag(), "failure");
    }

    #[test]
    fn risk_level_classification() {
        assert_eq!(RiskLevel::from_avg(0.05), RiskLevel::Minimal);
        assert_eq!(RiskLevel::from_avg(0.2), RiskLevel::Low);
        assert_eq!(RiskLevel::from_avg(0.45), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_avg(0.7), RiskLevel::High);
        assert_eq!(RiskLevel::from_avg(0.95), RiskLevel::Critical);
    }
}
