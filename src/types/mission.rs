//! Mission records — orchestrator finite state machines
//!
//! Missions are created from chat interpretation or the direct API, advanced
//! by INFORM replies correlated on `conversation_id = mission_id`, and retired
//! into a bounded history ring on any terminal transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Finite state machine states for orchestrator missions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionState {
    Pending,
    AwaitingScout,
    AwaitingFlood,
    AwaitingHazard,
    AwaitingRouting,
    AwaitingEvacuation,
    AwaitingRiskQuery,
    Completed,
    Failed,
    TimedOut,
}

impl MissionState {
    /// Terminal states never re-enter a non-terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl std::fmt::Display for MissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::AwaitingScout => "AWAITING_SCOUT",
            Self::AwaitingFlood => "AWAITING_FLOOD",
            Self::AwaitingHazard => "AWAITING_HAZARD",
            Self::AwaitingRouting => "AWAITING_ROUTING",
            Self::AwaitingEvacuation => "AWAITING_EVACUATION",
            Self::AwaitingRiskQuery => "AWAITING_RISK_QUERY",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// Supported mission workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    AssessRisk,
    CoordinatedEvacuation,
    RouteCalculation,
    CascadeRiskUpdate,
}

impl MissionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssessRisk => "assess_risk",
            Self::CoordinatedEvacuation => "coordinated_evacuation",
            Self::RouteCalculation => "route_calculation",
            Self::CascadeRiskUpdate => "cascade_risk_update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assess_risk" => Some(Self::AssessRisk),
            "coordinated_evacuation" => Some(Self::CoordinatedEvacuation),
            "route_calculation" => Some(Self::RouteCalculation),
            "cascade_risk_update" => Some(Self::CascadeRiskUpdate),
            _ => None,
        }
    }
}

impl std::fmt::Display for MissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked multi-step workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    #[serde(rename = "type")]
    pub mission_type: MissionType,
    pub state: MissionState,
    /// Opaque mission parameters (already repaired by the orchestrator)
    pub params: serde_json::Value,
    /// Replies keyed by responding agent role, or `map_risk` for the
    /// hazard location-risk reply
    pub results: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_seconds: f64,
    pub error: Option<String>,
}

impl Mission {
    pub fn new(
        id: String,
        mission_type: MissionType,
        params: serde_json::Value,
        timeout_seconds: f64,
    ) -> Self {
        Self {
            id,
            mission_type,
            state: MissionState::Pending,
            params,
            results: HashMap::new(),
            created_at: Utc::now(),
            completed_at: None,
            timeout_seconds,
            error: None,
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_terminal()
            && (now - self.created_at).num_milliseconds() as f64 / 1000.0 > self.timeout_seconds
    }
}
