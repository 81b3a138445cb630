//! AGOS-OS: Flood Route Operational Intelligence
//!
//! Multi-agent coordination runtime for urban flood-route optimization.
//!
//! ## Architecture
//!
//! - **Collector / Scout Agents**: ingest official and crowdsourced inputs
//! - **Hazard Fusion Agent**: fuses observations into a time-decaying risk
//!   field over the city road graph
//! - **Risk-Aware Router**: A* with a risk-penalized, admissible cost
//! - **Orchestrator**: natural-language requests into multi-step missions
//!   driven as finite state machines over the ACL message bus

pub mod agents;
pub mod api;
pub mod comms;
pub mod config;
pub mod environment;
pub mod llm;
pub mod nlp;
pub mod routing;
pub mod runtime;
pub mod sources;
pub mod types;

// Re-export the core surface
pub use agents::{
    Agent, EvacuationManagerAgent, FloodCollectorAgent, HazardFusionAgent, OrchestratorAgent,
    RoutingAgent, ScoutAgent,
};
pub use comms::{AclMessage, MessageBody, MessageBus, Performative};
pub use config::SystemConfig;
pub use environment::{RoadGraph, SpatialIndex};
pub use routing::RoutePlanner;
pub use runtime::AgentLifecycleScheduler;
pub use types::{Mission, MissionState, MissionType, RouteMode, RouteResponse};
