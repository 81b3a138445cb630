//! Multi-agent system for flood route intelligence
//!
//! ## Agents
//!
//! - **Flood Collector**: periodic multi-source pull of official data
//! - **Scout**: crowdsourced post analysis (NLP + vision) into reports
//! - **Hazard Fusion**: observation fusion into per-edge risk on the graph
//! - **Routing**: risk-aware route and evacuation-center service
//! - **Evacuation Manager**: distress-call handling and user feedback
//! - **Orchestrator**: chat interpretation and mission state machines
//!
//! Every agent implements [`Agent`]: the lifecycle scheduler drives
//! `step()` at a fixed tick rate, during which the agent drains its inbox
//! (non-blocking), dispatches by performative, and performs any time-driven
//! periodic work. Long I/O never runs inside `step()` — it is spawned into
//! worker tasks whose completion enqueues messages back onto the bus.

pub mod collector;
pub mod evacuation;
pub mod hazard;
pub mod orchestrator;
pub mod routing;
pub mod scout;

use async_trait::async_trait;

pub use collector::FloodCollectorAgent;
pub use evacuation::EvacuationManagerAgent;
pub use hazard::{FloodRaster, HazardFusionAgent};
pub use orchestrator::OrchestratorAgent;
pub use routing::RoutingAgent;
pub use scout::ScoutAgent;

/// Cooperative agent driven by the lifecycle scheduler.
///
/// `step()` must be quick, idempotent on an empty inbox, and must not block
/// on network I/O.
#[async_trait]
pub trait Agent: Send {
    fn agent_id(&self) -> &str;

    /// One cooperative step: drain inbox, dispatch, do periodic work.
    async fn step(&mut self);
}
