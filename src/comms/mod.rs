//! Agent communication layer
//!
//! FIPA-ACL style typed messages ([`acl`]) delivered through per-agent FIFO
//! inboxes ([`bus`]). The bus never interprets performatives; all semantics
//! live in the agents.

pub mod acl;
pub mod bus;

pub use acl::{
    AclMessage, DistressOutcome, EvacuationRecommendation, LocationRiskSummary, MessageBody,
    Performative, RiskLevel, RiskTrend, RiskUpdateSummary,
};
pub use bus::{BusError, MessageBus};
