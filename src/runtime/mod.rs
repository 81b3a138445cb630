//! Agent runtime
//!
//! The lifecycle scheduler drives cooperative `step()` on every registered
//! agent at a fixed tick rate, in priority order.

pub mod lifecycle;

pub use lifecycle::AgentLifecycleScheduler;
