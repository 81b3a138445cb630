//! Risk-aware routing
//!
//! [`astar`] implements the penalized shortest-path search over the road
//! graph; [`planner`] wraps it with coordinate snapping, evacuation-center
//! ranking, and a nearest-node cache shared by the routing and evacuation
//! agents.

pub mod astar;
pub mod planner;

pub use astar::{path_metrics, risk_aware_astar, risk_penalty_for, route_warnings, RouteError};
pub use planner::RoutePlanner;
