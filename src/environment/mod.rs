//! Dynamic graph environment
//!
//! The road network shared by every agent: a directed multigraph with
//! immutable topology and a mutable, concurrently-readable risk field.
//! Risk snapshots are persisted periodically and replayed on restart.

pub mod graph;
pub mod snapshot;
pub mod spatial;

pub use graph::{EdgeId, EdgeKey, EdgeView, GraphError, Node, NodeId, RoadGraph};
pub use spatial::{haversine_m, SpatialIndex};
