//! Mock servers for integration testing
//!
//! These mock servers stand in for the node agents and the mesh aggregation
//! service, so the HTTP client, pollers and host API can be exercised without
//! real hardware.

#![allow(dead_code, unused_imports)]

pub mod map_service;
pub mod node_agent;

pub use map_service::MockMapService;
pub use node_agent::MockNodeAgent;
