//! gNB Dashboard
//!
//! Monitoring and control host for 5G base-station nodes.
//!
//! This library provides:
//! - Per-node polling of the node agent (attributes, status, MANET link)
//! - Broadcast start/stop with a settle window that masks the node as initializing
//! - A persisted roster of tracked nodes
//! - Link-quality matrix merging for the mesh map overlay
//! - Server-Sent Events for real-time updates

pub mod api;
pub mod bus;
pub mod config;
pub mod link_quality;
pub mod map_data;
pub mod node;
pub mod roster;
pub mod store;
