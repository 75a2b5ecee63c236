//! Per-node state synchronization
//!
//! Each tracked node owns a view model that three independent pollers keep
//! fresh (attributes every 1s, status every 3s, MANET link every 5s), plus a
//! broadcast toggle command that coordinates with those pollers through the
//! `is_busy` flag rather than through locking.

pub mod client;
pub mod model;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    BroadcastAction, FetchError, HttpNodeClient, LogKind, ManetReport, NodeClient,
    DEFAULT_NODE_PORT,
};
pub use model::{
    ConnectionState, DisplayStatus, LinkStatus, ManetInfo, NodeAttributes, HISTORY_LEN,
};
pub use state::{NodeSignal, NodeSnapshot, NodeState, NodeView, PollTimings, ToggleOutcome};

use thiserror::Error;

/// Errors returned by node commands. Polling never produces these; its
/// failures are folded into state.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid broadcast action '{0}' (expected 'start' or 'stop')")]
    InvalidAction(String),
    #[error("a toggle is already in progress for {0}")]
    Busy(String),
    #[error("node is broadcasting; stop it before changing configuration")]
    Broadcasting,
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("address {0} is already tracked")]
    DuplicateAddress(String),
    #[error("address must not be empty")]
    EmptyAddress,
    #[error("node rejected the request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Request(#[from] FetchError),
}
