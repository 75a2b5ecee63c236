//! Event bus for dashboard observers
//!
//! Uses tokio::sync::broadcast for pub/sub. The roster and the map loader
//! publish here; the host API forwards events to SSE subscribers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::node::DisplayStatus;

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DashboardEvent {
    /// A node's polled or command-driven fields changed
    NodeUpdated { address: String, status: DisplayStatus },
    /// Structural roster change (add, remove, edit, load)
    RosterChanged { addresses: Vec<String> },
    /// Toggle hit a stuck or rebooting node; the user should be told
    RebootAlert { address: String, error: Option<String> },
    /// Toggle accepted; node is starting or stopping
    Initializing { address: String },
    /// Settle delay elapsed after a toggle
    ToggleSettled { address: String },
    /// New merged map data available
    MapUpdated { node_count: usize },
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DashboardEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
