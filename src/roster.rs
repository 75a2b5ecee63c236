//! Roster - ordered set of tracked nodes
//!
//! Structural changes (add, remove, edit, load) happen here and are persisted
//! immediately. Field changes arrive from the nodes as [`NodeSignal`]s on a
//! bounded channel; [`Roster::run`] turns them into bus events and flushes the
//! persisted projection on a timer when anything changed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{DashboardEvent, SharedBus};
use crate::node::{NodeClient, NodeError, NodeSignal, NodeSnapshot, NodeState, PollTimings};
use crate::store::RosterStore;

const SIGNAL_CAPACITY: usize = 256;

/// Default interval between dirty-state flushes
pub const DEFAULT_PERSIST_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct Entry {
    address: String,
    node: NodeState,
}

pub struct Roster {
    entries: RwLock<Vec<Entry>>,
    client: Arc<dyn NodeClient>,
    timings: PollTimings,
    store: RosterStore,
    bus: SharedBus,
    signal_tx: mpsc::Sender<NodeSignal>,
    signal_rx: Mutex<Option<mpsc::Receiver<NodeSignal>>>,
    dirty: AtomicBool,
    /// Sequence number handed to each `persist` call
    persist_seq: AtomicU64,
    /// Sequence of the snapshot on disk; writes happen under this lock
    written_seq: std::sync::Mutex<u64>,
    persist_interval: Duration,
}

impl Roster {
    pub fn new(
        client: Arc<dyn NodeClient>,
        timings: PollTimings,
        store: RosterStore,
        bus: SharedBus,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        Self {
            entries: RwLock::new(Vec::new()),
            client,
            timings,
            store,
            bus,
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            dirty: AtomicBool::new(false),
            persist_seq: AtomicU64::new(0),
            written_seq: std::sync::Mutex::new(0),
            persist_interval: DEFAULT_PERSIST_INTERVAL,
        }
    }

    pub fn with_persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }

    fn make_node(&self, address: &str) -> NodeState {
        NodeState::new(
            address,
            self.client.clone(),
            self.timings.clone(),
            Some(self.signal_tx.clone()),
        )
    }

    /// Track a new node and start polling it. Returns false for blank or
    /// already-tracked addresses.
    pub async fn add(&self, address: &str) -> bool {
        let address = address.trim();
        if address.is_empty() {
            debug!("Ignoring blank node address");
            return false;
        }

        let node = {
            let mut entries = self.entries.write().await;
            if entries.iter().any(|e| e.address == address) {
                debug!("Node {} already tracked", address);
                return false;
            }
            let node = self.make_node(address);
            entries.push(Entry {
                address: address.to_string(),
                node: node.clone(),
            });
            node
        };

        node.start_polling();
        info!("Added node {}", address);
        self.structure_changed().await;
        true
    }

    /// Stop tracking a node. Returns whether it was present.
    pub async fn remove(&self, address: &str) -> bool {
        let removed = {
            let mut entries = self.entries.write().await;
            entries
                .iter()
                .position(|e| e.address == address)
                .map(|i| entries.remove(i))
        };

        let Some(entry) = removed else {
            return false;
        };
        entry.node.stop_polling();
        info!("Removed node {}", address);
        self.structure_changed().await;
        true
    }

    /// Retarget, rename or re-point the MANET address of a node in place.
    pub async fn edit(
        &self,
        target: &str,
        new_address: &str,
        display_name: &str,
        manet_address: Option<&str>,
    ) -> Result<NodeSnapshot, NodeError> {
        let new_address = new_address.trim();
        if new_address.is_empty() {
            return Err(NodeError::EmptyAddress);
        }

        let node = {
            let mut entries = self.entries.write().await;
            let index = entries
                .iter()
                .position(|e| e.address == target)
                .ok_or_else(|| NodeError::NotFound(target.to_string()))?;
            if new_address != target && entries.iter().any(|e| e.address == new_address) {
                return Err(NodeError::DuplicateAddress(new_address.to_string()));
            }
            entries[index].address = new_address.to_string();
            entries[index].node.clone()
        };

        node.apply_edit(
            new_address.to_string(),
            display_name.trim().to_string(),
            manet_address.map(|s| s.trim().to_string()),
        )
        .await;
        if new_address != target {
            info!("Node {} is now {}", target, new_address);
        }
        self.structure_changed().await;
        Ok(node.snapshot().await)
    }

    pub async fn get(&self, address: &str) -> Option<NodeState> {
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.node.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.address.clone())
            .collect()
    }

    fn nodes(entries: &[Entry]) -> Vec<NodeState> {
        entries.iter().map(|e| e.node.clone()).collect()
    }

    /// Snapshots in roster order
    pub async fn snapshot(&self) -> Vec<NodeSnapshot> {
        let nodes = Self::nodes(&self.entries.read().await);
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.push(node.snapshot().await);
        }
        out
    }

    /// Replace the roster with the saved one and start polling every node.
    /// Returns the number of nodes loaded.
    pub async fn load_persisted(&self) -> usize {
        let mut seen = HashSet::new();
        let mut fresh = Vec::new();
        for mut saved in self.store.load() {
            let address = saved.address.trim().to_string();
            if address.is_empty() {
                continue;
            }
            if !seen.insert(address.clone()) {
                warn!("Skipping duplicate saved node {}", address);
                continue;
            }
            saved.address = address.clone();
            let node = NodeState::restore(
                saved,
                self.client.clone(),
                self.timings.clone(),
                Some(self.signal_tx.clone()),
            );
            fresh.push(Entry { address, node });
        }

        let previous = {
            let mut entries = self.entries.write().await;
            std::mem::replace(&mut *entries, fresh.clone())
        };
        for entry in previous {
            entry.node.stop_polling();
        }
        for entry in &fresh {
            entry.node.start_polling();
        }

        info!(
            "Loaded {} node(s) from {}",
            fresh.len(),
            self.store.path().display()
        );
        self.bus.publish(DashboardEvent::RosterChanged {
            addresses: fresh.iter().map(|e| e.address.clone()).collect(),
        });
        fresh.len()
    }

    /// Write the persisted projection of every node.
    ///
    /// Concurrent calls write one at a time, and a snapshot taken before one
    /// already on disk is dropped instead of overwriting it.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let seq = self.persist_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let nodes = Self::nodes(&self.entries.read().await);
        let mut saved = Vec::with_capacity(nodes.len());
        for node in nodes {
            saved.push(node.to_persisted().await);
        }
        self.dirty.store(false, Ordering::Relaxed);

        let mut written = self.written_seq.lock().unwrap_or_else(|e| e.into_inner());
        if *written > seq {
            debug!("Skipping roster snapshot {} (already wrote {})", seq, *written);
            return Ok(());
        }
        self.store.save(&saved)?;
        *written = seq;
        Ok(())
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!("Failed to persist roster: {:#}", e);
            self.dirty.store(true, Ordering::Relaxed);
        }
    }

    async fn structure_changed(&self) {
        self.persist_logged().await;
        self.bus.publish(DashboardEvent::RosterChanged {
            addresses: self.addresses().await,
        });
    }

    /// Stop all polling and write the final state
    pub async fn shutdown(&self) {
        let nodes = Self::nodes(&self.entries.read().await);
        for node in &nodes {
            node.stop_polling();
        }
        self.persist_logged().await;
        info!("Roster stopped ({} node(s))", nodes.len());
    }

    /// Forward node signals to the bus and flush dirty state until
    /// `shutdown` fires. Only the first call does anything.
    pub async fn run(&self, shutdown: CancellationToken) {
        let Some(mut signals) = self.signal_rx.lock().await.take() else {
            warn!("Roster observer already running");
            return;
        };

        let mut flush = tokio::time::interval(self.persist_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Roster observer started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
                _ = flush.tick() => {
                    if self.dirty.load(Ordering::Relaxed) {
                        self.persist_logged().await;
                    }
                }
            }
        }

        if self.dirty.load(Ordering::Relaxed) {
            self.persist_logged().await;
        }
        info!("Roster observer stopped");
    }

    async fn handle_signal(&self, signal: NodeSignal) {
        match signal {
            NodeSignal::Changed { address } => {
                // Removed or retargeted nodes can still report once
                let Some(node) = self.get(&address).await else {
                    return;
                };
                self.dirty.store(true, Ordering::Relaxed);
                let snap = node.snapshot().await;
                self.bus.publish(DashboardEvent::NodeUpdated {
                    address,
                    status: snap.display_status,
                });
            }
            NodeSignal::ToggleDispatched { address, outcome } => {
                if outcome.reboot_alert_requested {
                    self.bus.publish(DashboardEvent::RebootAlert {
                        address: address.clone(),
                        error: outcome.error,
                    });
                }
                if outcome.initializing_requested {
                    self.bus.publish(DashboardEvent::Initializing { address });
                }
            }
            NodeSignal::ToggleSettled { address } => {
                self.bus.publish(DashboardEvent::ToggleSettled {
                    address: address.clone(),
                });
                if let Some(node) = self.get(&address).await {
                    tokio::spawn(async move { node.refresh_all().await });
                }
            }
        }
    }
}
