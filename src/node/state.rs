//! NodeState - live view of one node and its polling lifecycle
//!
//! ## Ownership
//!
//! `NodeState` is a cheap clone over shared state. The roster owns the
//! canonical handle; pollers and the settle timer hold clones. Removing a node
//! stops its future ticks, but a request already in flight is allowed to
//! finish (its result lands in a view nobody reads any more).
//!
//! ## Field ownership
//!
//! ```text
//! refresh_attributes  -> attributes (+ connection_state on failure)
//! refresh_status      -> connection_state
//! refresh_manet_link  -> manet.link_status, manet.node_info, manet.self_info
//! toggle_broadcast    -> is_busy
//! ```
//!
//! Writers never coordinate. An attribute failure can overwrite a status
//! success that completed just before it; the next status tick corrects it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{BroadcastAction, FetchError, LogKind, NodeClient};
use super::model::{ConnectionState, DisplayStatus, LinkStatus, ManetInfo, NodeAttributes};
use super::NodeError;
use crate::store::PersistedNode;

/// Polling cadences and request bounds
#[derive(Debug, Clone)]
pub struct PollTimings {
    pub attributes_interval: Duration,
    pub status_interval: Duration,
    pub manet_interval: Duration,
    pub attributes_timeout: Duration,
    pub status_timeout: Duration,
    pub manet_timeout: Duration,
    /// Bound for toggle, config and log requests
    pub command_timeout: Duration,
    /// How long `is_busy` stays set after a toggle request returns
    pub settle_delay: Duration,
}

impl Default for PollTimings {
    fn default() -> Self {
        Self {
            attributes_interval: Duration::from_secs(1),
            status_interval: Duration::from_secs(3),
            manet_interval: Duration::from_secs(5),
            attributes_timeout: Duration::from_millis(900),
            status_timeout: Duration::from_millis(3500),
            manet_timeout: Duration::from_millis(900),
            command_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_secs(4),
        }
    }
}

/// Notifications from a node to whoever owns it
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSignal {
    /// Some field changed
    Changed { address: String },
    /// Toggle request returned; `outcome` says what to show
    ToggleDispatched { address: String, outcome: ToggleOutcome },
    /// Settle delay elapsed and `is_busy` was cleared
    ToggleSettled { address: String },
}

/// Result of a toggle request, for the caller to surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub action: BroadcastAction,
    /// Node answered 2xx
    pub accepted: bool,
    /// Node looks stuck or is rebooting (500/504 or no answer)
    pub reboot_alert_requested: bool,
    /// Show a transitional state until the next status poll
    pub initializing_requested: bool,
    pub error: Option<String>,
}

impl ToggleOutcome {
    fn from_result(action: BroadcastAction, result: &Result<(), FetchError>) -> Self {
        let mut outcome = Self {
            action,
            accepted: false,
            reboot_alert_requested: false,
            initializing_requested: false,
            error: None,
        };
        match result {
            Ok(()) => {
                outcome.accepted = true;
                outcome.initializing_requested = true;
            }
            Err(FetchError::Status { code: 500 | 504, .. }) => {
                outcome.reboot_alert_requested = true;
                outcome.error = result.as_ref().err().map(|e| e.to_string());
            }
            Err(FetchError::Status { .. }) => {
                outcome.initializing_requested = true;
                outcome.error = result.as_ref().err().map(|e| e.to_string());
            }
            Err(e) => {
                outcome.reboot_alert_requested = true;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }
}

/// Mutable fields of one node
#[derive(Debug, Clone, Default)]
pub struct NodeView {
    pub address: String,
    pub display_name: String,
    pub connection_state: ConnectionState,
    pub attributes: Option<NodeAttributes>,
    pub manet: ManetInfo,
    pub is_busy: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl NodeView {
    fn new(address: String) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    /// Display name, or the address when no name is set
    pub fn label(&self) -> &str {
        let name = self.display_name.trim();
        if name.is_empty() {
            &self.address
        } else {
            name
        }
    }
}

/// Read-only copy of a node for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub address: String,
    pub display_name: String,
    pub label: String,
    pub connection_state: ConnectionState,
    pub display_status: DisplayStatus,
    pub is_busy: bool,
    pub attributes: Option<NodeAttributes>,
    pub manet: ManetInfo,
    pub last_updated: Option<DateTime<Utc>>,
}

impl From<&NodeView> for NodeSnapshot {
    fn from(view: &NodeView) -> Self {
        Self {
            address: view.address.clone(),
            display_name: view.display_name.clone(),
            label: view.label().to_string(),
            connection_state: view.connection_state,
            display_status: DisplayStatus::derive(view.connection_state, view.is_busy),
            is_busy: view.is_busy,
            attributes: view.attributes.clone(),
            manet: view.manet.clone(),
            last_updated: view.last_updated,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PollKind {
    Attributes,
    Status,
    Manet,
}

/// One tracked node
#[derive(Clone)]
pub struct NodeState {
    view: Arc<RwLock<NodeView>>,
    client: Arc<dyn NodeClient>,
    timings: PollTimings,
    signals: Option<mpsc::Sender<NodeSignal>>,
    /// Token for the running poller generation, if any
    polling: Arc<Mutex<Option<CancellationToken>>>,
}

impl NodeState {
    /// Create a node without starting any background work.
    pub fn new(
        address: impl Into<String>,
        client: Arc<dyn NodeClient>,
        timings: PollTimings,
        signals: Option<mpsc::Sender<NodeSignal>>,
    ) -> Self {
        Self::from_view(NodeView::new(address.into()), client, timings, signals)
    }

    /// Rebuild a node from its persisted projection. `is_busy` always starts false.
    pub fn restore(
        saved: PersistedNode,
        client: Arc<dyn NodeClient>,
        timings: PollTimings,
        signals: Option<mpsc::Sender<NodeSignal>>,
    ) -> Self {
        let view = NodeView {
            address: saved.address,
            display_name: saved.display_name,
            connection_state: saved.connection_state,
            attributes: saved.attributes,
            manet: ManetInfo {
                link_address: saved.manet_address.filter(|s| !s.trim().is_empty()),
                link_status: saved.manet_link_status,
                node_info: None,
                self_info: None,
            },
            is_busy: false,
            last_updated: None,
        };
        Self::from_view(view, client, timings, signals)
    }

    fn from_view(
        view: NodeView,
        client: Arc<dyn NodeClient>,
        timings: PollTimings,
        signals: Option<mpsc::Sender<NodeSignal>>,
    ) -> Self {
        Self {
            view: Arc::new(RwLock::new(view)),
            client,
            timings,
            signals,
            polling: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn address(&self) -> String {
        self.view.read().await.address.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.view.read().await.connection_state
    }

    pub async fn is_busy(&self) -> bool {
        self.view.read().await.is_busy
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::from(&*self.view.read().await)
    }

    /// Projection written to the roster store
    pub async fn to_persisted(&self) -> PersistedNode {
        let view = self.view.read().await;
        PersistedNode {
            address: view.address.clone(),
            display_name: view.display_name.clone(),
            manet_address: view.manet.link_address.clone(),
            connection_state: view.connection_state,
            attributes: view.attributes.clone(),
            manet_link_status: view.manet.link_status,
        }
    }

    fn send(&self, signal: NodeSignal) {
        if let Some(ref tx) = self.signals {
            // A full channel only drops a redundant notification; the next tick re-sends
            if let Err(e) = tx.try_send(signal) {
                debug!("Dropped node signal: {}", e);
            }
        }
    }

    fn notify_changed(&self, address: &str) {
        self.send(NodeSignal::Changed {
            address: address.to_string(),
        });
    }

    // =========================================================================
    // Refresh operations
    // =========================================================================

    /// Poll `/api/attributes`. Failure clears the attributes and marks the
    /// node disconnected. A result for an address the node no longer has is
    /// dropped.
    pub async fn refresh_attributes(&self) {
        let address = self.address().await;
        let result = self
            .client
            .fetch_attributes(&address, self.timings.attributes_timeout)
            .await;

        let changed = {
            let mut view = self.view.write().await;
            if view.address != address {
                debug!(address = %address, "Node retargeted, dropping attribute result");
                return;
            }
            let before = (view.connection_state, view.attributes.clone());
            match result {
                Ok(data) => {
                    view.attributes = Some(NodeAttributes::from_agent_json(&data));
                }
                Err(e) => {
                    if view.connection_state != ConnectionState::Disconnected {
                        warn!(address = %address, "Attribute fetch failed, marking disconnected: {}", e);
                    } else {
                        debug!(address = %address, "Attribute fetch failed: {}", e);
                    }
                    view.attributes = None;
                    view.connection_state = ConnectionState::Disconnected;
                }
            }
            view.last_updated = Some(Utc::now());
            before != (view.connection_state, view.attributes.clone())
        };

        if changed {
            self.notify_changed(&address);
        }
    }

    /// Poll `/api/node_status`. Anything other than `RUNNING`/`OFF` counts
    /// as a failure.
    pub async fn refresh_status(&self) {
        let address = self.address().await;
        let result = self
            .client
            .fetch_status(&address, self.timings.status_timeout)
            .await;

        let reported = match result {
            Ok(s) => match ConnectionState::from_reported(&s) {
                Some(state) => Some(state),
                None => {
                    warn!(address = %address, "Unexpected node_status '{}'", s);
                    None
                }
            },
            Err(e) => {
                debug!(address = %address, "Status fetch failed: {}", e);
                None
            }
        };
        let next = reported.unwrap_or(ConnectionState::Disconnected);

        let previous = {
            let mut view = self.view.write().await;
            if view.address != address {
                debug!(address = %address, "Node retargeted, dropping status result");
                return;
            }
            let previous = view.connection_state;
            view.connection_state = next;
            view.last_updated = Some(Utc::now());
            previous
        };

        if previous != next {
            info!(address = %address, "Node status {} -> {}", previous, next);
            self.notify_changed(&address);
        }
    }

    /// Poll the MANET radio on the link address, if one is configured.
    pub async fn refresh_manet_link(&self) {
        let (address, manet_address) = {
            let view = self.view.read().await;
            (
                view.address.clone(),
                view.manet.configured_address().map(|s| s.to_string()),
            )
        };

        let Some(manet_address) = manet_address else {
            let changed = {
                let mut view = self.view.write().await;
                let changed = view.manet.link_status != LinkStatus::NotConfigured;
                view.manet.link_status = LinkStatus::NotConfigured;
                changed
            };
            if changed {
                self.notify_changed(&address);
            }
            return;
        };

        let result = self
            .client
            .fetch_manet_status(&manet_address, self.timings.manet_timeout)
            .await;

        let changed = {
            let mut view = self.view.write().await;
            if view.manet.configured_address() != Some(manet_address.as_str()) {
                // Link address was edited while the request was in flight
                false
            } else {
                let before = view.manet.clone();
                match result {
                    Ok(report) => {
                        view.manet.link_status = LinkStatus::from(report.status.as_str());
                        view.manet.node_info = report.node_info;
                        view.manet.self_info = report.self_info;
                    }
                    Err(e) => {
                        debug!(address = %address, manet = %manet_address, "MANET check failed: {}", e);
                        view.manet.link_status = match e {
                            FetchError::Timeout => LinkStatus::Timeout,
                            FetchError::Transport(_) => LinkStatus::Unreachable,
                            FetchError::Status { .. } | FetchError::Decode(_) => LinkStatus::Error,
                        };
                    }
                }
                before != view.manet
            }
        };

        if changed {
            self.notify_changed(&address);
        }
    }

    /// Run all three refreshes concurrently
    pub async fn refresh_all(&self) {
        tokio::join!(
            self.refresh_attributes(),
            self.refresh_status(),
            self.refresh_manet_link()
        );
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Start or stop the broadcast script.
    ///
    /// `action` must be `start` (or the agent's own `setupv2`) or `stop`;
    /// anything else fails before touching state or the network. Otherwise
    /// `is_busy` is set, the request is sent, and `is_busy` is cleared once
    /// the settle delay has elapsed, whatever the node answered.
    pub async fn toggle_broadcast(&self, action: &str) -> Result<ToggleOutcome, NodeError> {
        let action: BroadcastAction = action.parse().map_err(|bad: String| {
            warn!("Rejected broadcast action '{}'", bad);
            NodeError::InvalidAction(bad)
        })?;

        let address = {
            let mut view = self.view.write().await;
            if view.is_busy {
                return Err(NodeError::Busy(view.address.clone()));
            }
            view.is_busy = true;
            view.address.clone()
        };
        self.notify_changed(&address);

        info!(address = %address, "Sending broadcast {}", action.wire_value());
        let result = self
            .client
            .post_setup_script(&address, action, self.timings.command_timeout)
            .await;
        let outcome = ToggleOutcome::from_result(action, &result);

        match &result {
            Ok(()) => info!(address = %address, "Broadcast {} accepted", action.wire_value()),
            Err(e) if outcome.reboot_alert_requested => {
                warn!(address = %address, "Broadcast {} failed, node may need a reboot: {}", action.wire_value(), e)
            }
            Err(e) => warn!(address = %address, "Broadcast {} returned {}", action.wire_value(), e),
        }

        self.schedule_settle();
        self.send(NodeSignal::ToggleDispatched {
            address,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Clear `is_busy` after the settle delay
    fn schedule_settle(&self) {
        let node = self.clone();
        let delay = self.timings.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let address = {
                let mut view = node.view.write().await;
                view.is_busy = false;
                view.address.clone()
            };
            debug!(address = %address, "Toggle settled");
            node.send(NodeSignal::ToggleSettled { address });
        });
    }

    /// Update one configuration field. Only allowed while the node is not
    /// broadcasting.
    pub async fn update_config(&self, field: &str, value: Value) -> Result<(), NodeError> {
        let address = {
            let view = self.view.read().await;
            if view.is_busy || view.connection_state == ConnectionState::Running {
                return Err(NodeError::Broadcasting);
            }
            view.address.clone()
        };

        match self
            .client
            .post_config(&address, field, &value, self.timings.command_timeout)
            .await
        {
            Ok(()) => {
                info!(address = %address, "Updated config {} = {}", field, value);
                Ok(())
            }
            Err(FetchError::Status { message, .. }) => Err(NodeError::Rejected(message)),
            Err(e) => Err(NodeError::Request(e)),
        }
    }

    /// Fetch one of the node's log files as text
    pub async fn download_log(&self, kind: LogKind) -> Result<String, NodeError> {
        let address = self.address().await;
        Ok(self
            .client
            .download_log(&address, kind, self.timings.command_timeout)
            .await?)
    }

    /// Retarget the node. Resets the MANET status until the next poll.
    pub(crate) async fn apply_edit(
        &self,
        address: String,
        display_name: String,
        manet_address: Option<String>,
    ) {
        let manet_address = manet_address.filter(|s| !s.trim().is_empty());
        {
            let mut view = self.view.write().await;
            if view.manet.link_address != manet_address {
                view.manet.node_info = None;
                view.manet.self_info = None;
            }
            view.address = address.clone();
            view.display_name = display_name;
            view.manet.link_address = manet_address;
            view.manet.link_status = LinkStatus::NotConfigured;
        }
        self.notify_changed(&address);
    }

    // =========================================================================
    // Polling lifecycle
    // =========================================================================

    /// Start the three pollers. Each fires immediately, then on its own
    /// interval. No-op while already polling.
    pub fn start_polling(&self) {
        let token = {
            let mut slot = self.polling.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return;
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        self.spawn_poller(PollKind::Attributes, self.timings.attributes_interval, token.clone());
        self.spawn_poller(PollKind::Status, self.timings.status_interval, token.clone());
        self.spawn_poller(PollKind::Manet, self.timings.manet_interval, token);
    }

    /// Stop future poll ticks. Idempotent.
    pub fn stop_polling(&self) {
        let token = self
            .polling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    pub fn is_polling(&self) -> bool {
        self.polling
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    fn spawn_poller(&self, kind: PollKind, period: Duration, shutdown: CancellationToken) {
        let node = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => match kind {
                        PollKind::Attributes => node.refresh_attributes().await,
                        PollKind::Status => node.refresh_status().await,
                        PollKind::Manet => node.refresh_manet_link().await,
                    },
                }
            }
            debug!(?kind, "Poller stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::FakeClient;
    use serde_json::json;

    fn node_with(fake: &Arc<FakeClient>) -> (NodeState, mpsc::Receiver<NodeSignal>) {
        let (tx, rx) = mpsc::channel(64);
        let node = NodeState::new("10.0.0.5", fake.clone(), PollTimings::default(), Some(tx));
        (node, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<NodeSignal>) -> Vec<NodeSignal> {
        let mut out = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            out.push(signal);
        }
        out
    }

    fn settled_count(signals: &[NodeSignal]) -> usize {
        signals
            .iter()
            .filter(|s| matches!(s, NodeSignal::ToggleSettled { .. }))
            .count()
    }

    #[tokio::test]
    async fn new_node_starts_disconnected_and_unconfigured() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);

        let snap = node.snapshot().await;
        assert_eq!(snap.connection_state, ConnectionState::Disconnected);
        assert_eq!(snap.manet.link_status, LinkStatus::NotConfigured);
        assert!(snap.attributes.is_none());
        assert!(!snap.is_busy);
        assert_eq!(snap.label, "10.0.0.5");
        assert!(fake.calls().is_empty(), "construction must not touch the network");
    }

    #[tokio::test]
    async fn attributes_success_replaces_wholesale() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);

        fake.set_attributes(Ok(json!({"gnb_id": "1", "cpu_usage": 10, "tx_power": 20})));
        node.refresh_attributes().await;
        fake.set_attributes(Ok(json!({"cpu_usage": 30})));
        node.refresh_attributes().await;

        let attrs = node.snapshot().await.attributes.unwrap();
        assert_eq!(attrs.core.cpu_usage_percent, Some(30.0));
        assert_eq!(attrs.core.gnb_id, None, "stale fields must not survive");
        assert_eq!(attrs.radio.tx_power, None);
    }

    #[tokio::test]
    async fn attributes_failure_always_disconnects() {
        let failures = [
            FetchError::Timeout,
            FetchError::Transport("connection refused".into()),
            FetchError::Status { code: 500, message: "boom".into() },
            FetchError::Decode("not json".into()),
        ];

        for failure in failures {
            let fake = FakeClient::new();
            let (node, _rx) = node_with(&fake);

            fake.set_status(Ok("RUNNING".into()));
            fake.set_attributes(Ok(json!({"cpu_usage": 5})));
            node.refresh_status().await;
            node.refresh_attributes().await;
            assert_eq!(node.connection_state().await, ConnectionState::Running);

            fake.set_attributes(Err(failure.clone()));
            node.refresh_attributes().await;

            let snap = node.snapshot().await;
            assert_eq!(snap.connection_state, ConnectionState::Disconnected, "{:?}", failure);
            assert!(snap.attributes.is_none(), "{:?}", failure);
        }
    }

    #[tokio::test]
    async fn status_adopts_reported_value() {
        let fake = FakeClient::new();
        let (node, mut rx) = node_with(&fake);

        fake.set_status(Ok("OFF".into()));
        node.refresh_status().await;
        assert_eq!(node.connection_state().await, ConnectionState::Off);
        assert_eq!(
            drain(&mut rx),
            vec![NodeSignal::Changed { address: "10.0.0.5".into() }]
        );

        // same value again: no notification
        node.refresh_status().await;
        assert!(drain(&mut rx).is_empty());

        fake.set_status(Ok("BOOTING".into()));
        node.refresh_status().await;
        assert_eq!(node.connection_state().await, ConnectionState::Disconnected);

        fake.set_status(Ok("RUNNING".into()));
        node.refresh_status().await;
        fake.set_status(Err(FetchError::Timeout));
        node.refresh_status().await;
        assert_eq!(node.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn manet_unconfigured_skips_network() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);

        node.refresh_manet_link().await;
        assert_eq!(node.snapshot().await.manet.link_status, LinkStatus::NotConfigured);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn manet_failures_are_classified() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        node.apply_edit("10.0.0.5".into(), String::new(), Some("172.16.0.5".into()))
            .await;

        let cases = [
            (Err(FetchError::Timeout), LinkStatus::Timeout),
            (Err(FetchError::Transport("no route".into())), LinkStatus::Unreachable),
            (
                Err(FetchError::Status { code: 503, message: String::new() }),
                LinkStatus::Error,
            ),
        ];
        for (response, expected) in cases {
            fake.set_manet(response);
            node.refresh_manet_link().await;
            assert_eq!(node.snapshot().await.manet.link_status, expected);
        }

        fake.set_manet(Ok(ManetReportBuilder::connected()));
        node.refresh_manet_link().await;
        let manet = node.snapshot().await.manet;
        assert_eq!(manet.link_status, LinkStatus::Connected);
        assert_eq!(manet.self_info.unwrap()["label"], "alpha");
        assert!(fake.calls().iter().any(|c| c == "manet 172.16.0.5"));
    }

    struct ManetReportBuilder;

    impl ManetReportBuilder {
        fn connected() -> crate::node::ManetReport {
            crate::node::ManetReport {
                status: "Connected".into(),
                node_info: Some(json!([{"id": 7}])),
                self_info: Some(json!({"label": "alpha"})),
            }
        }
    }

    #[tokio::test]
    async fn edit_resets_manet_status() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        node.apply_edit("10.0.0.5".into(), String::new(), Some("172.16.0.5".into()))
            .await;
        fake.set_manet(Ok(ManetReportBuilder::connected()));
        node.refresh_manet_link().await;

        node.apply_edit("10.0.0.6".into(), "north mast".into(), Some("172.16.0.6".into()))
            .await;

        let snap = node.snapshot().await;
        assert_eq!(snap.address, "10.0.0.6");
        assert_eq!(snap.label, "north mast");
        assert_eq!(snap.manet.link_status, LinkStatus::NotConfigured);
        assert!(snap.manet.self_info.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn manet_answer_for_old_link_address_is_dropped() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        node.apply_edit("10.0.0.5".into(), String::new(), Some("172.16.0.5".into()))
            .await;
        fake.set_manet(Ok(ManetReportBuilder::connected()));
        fake.set_manet_delay(Duration::from_secs(1));

        let in_flight = tokio::spawn({
            let node = node.clone();
            async move { node.refresh_manet_link().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        node.apply_edit("10.0.0.5".into(), String::new(), Some("172.16.0.9".into()))
            .await;
        in_flight.await.unwrap();

        let manet = node.snapshot().await.manet;
        assert_eq!(manet.link_address.as_deref(), Some("172.16.0.9"));
        assert_eq!(manet.link_status, LinkStatus::NotConfigured);
        assert!(manet.self_info.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_answers_for_old_address_are_dropped() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);

        // The old node answers slowly: stale attributes, and a failed status
        fake.set_attributes(Ok(json!({"gnb_id": "OLD-NODE"})));
        fake.set_attributes_delay(Duration::from_millis(500));
        fake.set_status(Err(FetchError::Timeout));
        fake.set_status_delay(Duration::from_millis(500));
        let in_flight = tokio::spawn({
            let node = node.clone();
            async move { node.refresh_all().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        node.apply_edit("10.0.0.6".into(), String::new(), None).await;
        fake.set_attributes_delay(Duration::ZERO);
        fake.set_status_delay(Duration::ZERO);
        fake.set_attributes(Ok(json!({"gnb_id": "NEW-NODE"})));
        fake.set_status(Ok("RUNNING".into()));
        node.refresh_all().await;
        in_flight.await.unwrap();

        let snap = node.snapshot().await;
        assert_eq!(snap.address, "10.0.0.6");
        assert_eq!(
            snap.attributes.and_then(|a| a.core.gnb_id).as_deref(),
            Some("NEW-NODE")
        );
        assert_eq!(snap.connection_state, ConnectionState::Running);
        assert!(fake.calls().iter().any(|c| c == "attributes 10.0.0.5"));
    }

    #[tokio::test]
    async fn invalid_action_never_touches_state_or_network() {
        let fake = FakeClient::new();
        let (node, mut rx) = node_with(&fake);

        let err = node.toggle_broadcast("reboot").await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidAction(ref a) if a == "reboot"));
        assert!(!node.is_busy().await);
        assert!(fake.calls().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_clears_busy_once_after_settle_on_every_path() {
        let cases = [
            (Ok(()), false, true),
            (Err(FetchError::Status { code: 500, message: "stuck".into() }), true, false),
            (Err(FetchError::Status { code: 504, message: String::new() }), true, false),
            (Err(FetchError::Status { code: 409, message: "busy".into() }), false, true),
            (Err(FetchError::Transport("refused".into())), true, false),
            (Err(FetchError::Timeout), true, false),
        ];

        for (response, reboot, initializing) in cases {
            let fake = FakeClient::new();
            let (node, mut rx) = node_with(&fake);
            fake.set_setup(response.clone());

            let outcome = node.toggle_broadcast("setupv2").await.unwrap();
            assert_eq!(outcome.reboot_alert_requested, reboot, "{:?}", response);
            assert_eq!(outcome.initializing_requested, initializing, "{:?}", response);
            assert_eq!(outcome.accepted, response.is_ok());
            assert!(node.is_busy().await);
            assert_eq!(
                node.snapshot().await.display_status,
                DisplayStatus::Initializing
            );

            tokio::time::sleep(Duration::from_millis(3900)).await;
            assert!(node.is_busy().await, "busy must hold for the settle delay");

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(!node.is_busy().await);

            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(settled_count(&drain(&mut rx)), 1, "{:?}", response);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_does_not_change_connection_state() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        fake.set_status(Ok("OFF".into()));
        node.refresh_status().await;

        fake.set_setup(Err(FetchError::Transport("refused".into())));
        node.toggle_broadcast("start").await.unwrap();
        assert_eq!(node.connection_state().await, ConnectionState::Off);
        assert!(fake.calls().iter().any(|c| c == "setup 10.0.0.5 setupv2"));
    }

    #[tokio::test(start_paused = true)]
    async fn second_toggle_while_busy_is_rejected() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);

        node.toggle_broadcast("stop").await.unwrap();
        assert!(matches!(
            node.toggle_broadcast("start").await,
            Err(NodeError::Busy(_))
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(node.toggle_broadcast("start").await.is_ok());
    }

    #[tokio::test]
    async fn config_update_blocked_while_running() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);

        fake.set_status(Ok("RUNNING".into()));
        node.refresh_status().await;
        assert!(matches!(
            node.update_config("gnb_pci", json!(12)).await,
            Err(NodeError::Broadcasting)
        ));

        fake.set_status(Ok("OFF".into()));
        node.refresh_status().await;
        node.update_config("gnb_pci", json!(12)).await.unwrap();

        fake.set_config(Err(FetchError::Status { code: 400, message: "bad field".into() }));
        match node.update_config("nope", json!(1)).await {
            Err(NodeError::Rejected(msg)) => assert_eq!(msg, "bad field"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn download_log_passes_kind() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        fake.set_log(Ok("line 1\nline 2".into()));

        let text = node.download_log(LogKind::Du).await.unwrap();
        assert_eq!(text, "line 1\nline 2");
        assert!(fake.calls().iter().any(|c| c == "log 10.0.0.5 du"));
    }

    #[tokio::test(start_paused = true)]
    async fn pollers_run_on_independent_cadences_until_stopped() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        node.apply_edit("10.0.0.5".into(), String::new(), Some("172.16.0.5".into()))
            .await;

        node.start_polling();
        node.start_polling(); // idempotent
        assert!(node.is_polling());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fake.count("attributes"), 1);
        assert_eq!(fake.count("status"), 1);
        assert_eq!(fake.count("manet"), 1);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(fake.count("attributes"), 6);
        assert_eq!(fake.count("status"), 2);
        assert_eq!(fake.count("manet"), 2);

        node.stop_polling();
        node.stop_polling();
        assert!(!node.is_polling());
        tokio::time::sleep(Duration::from_millis(30)).await;
        let frozen = fake.calls().len();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fake.calls().len(), frozen, "no ticks after stop");
    }

    #[tokio::test]
    async fn persisted_projection_excludes_busy() {
        let fake = FakeClient::new();
        let (node, _rx) = node_with(&fake);
        fake.set_status(Ok("OFF".into()));
        node.refresh_status().await;

        let saved = node.to_persisted().await;
        assert_eq!(saved.connection_state, ConnectionState::Off);

        let json = serde_json::to_value(&saved).unwrap();
        assert!(json.get("isBusy").is_none());

        let restored = NodeState::restore(saved, fake.clone(), PollTimings::default(), None);
        let snap = restored.snapshot().await;
        assert_eq!(snap.connection_state, ConnectionState::Off);
        assert!(!snap.is_busy);
        assert!(!restored.is_polling());
    }
}
