//! In-memory NodeClient for unit tests. Responses are fixed per endpoint and
//! every call is recorded.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::{BroadcastAction, FetchError, LogKind, ManetReport, NodeClient};

pub(crate) struct FakeClient {
    attributes: Mutex<Result<Value, FetchError>>,
    attributes_delay: Mutex<Duration>,
    status: Mutex<Result<String, FetchError>>,
    status_delay: Mutex<Duration>,
    manet: Mutex<Result<ManetReport, FetchError>>,
    manet_delay: Mutex<Duration>,
    setup: Mutex<Result<(), FetchError>>,
    config: Mutex<Result<(), FetchError>>,
    log: Mutex<Result<String, FetchError>>,
    calls: Mutex<Vec<String>>,
}

impl FakeClient {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            attributes: Mutex::new(Ok(json!({}))),
            attributes_delay: Mutex::new(Duration::ZERO),
            status: Mutex::new(Ok("OFF".to_string())),
            status_delay: Mutex::new(Duration::ZERO),
            manet: Mutex::new(Ok(ManetReport {
                status: "Connected".to_string(),
                ..Default::default()
            })),
            manet_delay: Mutex::new(Duration::ZERO),
            setup: Mutex::new(Ok(())),
            config: Mutex::new(Ok(())),
            log: Mutex::new(Ok(String::new())),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn set_attributes(&self, response: Result<Value, FetchError>) {
        *self.attributes.lock().unwrap() = response;
    }

    pub(crate) fn set_status(&self, response: Result<String, FetchError>) {
        *self.status.lock().unwrap() = response;
    }

    pub(crate) fn set_manet(&self, response: Result<ManetReport, FetchError>) {
        *self.manet.lock().unwrap() = response;
    }

    /// Answers are captured when the request starts and returned after
    /// `delay` (tokio time)
    pub(crate) fn set_attributes_delay(&self, delay: Duration) {
        *self.attributes_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_status_delay(&self, delay: Duration) {
        *self.status_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_manet_delay(&self, delay: Duration) {
        *self.manet_delay.lock().unwrap() = delay;
    }

    pub(crate) fn set_setup(&self, response: Result<(), FetchError>) {
        *self.setup.lock().unwrap() = response;
    }

    pub(crate) fn set_config(&self, response: Result<(), FetchError>) {
        *self.config.lock().unwrap() = response;
    }

    pub(crate) fn set_log(&self, response: Result<String, FetchError>) {
        *self.log.lock().unwrap() = response;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls to one endpoint, e.g. `count("status")`
    pub(crate) fn count(&self, endpoint: &str) -> usize {
        let prefix = format!("{} ", endpoint);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn answer<T: Clone>(response: &Mutex<T>, delay: &Mutex<Duration>) -> T {
        let answer = response.lock().unwrap().clone();
        let delay = *delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        answer
    }
}

#[async_trait]
impl NodeClient for FakeClient {
    async fn fetch_attributes(&self, address: &str, _: Duration) -> Result<Value, FetchError> {
        self.record(format!("attributes {}", address));
        Self::answer(&self.attributes, &self.attributes_delay).await
    }

    async fn fetch_status(&self, address: &str, _: Duration) -> Result<String, FetchError> {
        self.record(format!("status {}", address));
        Self::answer(&self.status, &self.status_delay).await
    }

    async fn fetch_manet_status(
        &self,
        manet_address: &str,
        _: Duration,
    ) -> Result<ManetReport, FetchError> {
        self.record(format!("manet {}", manet_address));
        Self::answer(&self.manet, &self.manet_delay).await
    }

    async fn post_setup_script(
        &self,
        address: &str,
        action: BroadcastAction,
        _: Duration,
    ) -> Result<(), FetchError> {
        self.record(format!("setup {} {}", address, action.wire_value()));
        self.setup.lock().unwrap().clone()
    }

    async fn post_config(
        &self,
        address: &str,
        field: &str,
        _: &Value,
        _: Duration,
    ) -> Result<(), FetchError> {
        self.record(format!("config {} {}", address, field));
        self.config.lock().unwrap().clone()
    }

    async fn download_log(
        &self,
        address: &str,
        kind: LogKind,
        _: Duration,
    ) -> Result<String, FetchError> {
        self.record(format!("log {} {}", address, kind));
        self.log.lock().unwrap().clone()
    }
}
