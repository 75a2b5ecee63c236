//! Node agent HTTP client
//!
//! Every node runs a small REST agent on port 5000:
//!
//! | Method | Path                        | Used by                    |
//! |--------|-----------------------------|----------------------------|
//! | GET    | `/api/attributes`           | attribute poller           |
//! | GET    | `/api/node_status`          | status poller              |
//! | GET    | `/api/manet_status`         | MANET poller (link address)|
//! | POST   | `/api/setup_script`         | broadcast toggle           |
//! | POST   | `/api/config`               | per-field config update    |
//! | GET    | `/api/download/{kind}_log`  | log viewer                 |
//!
//! The [`NodeClient`] trait is the seam between node state and the network;
//! [`HttpNodeClient`] is the reqwest implementation. Each call takes its own
//! timeout so the pollers can use different bounds.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default agent port
pub const DEFAULT_NODE_PORT: u16 = 5000;

/// Why a single request to a node failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

impl FetchError {
    /// HTTP status code, if the node answered at all
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Broadcast script command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastAction {
    Start,
    Stop,
}

impl BroadcastAction {
    /// Value the agent expects in the `action` field
    pub fn wire_value(self) -> &'static str {
        match self {
            Self::Start => "setupv2",
            Self::Stop => "stop",
        }
    }
}

impl FromStr for BroadcastAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" | "setupv2" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(other.to_string()),
        }
    }
}

/// Which log file to download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Du,
    Cu,
    Setup,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Du => write!(f, "du"),
            Self::Cu => write!(f, "cu"),
            Self::Setup => write!(f, "setup"),
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_end_matches("_log") {
            "du" => Ok(Self::Du),
            "cu" => Ok(Self::Cu),
            "setup" => Ok(Self::Setup),
            other => Err(other.to_string()),
        }
    }
}

/// Body of `GET /api/manet_status`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ManetReport {
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "nodeInfo")]
    pub node_info: Option<Value>,
    #[serde(default, rename = "selfManetInfo")]
    pub self_info: Option<Value>,
}

/// Operations against one node agent (addressed per call)
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// Raw attribute payload
    async fn fetch_attributes(&self, address: &str, timeout: Duration)
        -> Result<Value, FetchError>;

    /// The agent's `node_status` string
    async fn fetch_status(&self, address: &str, timeout: Duration) -> Result<String, FetchError>;

    /// MANET radio status, queried on the link address
    async fn fetch_manet_status(
        &self,
        manet_address: &str,
        timeout: Duration,
    ) -> Result<ManetReport, FetchError>;

    /// Start or stop the broadcast script; non-2xx is `FetchError::Status`
    async fn post_setup_script(
        &self,
        address: &str,
        action: BroadcastAction,
        timeout: Duration,
    ) -> Result<(), FetchError>;

    /// Update one configuration field
    async fn post_config(
        &self,
        address: &str,
        field: &str,
        value: &Value,
        timeout: Duration,
    ) -> Result<(), FetchError>;

    /// Raw log text
    async fn download_log(
        &self,
        address: &str,
        kind: LogKind,
        timeout: Duration,
    ) -> Result<String, FetchError>;
}

/// reqwest-backed node client
#[derive(Clone)]
pub struct HttpNodeClient {
    client: Client,
    port: u16,
}

impl HttpNodeClient {
    pub fn new(port: u16) -> Self {
        // No client-wide timeout: each call sets its own
        Self {
            client: Client::new(),
            port,
        }
    }

    fn url(&self, address: &str, path: &str) -> String {
        format!("http://{}:{}{}", address, self.port, path)
    }

    /// Turn a non-2xx response into `FetchError::Status`, pulling the
    /// agent's `message`/`error` text out of the body when present.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| {
                v.get("message")
                    .or_else(|| v.get("error"))
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
            })
            .unwrap_or(body);
        Err(FetchError::Status {
            code: status.as_u16(),
            message,
        })
    }
}

impl Default for HttpNodeClient {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_PORT)
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn fetch_attributes(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let response = self
            .client
            .get(self.url(address, "/api/attributes"))
            .timeout(timeout)
            .send()
            .await?;
        let data: Value = Self::check(response).await?.json().await?;
        if !data.is_object() {
            return Err(FetchError::Decode("attributes are not an object".into()));
        }
        Ok(data)
    }

    async fn fetch_status(&self, address: &str, timeout: Duration) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.url(address, "/api/node_status"))
            .timeout(timeout)
            .send()
            .await?;
        let data: Value = Self::check(response).await?.json().await?;
        data.get("node_status")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| FetchError::Decode("missing node_status".into()))
    }

    async fn fetch_manet_status(
        &self,
        manet_address: &str,
        timeout: Duration,
    ) -> Result<ManetReport, FetchError> {
        let response = self
            .client
            .get(self.url(manet_address, "/api/manet_status"))
            .timeout(timeout)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn post_setup_script(
        &self,
        address: &str,
        action: BroadcastAction,
        timeout: Duration,
    ) -> Result<(), FetchError> {
        debug!(address, action = action.wire_value(), "POST setup_script");
        let response = self
            .client
            .post(self.url(address, "/api/setup_script"))
            .json(&json!({ "action": action.wire_value() }))
            .timeout(timeout)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn post_config(
        &self,
        address: &str,
        field: &str,
        value: &Value,
        timeout: Duration,
    ) -> Result<(), FetchError> {
        debug!(address, field, "POST config");
        let response = self
            .client
            .post(self.url(address, "/api/config"))
            .json(&json!({ "field": field, "value": value }))
            .timeout(timeout)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn download_log(
        &self,
        address: &str,
        kind: LogKind,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let response = self
            .client
            .get(self.url(address, &format!("/api/download/{}_log", kind)))
            .timeout(timeout)
            .send()
            .await?;
        Ok(Self::check(response).await?.text().await?)
    }
}
