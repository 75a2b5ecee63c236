//! Map data loader
//!
//! Polls the mesh aggregation service for node positions, the gateway's
//! battery voltage and the latest link-quality sample, and folds the sample
//! into a long-lived matrix (see [`crate::link_quality`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{DashboardEvent, SharedBus};
use crate::link_quality::{merge_link_quality, LinkQualityMatrix};
use crate::node::FetchError;

/// Default map polling interval
pub const DEFAULT_MAP_POLL_INTERVAL: Duration = Duration::from_secs(5);

const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// Battery voltage mapped to 100%
const MAX_VOLTAGE: f64 = 8.6;
/// Battery voltage mapped to 1% (linear extrapolation of the discharge curve)
const MIN_VOLTAGE: f64 = 7.0;

/// Convert a pack voltage such as `"8.25V"` to a percentage in `1..=100`.
///
/// Only the leading number is read; anything unparseable is `None`.
pub fn battery_percentage(voltage: &str) -> Option<u8> {
    let volts = leading_float(voltage)?;
    let clamped = volts.clamp(MIN_VOLTAGE, MAX_VOLTAGE);
    let pct = 1.0 + (clamped - MIN_VOLTAGE) / (MAX_VOLTAGE - MIN_VOLTAGE) * 99.0;
    Some(pct.round() as u8)
}

/// Longest numeric prefix, after leading whitespace
fn leading_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '-' || *c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    (1..=end)
        .rev()
        .find_map(|len| s[..len].parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Body of `GET /status` on the aggregation service
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapStatus {
    #[serde(default)]
    node_infos: Vec<Value>,
    #[serde(default)]
    self_id: Option<Value>,
    #[serde(default)]
    battery_level: Option<Value>,
    #[serde(default)]
    link_quality: Vec<Vec<Value>>,
}

fn as_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One marker on the map
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapNode {
    pub id: i64,
    pub label: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// `"NN%"` or `"unknown"` on the gateway node, absent elsewhere
    pub battery_level: Option<String>,
    pub is_self: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapSnapshot {
    pub nodes: Vec<MapNode>,
    pub self_id: Option<i64>,
    pub link_quality: LinkQualityMatrix,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct MapDataLoader {
    client: reqwest::Client,
    base_url: Option<String>,
    capacity: usize,
    snapshot: RwLock<MapSnapshot>,
    bus: SharedBus,
}

impl MapDataLoader {
    /// `base_url` of `None` leaves the loader idle with an empty snapshot.
    pub fn new(base_url: Option<String>, capacity: usize, bus: SharedBus) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            capacity,
            snapshot: RwLock::new(MapSnapshot::default()),
            bus,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn snapshot(&self) -> MapSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Fetch and merge one sample. On error the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<MapSnapshot, FetchError> {
        let Some(ref base) = self.base_url else {
            return Ok(self.snapshot().await);
        };

        let response = self
            .client
            .get(format!("{}/status", base))
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        let body: MapStatus = response.json().await?;
        Ok(self.apply(body).await)
    }

    async fn apply(&self, body: MapStatus) -> MapSnapshot {
        let self_id = body.self_id.as_ref().and_then(as_id);
        let battery = body.battery_level.as_ref().map(|v| match v {
            Value::String(s) => battery_percentage(s),
            Value::Number(n) => n.as_f64().and_then(|f| battery_percentage(&f.to_string())),
            _ => None,
        });

        // Positions must line up with the raw matrix, so unparseable ids stay as -1
        let ids: Vec<i64> = body
            .node_infos
            .iter()
            .map(|info| info.get("id").and_then(as_id).unwrap_or(-1))
            .collect();

        let nodes: Vec<MapNode> = body
            .node_infos
            .iter()
            .zip(&ids)
            .filter(|(_, id)| **id >= 0)
            .map(|(info, &id)| {
                let is_self = Some(id) == self_id;
                MapNode {
                    id,
                    label: info.get("label").and_then(|v| v.as_str()).map(String::from),
                    latitude: as_f64(info.get("latitude")),
                    longitude: as_f64(info.get("longitude")),
                    battery_level: if is_self {
                        Some(match battery.flatten() {
                            Some(pct) => format!("{}%", pct),
                            None => "unknown".to_string(),
                        })
                    } else {
                        None
                    },
                    is_self,
                }
            })
            .collect();

        let raw: Vec<Vec<Option<f64>>> = body
            .link_quality
            .iter()
            .map(|row| row.iter().map(|cell| as_f64(Some(cell))).collect())
            .collect();

        let snapshot = {
            let mut current = self.snapshot.write().await;
            let previous = (!current.link_quality.is_empty()).then_some(&current.link_quality);
            let link_quality = merge_link_quality(&ids, &raw, previous, self.capacity, None);
            *current = MapSnapshot {
                nodes,
                self_id,
                link_quality,
                updated_at: Some(Utc::now()),
            };
            current.clone()
        };

        debug!("Map refreshed: {} node(s)", snapshot.nodes.len());
        snapshot
    }

    /// Poll until `shutdown` fires, publishing `MapUpdated` after each merge
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let Some(ref base) = self.base_url else {
            info!("Map service not configured, map polling disabled");
            return;
        };
        info!("Polling map service at {}", base);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.refresh().await {
                    Ok(snapshot) => self.bus.publish(DashboardEvent::MapUpdated {
                        node_count: snapshot.nodes.len(),
                    }),
                    Err(e) => warn!("Map refresh failed: {}", e),
                },
            }
        }
        info!("Map polling stopped");
    }
}
