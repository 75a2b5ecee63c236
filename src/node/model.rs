//! Node view-model types: connection state, telemetry attributes, MANET link.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Maximum samples kept in the CPU/RAM history buffers
pub const HISTORY_LEN: usize = 100;

/// Authoritative connection state, owned by the status poller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Running,
    Off,
}

impl ConnectionState {
    /// Parse the agent's `node_status` value. Only `RUNNING` and `OFF` are
    /// meaningful answers from a reachable node.
    pub fn from_reported(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "RUNNING" => Some(Self::Running),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Off => write!(f, "OFF"),
        }
    }
}

/// What the presentation layer should show. A pending toggle masks the
/// connection state without changing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplayStatus {
    Disconnected,
    Running,
    Off,
    Initializing,
}

impl DisplayStatus {
    pub fn derive(state: ConnectionState, is_busy: bool) -> Self {
        if is_busy {
            return Self::Initializing;
        }
        match state {
            ConnectionState::Disconnected => Self::Disconnected,
            ConnectionState::Running => Self::Running,
            ConnectionState::Off => Self::Off,
        }
    }
}

/// MANET link status for a node's secondary address
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkStatus {
    #[default]
    NotConfigured,
    Connected,
    Disconnected,
    /// Link up but unstable; the agent reports this as "Pinging..." or "Unstable"
    Pinging,
    Timeout,
    Unreachable,
    Error,
}

impl From<&str> for LinkStatus {
    fn from(s: &str) -> Self {
        match s.trim().trim_end_matches('.').to_lowercase().as_str() {
            "connected" => Self::Connected,
            "disconnected" => Self::Disconnected,
            "pinging" | "unstable" => Self::Pinging,
            "timeout" => Self::Timeout,
            "unreachable" => Self::Unreachable,
            "not configured" | "notconfigured" => Self::NotConfigured,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotConfigured => "Not Configured",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
            Self::Pinging => "Pinging...",
            Self::Timeout => "Timeout",
            Self::Unreachable => "Unreachable",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// MANET link view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManetInfo {
    pub link_address: Option<String>,
    pub link_status: LinkStatus,
    /// Neighbor table as last reported by the MANET radio
    pub node_info: Option<Value>,
    /// The radio's description of itself (label, position)
    pub self_info: Option<Value>,
}

impl ManetInfo {
    /// Configured link address, ignoring blank input
    pub fn configured_address(&self) -> Option<&str> {
        self.link_address
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreData {
    pub gnb_id: Option<String>,
    pub pci: Option<String>,
    pub board_time: Option<String>,
    pub board_date: Option<String>,
    pub core_connection: Option<String>,
    pub cpu_usage_percent: Option<f64>,
    pub cpu_temp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RamData {
    pub total_mb: Option<f64>,
    pub used_mb: Option<f64>,
    pub free_mb: Option<f64>,
    pub usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskData {
    pub total_gb: Option<f64>,
    pub used_gb: Option<f64>,
    pub free_gb: Option<f64>,
    pub usage_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioData {
    pub frequency_downlink: Option<f64>,
    pub bandwidth_downlink: Option<f64>,
    pub frequency_uplink: Option<f64>,
    pub bandwidth_uplink: Option<f64>,
    pub tx_power: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpData {
    pub gnb: Option<String>,
    pub ngc: Option<String>,
    pub ngu: Option<String>,
}

/// Telemetry snapshot from `GET /api/attributes`.
///
/// A node that cannot be reached has no attributes at all (`None` in
/// [`NodeView`](super::state::NodeView)); a parsed snapshot always replaces
/// the previous one wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    pub core: CoreData,
    pub ram: RamData,
    pub disk: DiskData,
    pub radio: RadioData,
    pub ip: IpData,
    pub cpu_history: Vec<f64>,
    pub ram_history: Vec<f64>,
}

/// Read a numeric field that the agent may send as a number or a string
fn num(data: &Value, key: &str) -> Option<f64> {
    let value = match data.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Read a field as text; numbers are rendered
fn text(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn history(data: &Value, key: &str) -> Vec<f64> {
    let values: Vec<f64> = data
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| match v {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.parse().ok(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    let skip = values.len().saturating_sub(HISTORY_LEN);
    values.into_iter().skip(skip).collect()
}

impl NodeAttributes {
    /// Build a snapshot from the agent's flat attribute payload
    pub fn from_agent_json(data: &Value) -> Self {
        let ram_total = num(data, "ram_total");
        let ram_usage = num(data, "ram_usage");
        let (ram_used, ram_free) = match (ram_total, ram_usage) {
            (Some(total), Some(pct)) => {
                let used = total * pct / 100.0;
                (Some(used), Some(total - used))
            }
            _ => (None, None),
        };

        let drive_total = num(data, "drive_total");
        let drive_used = num(data, "drive_used");
        let disk_usage = match (drive_total, drive_used) {
            (Some(total), Some(used)) if total > 0.0 => Some(used / total * 100.0),
            _ => None,
        };

        Self {
            core: CoreData {
                gnb_id: text(data, "gnb_id"),
                pci: text(data, "gnb_pci"),
                board_time: text(data, "board_time"),
                board_date: text(data, "board_date"),
                core_connection: text(data, "core_connection"),
                cpu_usage_percent: num(data, "cpu_usage"),
                cpu_temp: num(data, "cpu_temp"),
            },
            ram: RamData {
                total_mb: ram_total,
                used_mb: ram_used,
                free_mb: ram_free,
                usage_percent: ram_usage,
            },
            disk: DiskData {
                total_gb: drive_total,
                used_gb: drive_used,
                free_gb: num(data, "drive_free"),
                usage_percent: disk_usage,
            },
            radio: RadioData {
                frequency_downlink: num(data, "frequency_down_link"),
                bandwidth_downlink: num(data, "bandwidth_down_link"),
                frequency_uplink: num(data, "frequency_up_link"),
                bandwidth_uplink: num(data, "bandwidth_up_link"),
                tx_power: num(data, "tx_power"),
            },
            ip: IpData {
                gnb: text(data, "ip_address_gnb"),
                ngc: text(data, "ip_address_ngc"),
                ngu: text(data, "ip_address_ngu"),
            },
            cpu_history: history(data, "cpu_usage_history"),
            ram_history: history(data, "ram_usage_history"),
        }
    }
}
