//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::link_quality::DEFAULT_CAPACITY;
use crate::node::DEFAULT_NODE_PORT;

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Host API listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Port the node agents listen on
    #[serde(default = "default_node_port")]
    pub node_port: u16,

    /// Base URL of the mesh aggregation service; map polling is off without it
    #[serde(default)]
    pub map_service_url: Option<String>,

    #[serde(default = "default_link_matrix_capacity")]
    pub link_matrix_capacity: usize,

    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    #[serde(default = "default_map_poll_interval_secs")]
    pub map_poll_interval_secs: u64,
}

fn default_port() -> u16 {
    8088
}

fn default_node_port() -> u16 {
    DEFAULT_NODE_PORT
}

fn default_link_matrix_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_persist_interval_secs() -> u64 {
    5
}

fn default_map_poll_interval_secs() -> u64 {
    5
}

impl Config {
    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs.max(1))
    }

    pub fn map_poll_interval(&self) -> Duration {
        Duration::from_secs(self.map_poll_interval_secs.max(1))
    }
}

const APP_DIR_NAME: &str = "gnb-dashboard";

/// Get config directory (XDG_CONFIG_HOME or platform default)
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GNB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from(".")
}

/// Get data directory (XDG_DATA_HOME or platform default)
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GNB_DATA_DIR") {
        return PathBuf::from(dir);
    }

    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library/Application Support")
                .join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/share").join(APP_DIR_NAME);
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("LOCALAPPDATA") {
            return PathBuf::from(appdata).join(APP_DIR_NAME);
        }
    }

    PathBuf::from("./data")
}

pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir();

    let mut builder = ::config::Config::builder()
        .set_default("port", default_port() as i64)?
        // config.toml / config.json in the config dir, if present
        .add_source(
            ::config::File::with_name(&config_dir.join("config").to_string_lossy()).required(false),
        )
        // GNB_PORT, GNB_NODE_PORT, GNB_MAP_SERVICE_URL, ...
        .add_source(
            ::config::Environment::with_prefix("GNB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    // Precedence: GNB_PORT > PORT > config file > default
    if let Ok(port) = std::env::var("GNB_PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    } else if let Ok(port) = std::env::var("PORT") {
        if let Ok(port_num) = port.parse::<u16>() {
            builder = builder.set_override("port", port_num as i64)?;
        }
    }

    let config = builder.build()?;

    Ok(config.try_deserialize()?)
}
