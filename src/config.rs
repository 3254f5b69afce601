//! Daemon configuration.
//!
//! The configuration is loaded from `$XDG_CONFIG_HOME/i3pm/config.json`.
//! Every section is optional so the file can be extended later without
//! breaking backward compatibility.
//!
//! # Example
//!
//! ```json
//! {
//!   "ipc": { "subscriber_queue": 64, "subscriber_timeout_ms": 50 },
//!   "workspace_mode": { "max_workspace": 70 },
//!   "layout": {
//!     "restore_timeout_ms": 10000,
//!     "apps": { "code": ["code", "--new-window"] }
//!   },
//!   "rules": [
//!     { "pattern": "firefox", "scope": "global" },
//!     { "pattern": "org.wezfurlong.*", "scope": "scoped", "priority": 120 }
//!   ]
//! }
//! ```

use crate::classify::Scope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
///
/// A minimal `{}` file is valid; all sections fall back to their
/// compiled-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where project, layout and active-project documents live.
    /// Defaults to the config directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub ipc: IpcConfig,

    #[serde(default)]
    pub workspace_mode: WorkspaceModeConfig,

    #[serde(default)]
    pub layout: LayoutConfig,

    /// User classification rules; they outrank the built-in ones unless
    /// given a lower priority.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// JSON-RPC server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Socket path.  Defaults to `$XDG_RUNTIME_DIR/i3pm.sock`.
    pub socket_path: Option<PathBuf>,
    /// Events buffered per subscriber before new ones are dropped.
    pub subscriber_queue: usize,
    /// How long one write to a subscriber may take before it is
    /// disconnected (ms).
    pub subscriber_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            subscriber_queue: 64,
            subscriber_timeout_ms: 50,
        }
    }
}

impl IpcConfig {
    pub fn subscriber_timeout(&self) -> Duration {
        Duration::from_millis(self.subscriber_timeout_ms)
    }
}

/// Workspace-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceModeConfig {
    /// Highest workspace number reachable by typing digits.
    pub max_workspace: u32,
}

impl Default for WorkspaceModeConfig {
    fn default() -> Self {
        Self { max_workspace: 70 }
    }
}

/// Layout capture / restore settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// How long restore waits for each relaunched window (ms).
    pub restore_timeout_ms: u64,
    /// How often restore re-queries the tree while waiting (ms).
    pub poll_interval_ms: u64,
    /// `app name -> argv` used to relaunch applications.  Apps missing
    /// here are relaunched with the command line captured with the layout.
    pub apps: BTreeMap<String, Vec<String>>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            restore_timeout_ms: 10_000,
            poll_interval_ms: 100,
            apps: BTreeMap::new(),
        }
    }
}

impl LayoutConfig {
    pub fn restore_timeout(&self) -> Duration {
        Duration::from_millis(self.restore_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A user classification rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Case-insensitive glob matched against window class or instance.
    pub pattern: String,
    pub scope: Scope,
    /// Defaults to [`USER_RULE_PRIORITY`](crate::classify::USER_RULE_PRIORITY).
    #[serde(default)]
    pub priority: Option<i32>,
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ConfigError(format!("failed to parse {}: {}", path.display(), e)))?;
        Ok(config)
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(config_dir)
    }

    /// Resolved socket path.
    pub fn socket_path(&self) -> PathBuf {
        self.ipc.socket_path.clone().unwrap_or_else(default_socket_path)
    }
}

/// Error from loading or parsing a configuration file.
#[derive(Debug, thiserror::Error)]
#[error("config error: {0}")]
pub struct ConfigError(String);

/// Default socket path for the JSON-RPC server.
pub fn default_socket_path() -> PathBuf {
    let runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(runtime).join("i3pm.sock")
}

/// Resolve the config directory (`$XDG_CONFIG_HOME/i3pm`).
pub fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        format!("{}/.config", home)
    });
    PathBuf::from(base).join("i3pm")
}
