use crate::Result;
use kestrel_types::RuntimeKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub actions: ActionConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// How to start the host process for each foreign runtime
    #[serde(default = "default_hosts")]
    pub hosts: HashMap<RuntimeKind, HostCommand>,
}

impl Config {
    /// Load config from file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        super::validation::warn_unknown_fields(&content, "config.json");
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn host_command(&self, runtime: RuntimeKind) -> Option<&HostCommand> {
        self.hosts.get(&runtime)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            actions: ActionConfig::default(),
            supervisor: SupervisorConfig::default(),
            hosts: default_hosts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Per-plugin ceiling for a single query call
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,

    /// Ask every enabled plugin's fallback hook when nothing matched
    #[serde(default = "default_true")]
    pub fallback: bool,
}

impl DispatchConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout(),
            fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionConfig {
    #[serde(default = "default_action_timeout")]
    pub action_timeout_ms: u64,
}

impl ActionConfig {
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            action_timeout_ms: default_action_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Consecutive failed restart attempts before the host is given up on
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    #[serde(default = "default_max_restart_delay")]
    pub max_restart_delay_ms: u64,
}

impl SupervisorConfig {
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Backoff before restart attempt `attempt` (1-based), doubling up to the ceiling
    #[must_use]
    pub fn restart_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.restart_delay_ms);
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor)
            .min(Duration::from_millis(self.max_restart_delay_ms))
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout_ms: default_startup_timeout(),
            ping_interval_ms: default_ping_interval(),
            ping_timeout_ms: default_ping_timeout(),
            max_restarts: default_max_restarts(),
            restart_delay_ms: default_restart_delay(),
            max_restart_delay_ms: default_max_restart_delay(),
        }
    }
}

/// Command line for a host process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostCommand {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_query_timeout() -> u64 {
    500
}
fn default_action_timeout() -> u64 {
    30_000
}
fn default_startup_timeout() -> u64 {
    10_000
}
fn default_ping_interval() -> u64 {
    5_000
}
fn default_ping_timeout() -> u64 {
    2_000
}
fn default_max_restarts() -> u32 {
    5
}
fn default_restart_delay() -> u64 {
    1_000
}
fn default_max_restart_delay() -> u64 {
    60_000
}

fn default_hosts() -> HashMap<RuntimeKind, HostCommand> {
    HashMap::from([
        (
            RuntimeKind::Python,
            HostCommand {
                command: "python3".to_string(),
                args: vec!["-m".to_string(), "kestrel_host".to_string()],
                working_dir: None,
            },
        ),
        (
            RuntimeKind::Nodejs,
            HostCommand {
                command: "node".to_string(),
                args: vec!["kestrel-host.js".to_string()],
                working_dir: None,
            },
        ),
    ])
}
