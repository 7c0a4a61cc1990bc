//! Out-of-process plugin hosts.
//!
//! One [`HostProcess`] per foreign runtime supervises a child process that
//! speaks JSON-RPC over its stdio. [`HostPlugin`] adapts each plugin living
//! in that process to the [`crate::plugin::Plugin`] trait.

mod adapter;
mod callbacks;
mod launcher;
mod supervisor;

pub use adapter::HostPlugin;
pub use launcher::{CommandLauncher, HostConnection, HostLauncher};
pub use supervisor::HostProcess;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_types::{PluginMetadata, RuntimeKind};

/// Lifecycle of a host process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    /// Spawning and handshaking for the first time
    Starting,
    /// Handshake done and plugins loaded; queries are forwarded
    Ready,
    /// Connection lost, about to restart
    Degraded,
    /// Waiting out the backoff or relaunching
    Restarting,
    /// Given up or shut down; hosted plugins stay unavailable
    Stopped,
}

impl HostState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HostState::Starting => "starting",
            HostState::Ready => "ready",
            HostState::Degraded => "degraded",
            HostState::Restarting => "restarting",
            HostState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for HostState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plugin loaded into a host, replayed after every (re)start
#[derive(Debug, Clone)]
pub struct HostedPlugin {
    pub metadata: Arc<PluginMetadata>,
    pub directory: PathBuf,
}

/// Point-in-time view of a host for introspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    pub runtime: RuntimeKind,
    pub state: HostState,
    /// Lifetime number of restart attempts
    pub restart_count: u32,
    pub last_seen_alive: Option<DateTime<Utc>>,
    pub hosted_plugins: Vec<String>,
}
