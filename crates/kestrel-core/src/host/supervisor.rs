//! Lifecycle of one host process: launch, handshake, liveness, restart.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kestrel_rpc::RpcChannel;
use kestrel_rpc::methods::{
    self, InitParams, InitializeParams, InitializeResult, LoadPluginParams, PROTOCOL_VERSION,
    PluginRef,
};
use kestrel_types::RuntimeKind;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::callbacks;
use super::launcher::HostLauncher;
use super::{HostSnapshot, HostState, HostedPlugin};
use crate::config::SupervisorConfig;
use crate::plugin::{CoreServices, PluginApi};
use crate::{Error, Result};

/// How long a host gets to exit on its own after the shutdown notification
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Connection {
    channel: Option<RpcChannel>,
    child: Option<Child>,
    restart_count: u32,
    last_seen_alive: Option<DateTime<Utc>>,
    hosted: BTreeMap<String, HostedPlugin>,
}

/// Supervisor for the host process of one runtime.
///
/// Created idle; the supervision loop starts on the first
/// [`HostProcess::ensure_started`] call.
pub struct HostProcess {
    runtime: RuntimeKind,
    launcher: Arc<dyn HostLauncher>,
    config: SupervisorConfig,
    services: CoreServices,
    conn: RwLock<Connection>,
    state: watch::Sender<HostState>,
    shutdown: CancellationToken,
    started: AtomicBool,
    /// The user hears about a protocol violation once per host
    fault_reported: AtomicBool,
}

impl HostProcess {
    pub fn new(
        runtime: RuntimeKind,
        launcher: Arc<dyn HostLauncher>,
        config: SupervisorConfig,
        services: CoreServices,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(HostState::Starting);
        Arc::new(Self {
            runtime,
            launcher,
            config,
            services,
            conn: RwLock::new(Connection::default()),
            state,
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            fault_reported: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    #[must_use]
    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == HostState::Ready
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    /// The live channel, only while the host is ready
    #[must_use]
    pub fn ready_channel(&self) -> Option<RpcChannel> {
        let conn = self.conn.read();
        if self.is_ready() {
            conn.channel.clone()
        } else {
            None
        }
    }

    #[must_use]
    pub fn hosts_plugin(&self, plugin_id: &str) -> bool {
        self.conn.read().hosted.contains_key(plugin_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> HostSnapshot {
        let conn = self.conn.read();
        HostSnapshot {
            runtime: self.runtime,
            state: self.state(),
            restart_count: conn.restart_count,
            last_seen_alive: conn.last_seen_alive,
            hosted_plugins: conn.hosted.keys().cloned().collect(),
        }
    }

    /// Core API handle for a plugin this host carries
    pub(crate) fn plugin_api(&self, plugin_id: &str) -> Option<PluginApi> {
        self.conn.read().hosted.get(plugin_id).map(|hosted| {
            PluginApi::new(Arc::clone(&hosted.metadata), self.services.clone())
        })
    }

    /// Spawn the supervision loop if it is not running yet.
    pub fn ensure_started(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) || self.shutdown.is_cancelled() {
            return;
        }
        info!("[{}] Starting plugin host", self.runtime);
        tokio::spawn(Arc::clone(self).run());
    }

    /// Add a plugin to this host. It is loaded right away when the host is
    /// ready, and on every later (re)start.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is ready but rejects the plugin.
    pub async fn attach(&self, plugin: HostedPlugin) -> Result<()> {
        let id = plugin.metadata.id.clone();
        let channel = {
            let mut conn = self.conn.write();
            conn.hosted.insert(id.clone(), plugin.clone());
            if self.is_ready() {
                conn.channel.clone()
            } else {
                None
            }
        };

        match channel {
            Some(channel) => self.load_plugin(&channel, &plugin).await,
            None => {
                debug!(
                    "[{}] Host {} not ready, plugin load deferred",
                    id, self.runtime
                );
                Ok(())
            }
        }
    }

    /// Remove a plugin. Returns false if it was not hosted here.
    pub fn detach(&self, plugin_id: &str) -> bool {
        let (removed, channel) = {
            let mut conn = self.conn.write();
            (conn.hosted.remove(plugin_id).is_some(), conn.channel.clone())
        };
        if removed
            && let Some(channel) = channel
        {
            let params = PluginRef {
                plugin_id: plugin_id.to_string(),
            };
            match serde_json::to_value(params) {
                Ok(params) => {
                    if let Err(e) = channel.notify(methods::UNLOAD_PLUGIN, Some(params)) {
                        debug!("[{}] Unload notification not sent: {}", plugin_id, e);
                    }
                }
                Err(e) => warn!("[{}] Failed to encode unload params: {}", plugin_id, e),
            }
        }
        removed
    }

    /// Stop supervising and terminate the host.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let channel = self.conn.read().channel.clone();
        if let Some(channel) = channel
            && channel.notify(methods::SHUTDOWN, None).is_ok()
        {
            // Give the host a moment to exit cleanly before it is killed
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, channel.closed()).await;
        }

        self.clear_connection();
        self.set_state(HostState::Stopped);
        info!("[{}] Plugin host shut down", self.runtime);
    }

    async fn run(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        let mut ever_ready = false;

        loop {
            let started = tokio::select! {
                () = self.shutdown.cancelled() => break,
                started = self.start() => started,
            };

            match started {
                Ok(channel) => {
                    ever_ready = true;
                    attempt = 0;
                    self.monitor(&channel).await;
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!("[{}] Plugin host connection lost", self.runtime);
                    self.set_state(HostState::Degraded);
                    if let Some(fault) = channel.protocol_fault() {
                        self.report_fault(&fault);
                    }
                }
                Err(e) if !ever_ready => {
                    error!("[{}] Plugin host failed to start: {}", self.runtime, e);
                    self.clear_connection();
                    self.set_state(HostState::Stopped);
                    self.services.ui.notify(
                        &format!("{} plugins unavailable", self.runtime),
                        &format!("The plugin host failed to start: {e}"),
                    );
                    return;
                }
                Err(e) => {
                    warn!("[{}] Restart attempt {} failed: {}", self.runtime, attempt, e);
                }
            }

            self.clear_connection();
            attempt += 1;
            if attempt > self.config.max_restarts {
                error!(
                    "[{}] Plugin host gave up after {} restart attempt(s)",
                    self.runtime, self.config.max_restarts
                );
                self.set_state(HostState::Stopped);
                self.services.ui.notify(
                    &format!("{} plugins stopped", self.runtime),
                    "The plugin host kept crashing and will not be restarted",
                );
                return;
            }

            let delay = self.config.restart_delay(attempt);
            self.conn.write().restart_count += 1;
            self.set_state(HostState::Restarting);
            info!(
                "[{}] Restarting plugin host in {:?} (attempt {}/{})",
                self.runtime, delay, attempt, self.config.max_restarts
            );

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.clear_connection();
        self.set_state(HostState::Stopped);
    }

    /// Launch, handshake and load every hosted plugin. Ends in `Ready`.
    async fn start(self: &Arc<Self>) -> Result<RpcChannel> {
        let startup_timeout = self.config.startup_timeout();
        let startup_error = |reason: String| Error::HostStartup {
            runtime: self.runtime.to_string(),
            reason,
        };

        let connection = tokio::time::timeout(startup_timeout, self.launcher.launch(self.runtime))
            .await
            .map_err(|_| startup_error(format!("launch timed out after {startup_timeout:?}")))??;

        self.conn.write().child = connection.child;
        let channel = RpcChannel::spawn(
            self.runtime.as_str(),
            connection.reader,
            connection.writer,
            callbacks::handlers(Arc::downgrade(self)),
        );

        match self.handshake(&channel, startup_timeout).await {
            Ok(()) => Ok(channel),
            Err(e) => {
                channel.close();
                Err(startup_error(e.to_string()))
            }
        }
    }

    async fn handshake(&self, channel: &RpcChannel, timeout: Duration) -> Result<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION,
            runtime: self.runtime,
            capabilities: callbacks::METHODS.iter().map(ToString::to_string).collect(),
        };
        let reply: InitializeResult = channel
            .request(methods::INITIALIZE, &params, timeout)
            .await?;
        if reply.protocol_version != PROTOCOL_VERSION {
            warn!(
                "[{}] Host speaks protocol {}, core speaks {}",
                self.runtime, reply.protocol_version, PROTOCOL_VERSION
            );
        }
        info!(
            "[{}] Handshake complete (host version '{}')",
            self.runtime, reply.host_version
        );
        self.touch();

        // Plugins attached while loading are picked up by the next pass; the
        // final empty check and the switch to Ready happen under one lock.
        let mut loaded = HashSet::new();
        loop {
            let pending: Vec<HostedPlugin> = {
                let mut conn = self.conn.write();
                let pending: Vec<HostedPlugin> = conn
                    .hosted
                    .values()
                    .filter(|p| !loaded.contains(&p.metadata.id))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    conn.channel = Some(channel.clone());
                    self.state.send_replace(HostState::Ready);
                    break;
                }
                pending
            };

            for plugin in pending {
                if let Err(e) = self.load_plugin(channel, &plugin).await {
                    if channel.is_closed() {
                        return Err(e);
                    }
                    warn!("[{}] Failed to load plugin: {}", plugin.metadata.id, e);
                }
                loaded.insert(plugin.metadata.id.clone());
            }
        }

        info!(
            "[{}] Plugin host ready with {} plugin(s)",
            self.runtime,
            loaded.len()
        );
        Ok(())
    }

    async fn load_plugin(&self, channel: &RpcChannel, plugin: &HostedPlugin) -> Result<()> {
        let timeout = self.config.startup_timeout();
        let id = plugin.metadata.id.clone();

        let load = LoadPluginParams {
            plugin_id: id.clone(),
            directory: plugin.directory.clone(),
            entry: plugin.metadata.entry.clone(),
            metadata: (*plugin.metadata).clone(),
        };
        let _: Value = channel.request(methods::LOAD_PLUGIN, &load, timeout).await?;

        let init = InitParams {
            plugin_id: id.clone(),
            directory: plugin.directory.clone(),
        };
        let _: Value = channel.request(methods::INIT, &init, timeout).await?;

        debug!("[{}] Loaded into {} host", id, self.runtime);
        Ok(())
    }

    /// Ping on an interval until the channel dies, a ping fails or shutdown.
    async fn monitor(&self, channel: &RpcChannel) {
        let mut ticker = tokio::time::interval(self.config.ping_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // interval fires immediately; the handshake just proved liveness
        ticker.tick().await;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                () = channel.closed() => return,
                _ = ticker.tick() => {
                    match channel.call(methods::PING, None, self.config.ping_timeout()).await {
                        Ok(_) => self.touch(),
                        Err(e) => {
                            warn!("[{}] Liveness check failed: {}", self.runtime, e);
                            channel.close();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn report_fault(&self, fault: &str) {
        error!("[{}] Plugin host broke the protocol: {}", self.runtime, fault);
        if !self.fault_reported.swap(true, Ordering::AcqRel) {
            self.services.ui.notify(
                &format!("{} plugin host protocol error", self.runtime),
                &format!("Restarting the plugin host: {fault}"),
            );
        }
    }

    fn touch(&self) {
        self.conn.write().last_seen_alive = Some(Utc::now());
    }

    fn set_state(&self, state: HostState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("[{}] Host state {} -> {}", self.runtime, previous, state);
        }
    }

    /// Close the channel and kill the child, if any
    fn clear_connection(&self) {
        let (channel, child) = {
            let mut conn = self.conn.write();
            (conn.channel.take(), conn.child.take())
        };
        if let Some(channel) = channel {
            channel.close();
        }
        if let Some(mut child) = child
            && let Err(e) = child.start_kill()
        {
            debug!("[{}] Host already exited: {}", self.runtime, e);
        }
    }
}

impl std::fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcess")
            .field("runtime", &self.runtime)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
