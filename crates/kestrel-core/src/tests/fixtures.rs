//! Test fixtures and helpers

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kestrel_rpc::methods::{
    self, ActionParams, InitParams, InitializeParams, InitializeResult, LoadPluginParams,
    PROTOCOL_VERSION, QueryParams, SettingChangedParams,
};
use kestrel_rpc::{HandlerMap, RpcChannel, RpcError, handler_fn, parse_params};
use kestrel_types::{
    ActionContext, GLOBAL_TRIGGER_KEYWORD, PluginMetadata, Query, QueryResult, RuntimeKind,
    UiUpdate,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::mpsc;

use crate::cache::ResultCache;
use crate::config::{Config, SupervisorConfig};
use crate::host::{HostConnection, HostLauncher};
use crate::plugin::{InitContext, Plugin, PluginApi};
use crate::registry::PluginRegistry;
use crate::services::MemorySettingsStore;
use crate::{Error, Result, Runtime};

/// How a [`MockPlugin`] answers one query
#[derive(Debug, Clone)]
pub enum Reply {
    Results(Vec<QueryResult>),
    After(Duration, Vec<QueryResult>),
    Fail(String),
    Panic,
}

type Responder = Box<dyn Fn(&Query) -> Reply + Send + Sync>;

/// Native plugin whose behaviour is scripted per test
pub struct MockPlugin {
    metadata: PluginMetadata,
    responder: Responder,
    fallback: Vec<QueryResult>,
    action_error: Option<String>,
    action_delay: Option<Duration>,
    action_panics: bool,
    init_error: Option<String>,
    pub queries: Mutex<Vec<Query>>,
    pub actions: Mutex<Vec<ActionContext>>,
    pub settings_changed: Mutex<Vec<(String, String)>>,
    pub api: Mutex<Option<PluginApi>>,
}

impl MockPlugin {
    pub fn new(metadata: PluginMetadata) -> Self {
        Self {
            metadata,
            responder: Box::new(|_| Reply::Results(Vec::new())),
            fallback: Vec::new(),
            action_error: None,
            action_delay: None,
            action_panics: false,
            init_error: None,
            queries: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            settings_changed: Mutex::new(Vec::new()),
            api: Mutex::new(None),
        }
    }

    /// Native plugin with the given trigger keywords
    pub fn keyword(id: &str, keywords: &[&str]) -> Self {
        Self::new(
            PluginMetadata::new(id, id, RuntimeKind::Native)
                .with_trigger_keywords(keywords.iter().copied()),
        )
    }

    /// Native plugin queried on every input
    pub fn global(id: &str) -> Self {
        Self::keyword(id, &[GLOBAL_TRIGGER_KEYWORD])
    }

    pub fn returning(self, results: Vec<QueryResult>) -> Self {
        self.responding(move |_| Reply::Results(results.clone()))
    }

    pub fn responding<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Query) -> Reply + Send + Sync + 'static,
    {
        self.responder = Box::new(responder);
        self
    }

    pub fn with_fallback(mut self, results: Vec<QueryResult>) -> Self {
        self.fallback = results;
        self
    }

    pub fn failing_actions(mut self, reason: &str) -> Self {
        self.action_error = Some(reason.to_string());
        self
    }

    pub fn slow_actions(mut self, delay: Duration) -> Self {
        self.action_delay = Some(delay);
        self
    }

    pub fn panicking_actions(mut self) -> Self {
        self.action_panics = true;
        self
    }

    pub fn failing_init(mut self, reason: &str) -> Self {
        self.init_error = Some(reason.to_string());
        self
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().len()
    }
}

#[async_trait]
impl Plugin for MockPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn init(&self, ctx: InitContext) -> Result<()> {
        if let Some(reason) = &self.init_error {
            return Err(Error::Plugin(reason.clone()));
        }
        *self.api.lock() = Some(ctx.api);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<QueryResult>> {
        self.queries.lock().push(query.clone());
        match (self.responder)(query) {
            Reply::Results(results) => Ok(results),
            Reply::After(delay, results) => {
                tokio::time::sleep(delay).await;
                Ok(results)
            }
            Reply::Fail(reason) => Err(Error::Plugin(reason)),
            Reply::Panic => panic!("mock plugin {} exploded", self.metadata.id),
        }
    }

    async fn query_fallback(&self, _query: &Query) -> Result<Vec<QueryResult>> {
        Ok(self.fallback.clone())
    }

    async fn action(&self, ctx: ActionContext) -> Result<()> {
        if let Some(delay) = self.action_delay {
            tokio::time::sleep(delay).await;
        }
        self.actions.lock().push(ctx);
        assert!(!self.action_panics, "mock plugin {} action exploded", self.metadata.id);
        match &self.action_error {
            Some(reason) => Err(Error::Plugin(reason.clone())),
            None => Ok(()),
        }
    }

    async fn on_setting_changed(&self, key: &str, value: &str) -> Result<()> {
        self.settings_changed
            .lock()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

pub fn result(title: &str, score: i64) -> QueryResult {
    QueryResult::new(title).with_score(score)
}

/// Registry over fresh in-memory collaborators
pub fn make_registry() -> (Arc<PluginRegistry>, Arc<MemorySettingsStore>, Arc<ResultCache>) {
    let settings = Arc::new(MemorySettingsStore::new());
    let cache = Arc::new(ResultCache::new());
    let registry = Arc::new(PluginRegistry::new(settings.clone(), Arc::clone(&cache)));
    (registry, settings, cache)
}

/// Supervisor settings scaled down for tests
pub fn fast_supervisor() -> SupervisorConfig {
    SupervisorConfig {
        startup_timeout_ms: 1_000,
        ping_interval_ms: 200,
        ping_timeout_ms: 100,
        max_restarts: 2,
        restart_delay_ms: 10,
        max_restart_delay_ms: 100,
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.dispatch.query_timeout_ms = 200;
    config.actions.action_timeout_ms = 1_000;
    config.supervisor = fast_supervisor();
    config
}

/// Runtime wired to a [`FakeLauncher`], with the UI update receiver
pub fn make_runtime(
    launcher: Arc<FakeLauncher>,
) -> (Runtime, mpsc::UnboundedReceiver<UiUpdate>, Arc<MemorySettingsStore>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let settings = Arc::new(MemorySettingsStore::new());
    let runtime = Runtime::new(test_config(), settings.clone(), Arc::new(tx), launcher);
    (runtime, rx, settings)
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<UiUpdate>) -> Vec<UiUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

/// State shared by every process a [`FakeLauncher`] starts
#[derive(Default)]
pub struct FakeHostState {
    pub results: Mutex<HashMap<String, Vec<QueryResult>>>,
    pub fallback: Mutex<HashMap<String, Vec<QueryResult>>>,
    pub query_delay: Mutex<Option<Duration>>,
    pub loaded: Mutex<Vec<String>>,
    pub inits: Mutex<Vec<String>>,
    /// Plugin ids whose `init` the host answers with an error
    pub rejected_inits: Mutex<Vec<String>>,
    pub actions: Mutex<Vec<ActionParams>>,
    pub settings_changed: Mutex<Vec<SettingChangedParams>>,
    pub handshakes: AtomicUsize,
    /// When false the host ignores `initialize`
    pub answer_handshake: AtomicBool,
    /// When false the host ignores `ping`
    pub answer_pings: AtomicBool,
}

impl FakeHostState {
    fn new() -> Self {
        Self {
            answer_handshake: AtomicBool::new(true),
            answer_pings: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn set_results(&self, plugin_id: &str, results: Vec<QueryResult>) {
        self.results.lock().insert(plugin_id.to_string(), results);
    }
}

/// In-memory stand-in for a host process, speaking the real protocol over
/// a duplex pipe.
pub struct FakeLauncher {
    pub state: Arc<FakeHostState>,
    /// Host-side channels, one per launch
    pub processes: Mutex<Vec<RpcChannel>>,
    pub launches: AtomicU32,
    /// Fail this many launches before succeeding again
    pub fail_launches: AtomicU32,
    /// Raw byte feeds into each connection's core-bound stream
    raw_feeds: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(FakeHostState::new()),
            processes: Mutex::new(Vec::new()),
            launches: AtomicU32::new(0),
            fail_launches: AtomicU32::new(0),
            raw_feeds: Mutex::new(Vec::new()),
        })
    }

    /// Simulate the current host process dying
    pub fn crash(&self) {
        if let Some(process) = self.processes.lock().last() {
            process.close();
        }
    }

    /// The host side of the latest connection
    pub fn current(&self) -> Option<RpcChannel> {
        self.processes.lock().last().cloned()
    }

    /// Write bytes straight onto the latest connection, bypassing framing
    pub fn send_raw(&self, bytes: &[u8]) {
        if let Some(feed) = self.raw_feeds.lock().last() {
            let _ = feed.send(bytes.to_vec());
        }
    }
}

#[async_trait]
impl HostLauncher for FakeLauncher {
    async fn launch(&self, runtime: RuntimeKind) -> Result<HostConnection> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::HostStartup {
                runtime: runtime.to_string(),
                reason: "spawn refused".to_string(),
            });
        }

        let (core_end, host_end) = tokio::io::duplex(256 * 1024);
        let (host_read, wire) = tokio::io::split(host_end);
        let (host_write, host_output) = tokio::io::duplex(256 * 1024);
        let (feed, raw) = mpsc::unbounded_channel();
        tokio::spawn(forward_host_output(host_output, wire, raw));
        self.raw_feeds.lock().push(feed);

        let host = RpcChannel::spawn(
            format!("fake-{runtime}"),
            host_read,
            host_write,
            fake_host_handlers(&self.state, runtime),
        );
        self.processes.lock().push(host);

        let (core_read, core_write) = tokio::io::split(core_end);
        Ok(HostConnection::new(core_read, core_write))
    }
}

/// Copy what the host channel writes to the core, splicing in raw bytes
async fn forward_host_output(
    mut output: DuplexStream,
    mut wire: WriteHalf<DuplexStream>,
    mut raw: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let chunk = tokio::select! {
            read = output.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => buf[..n].to_vec(),
            },
            Some(bytes) = raw.recv() => bytes,
        };
        if wire.write_all(&chunk).await.is_err() {
            break;
        }
    }
    let _ = wire.shutdown().await;
}

fn fake_host_handlers(state: &Arc<FakeHostState>, runtime: RuntimeKind) -> HandlerMap {
    let handlers = HandlerMap::new();

    let s = Arc::clone(state);
    handlers.on_call(
        methods::INITIALIZE,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let _: InitializeParams = parse_params(params)?;
                if !s.answer_handshake.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                s.handshakes.fetch_add(1, Ordering::SeqCst);
                let reply = InitializeResult {
                    protocol_version: PROTOCOL_VERSION,
                    runtime,
                    host_version: "fake-1.0".to_string(),
                };
                serde_json::to_value(reply).map_err(|e| RpcError::internal_error(e.to_string()))
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::PING,
        handler_fn(move |_| {
            let s = Arc::clone(&s);
            async move {
                if !s.answer_pings.load(Ordering::SeqCst) {
                    std::future::pending::<()>().await;
                }
                Ok(Value::Null)
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::LOAD_PLUGIN,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let p: LoadPluginParams = parse_params(params)?;
                s.loaded.lock().push(p.plugin_id);
                Ok(Value::Null)
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::INIT,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let p: InitParams = parse_params(params)?;
                if s.rejected_inits.lock().contains(&p.plugin_id) {
                    return Err(RpcError::plugin_error("init rejected"));
                }
                s.inits.lock().push(p.plugin_id);
                Ok(Value::Null)
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::QUERY,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let p: QueryParams = parse_params(params)?;
                let delay = *s.query_delay.lock();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let results = s.results.lock().get(&p.plugin_id).cloned();
                match results {
                    Some(results) => serde_json::to_value(results)
                        .map_err(|e| RpcError::internal_error(e.to_string())),
                    None => Err(RpcError::plugin_not_found(p.plugin_id)),
                }
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::QUERY_FALLBACK,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let p: QueryParams = parse_params(params)?;
                let results = s.fallback.lock().get(&p.plugin_id).cloned();
                // null is a valid "nothing" answer
                Ok(results.map_or(Value::Null, |r| {
                    serde_json::to_value(r).unwrap_or(Value::Null)
                }))
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::ACTION,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let p: ActionParams = parse_params(params)?;
                let fail = p.action_id == "explode";
                s.actions.lock().push(p);
                if fail {
                    Err(RpcError::plugin_error("action exploded"))
                } else {
                    Ok(Value::Null)
                }
            }
        }),
    );

    let s = Arc::clone(state);
    handlers.on_call(
        methods::SETTING_CHANGED,
        handler_fn(move |params| {
            let s = Arc::clone(&s);
            async move {
                let p: SettingChangedParams = parse_params(params)?;
                s.settings_changed.lock().push(p);
                Ok(Value::Null)
            }
        }),
    );

    handlers
}

/// Manifest for a host-backed plugin
pub fn host_metadata(id: &str, runtime: RuntimeKind, keywords: &[&str]) -> PluginMetadata {
    let mut metadata =
        PluginMetadata::new(id, id, runtime).with_trigger_keywords(keywords.iter().copied());
    metadata.entry = "main.py".to_string();
    metadata
}

pub fn plugin_dir(id: &str) -> PathBuf {
    PathBuf::from("/plugins").join(id)
}
