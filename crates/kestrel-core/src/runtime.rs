//! Entry point for front-ends: owns the registry, the hosts, and the
//! dispatch/ranking/action pipeline.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use kestrel_types::{Query, RankedResult, RuntimeKind, Selection, UiUpdate};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::config::Config;
use crate::dispatcher::{GenerationTracker, QueryDispatcher};
use crate::host::{CommandLauncher, HostLauncher, HostPlugin, HostProcess, HostSnapshot};
use crate::invoker::{ActionInvoker, ActionOutcome};
use crate::plugin::{
    CoreServices, DiscoveredPlugin, InitContext, Plugin, PluginApi, discover_plugins,
};
use crate::ranker::rank;
use crate::registry::{PluginInstance, PluginRegistry};
use crate::services::{MemorySettingsStore, SettingsStore, UiSink};
use crate::{Error, Result};

pub struct Runtime {
    config: Config,
    services: CoreServices,
    registry: Arc<PluginRegistry>,
    dispatcher: QueryDispatcher,
    invoker: ActionInvoker,
    launcher: Arc<dyn HostLauncher>,
    hosts: RwLock<HashMap<RuntimeKind, Arc<HostProcess>>>,
}

impl Runtime {
    pub fn new(
        config: Config,
        settings: Arc<dyn SettingsStore>,
        ui: Arc<dyn UiSink>,
        launcher: Arc<dyn HostLauncher>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new());
        let services = CoreServices::new(Arc::clone(&settings), ui, Arc::clone(&cache));
        let registry = Arc::new(PluginRegistry::new(settings, Arc::clone(&cache)));
        let dispatcher = QueryDispatcher::new(
            Arc::clone(&registry),
            Arc::new(GenerationTracker::new()),
            config.dispatch.clone(),
        );
        let invoker = ActionInvoker::new(
            Arc::clone(&registry),
            cache,
            Arc::clone(&services.ui),
            config.actions.clone(),
        );

        Self {
            config,
            services,
            registry,
            dispatcher,
            invoker,
            launcher,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    /// Runtime with in-memory settings, stdio hosts from `config`, and a
    /// channel receiving UI updates.
    #[must_use]
    pub fn with_channel(config: Config) -> (Self, UnboundedReceiver<UiUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let launcher = Arc::new(CommandLauncher::new(config.hosts.clone()));
        let runtime = Self::new(
            config,
            Arc::new(MemorySettingsStore::new()),
            Arc::new(tx),
            launcher,
        );
        (runtime, rx)
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Register and initialize an in-process plugin.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata is not native, the id is taken, or
    /// the plugin's init fails (it is unregistered again in that case).
    pub async fn register_native(&self, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginInstance>> {
        let metadata = plugin.metadata().clone();
        if metadata.runtime.is_host() {
            return Err(Error::Plugin(format!(
                "{} declares runtime {}, expected native",
                metadata.id, metadata.runtime
            )));
        }
        let instance = self.registry.register(metadata, plugin)?;
        self.init_instance(&instance, None).await?;
        Ok(instance)
    }

    /// Register a plugin found on disk; its host starts on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is taken or the host rejects the plugin.
    pub async fn load_discovered(&self, plugin: DiscoveredPlugin) -> Result<Arc<PluginInstance>> {
        let runtime = plugin.metadata.runtime;
        if !runtime.is_host() {
            return Err(Error::Plugin(format!(
                "{} is native and must be registered in-process",
                plugin.metadata.id
            )));
        }

        let host = self.host_for(runtime);
        let adapter = HostPlugin::new(
            plugin.metadata.clone(),
            plugin.directory.clone(),
            host,
            self.config.actions.action_timeout(),
        );
        let instance = self.registry.register(plugin.metadata, Arc::new(adapter))?;
        self.init_instance(&instance, Some(plugin.directory)).await?;
        Ok(instance)
    }

    /// Discover and load every plugin under `dir`. Returns how many loaded.
    ///
    /// # Errors
    ///
    /// Returns an error only if `dir` cannot be read; single plugins that fail
    /// to load are logged and skipped.
    pub async fn load_plugins_dir(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for plugin in discover_plugins(dir)? {
            let id = plugin.metadata.id.clone();
            match self.load_discovered(plugin).await {
                Ok(_) => loaded += 1,
                Err(e) => warn!("[{}] Failed to load plugin: {}", id, e),
            }
        }
        info!("Loaded {} plugin(s) from {}", loaded, dir.display());
        Ok(loaded)
    }

    async fn init_instance(
        &self,
        instance: &Arc<PluginInstance>,
        directory: Option<std::path::PathBuf>,
    ) -> Result<()> {
        let ctx = InitContext {
            directory,
            api: PluginApi::new(Arc::clone(instance.metadata()), self.services.clone()),
        };
        if let Err(e) = instance.handle().init(ctx).await {
            warn!("[{}] Init failed, unregistering: {}", instance.id(), e);
            self.detach_from_host(instance);
            let _ = self.registry.unregister(instance.id());
            return Err(e);
        }
        Ok(())
    }

    fn host_for(&self, runtime: RuntimeKind) -> Arc<HostProcess> {
        if let Some(host) = self.hosts.read().get(&runtime) {
            return Arc::clone(host);
        }
        let mut hosts = self.hosts.write();
        let host = hosts.entry(runtime).or_insert_with(|| {
            debug!("[{}] Creating plugin host", runtime);
            HostProcess::new(
                runtime,
                Arc::clone(&self.launcher),
                self.config.supervisor.clone(),
                self.services.clone(),
            )
        });
        Arc::clone(host)
    }

    /// Run typed input for `session` and push the ranked results to the UI.
    ///
    /// Returns `None` if a newer query for the session superseded this one.
    pub async fn query(&self, session: &str, raw: &str) -> Option<Vec<RankedResult>> {
        let query = self.registry.parse_query(raw, None);
        self.run_query(session, query).await
    }

    /// Offer an OS selection (text or files) to selection-aware plugins.
    pub async fn query_selection(
        &self,
        session: &str,
        selection: Selection,
    ) -> Option<Vec<RankedResult>> {
        let query = self.registry.parse_query("", Some(selection));
        self.run_query(session, query).await
    }

    async fn run_query(&self, session: &str, query: Query) -> Option<Vec<RankedResult>> {
        let outcome = self.dispatcher.dispatch(session, &query).await?;
        let ranked = rank(outcome.batches);

        if !self
            .dispatcher
            .generations()
            .is_current(session, outcome.generation)
        {
            debug!(
                "Dropping stale generation {} for session {} after ranking",
                outcome.generation, session
            );
            return None;
        }

        debug!(
            "Session {} generation {}: {} result(s){}",
            session,
            outcome.generation,
            ranked.len(),
            if outcome.used_fallback {
                " (fallback)"
            } else {
                ""
            }
        );
        self.services
            .cache
            .replace(session, outcome.generation, &ranked);
        self.services
            .ui
            .show_results(session, outcome.generation, ranked.clone());
        Some(ranked)
    }

    /// # Errors
    ///
    /// See [`ActionInvoker::invoke`].
    pub async fn invoke_action(
        &self,
        session: &str,
        result_id: &str,
        action_id: Option<&str>,
    ) -> Result<ActionOutcome> {
        self.invoker.invoke(session, result_id, action_id).await
    }

    /// Forget a closed input session's generation and cached results
    pub fn close_session(&self, session: &str) {
        self.dispatcher.generations().forget(session);
        self.services.cache.clear_session(session);
    }

    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` for an unknown id.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(id, enabled)
    }

    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` for an unknown id.
    pub async fn update_setting(&self, id: &str, key: &str, value: &str) -> Result<()> {
        self.registry.update_setting(id, key, value).await
    }

    /// Uninstall a plugin, removing it from its host as well.
    ///
    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` for an unknown id.
    pub fn unregister(&self, id: &str) -> Result<()> {
        let instance = self.registry.unregister(id)?;
        self.detach_from_host(&instance);
        Ok(())
    }

    fn detach_from_host(&self, instance: &PluginInstance) {
        if !instance.is_host_backed() {
            return;
        }
        if let Some(host) = self.hosts.read().get(&instance.metadata().runtime) {
            host.detach(instance.id());
        }
    }

    /// Introspection of every host created so far, ordered by runtime
    #[must_use]
    pub fn host_snapshots(&self) -> Vec<HostSnapshot> {
        let mut snapshots: Vec<HostSnapshot> =
            self.hosts.read().values().map(|h| h.snapshot()).collect();
        snapshots.sort_by_key(|s| s.runtime.as_str());
        snapshots
    }

    /// Stop every host process
    pub async fn shutdown(&self) {
        let hosts: Vec<Arc<HostProcess>> = self.hosts.read().values().cloned().collect();
        for host in hosts {
            host.shutdown().await;
        }
        info!("Runtime shut down");
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field("hosts", &self.hosts.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
