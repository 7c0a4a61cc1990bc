//! Registry of loaded plugin instances.
//!
//! The registry is the single shared view of every plugin: metadata, live
//! handle, mutable settings and enabled state. Reads take a shared lock;
//! per-instance mutations lock only that instance's settings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use kestrel_types::{
    FeatureName, GLOBAL_TRIGGER_KEYWORD, PluginMetadata, PluginSettings, Query, QueryType,
    Selection,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::ResultCache;
use crate::plugin::Plugin;
use crate::services::SettingsStore;
use crate::{Error, Result};

/// Reserved setting key toggling the plugin on or off (`"true"`/`"false"`)
pub const DISABLED_KEY: &str = "Disabled";
/// Reserved setting key overriding trigger keywords (comma separated)
pub const TRIGGER_KEYWORDS_KEY: &str = "TriggerKeywords";

fn split_keywords(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// A registered plugin
pub struct PluginInstance {
    metadata: Arc<PluginMetadata>,
    handle: Arc<dyn Plugin>,
    settings: RwLock<PluginSettings>,
    last_generation: AtomicU64,
}

impl PluginInstance {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<PluginMetadata> {
        &self.metadata
    }

    #[must_use]
    pub fn handle(&self) -> Arc<dyn Plugin> {
        Arc::clone(&self.handle)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.settings.read().disabled
    }

    #[must_use]
    pub fn is_host_backed(&self) -> bool {
        self.metadata.runtime.is_host()
    }

    #[must_use]
    pub fn settings(&self) -> PluginSettings {
        self.settings.read().clone()
    }

    /// User override if set, else the keywords from metadata
    #[must_use]
    pub fn trigger_keywords(&self) -> Vec<String> {
        self.settings
            .read()
            .trigger_keywords
            .clone()
            .unwrap_or_else(|| self.metadata.trigger_keywords.clone())
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.trigger_keywords()
            .iter()
            .any(|k| k == GLOBAL_TRIGGER_KEYWORD)
    }

    #[must_use]
    pub fn matches_keyword(&self, keyword: &str) -> bool {
        keyword != GLOBAL_TRIGGER_KEYWORD && self.trigger_keywords().iter().any(|k| k == keyword)
    }

    #[must_use]
    pub fn ignores_auto_score(&self) -> bool {
        self.metadata.has_feature(FeatureName::IgnoreAutoScore)
    }

    #[must_use]
    pub fn accepts_selection(&self) -> bool {
        self.metadata.has_feature(FeatureName::QuerySelection)
    }

    /// The query as this instance should see it: parsed when its keyword
    /// matched, otherwise the global view.
    #[must_use]
    pub fn query_view(&self, query: &Query) -> Query {
        if query.has_trigger_keyword() && self.matches_keyword(&query.trigger_keyword) {
            query.clone()
        } else {
            query.global_view()
        }
    }

    /// Latest generation dispatched to this instance
    #[must_use]
    pub fn last_generation(&self) -> u64 {
        self.last_generation.load(Ordering::Acquire)
    }

    pub(crate) fn mark_generation(&self, generation: u64) {
        self.last_generation.fetch_max(generation, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.metadata.id)
            .field("runtime", &self.metadata.runtime)
            .field("settings", &*self.settings.read())
            .field("last_generation", &self.last_generation())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Entries {
    by_id: HashMap<String, Arc<PluginInstance>>,
    order: Vec<String>,
}

pub struct PluginRegistry {
    entries: RwLock<Entries>,
    settings: Arc<dyn SettingsStore>,
    cache: Arc<ResultCache>,
}

impl PluginRegistry {
    pub fn new(settings: Arc<dyn SettingsStore>, cache: Arc<ResultCache>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            settings,
            cache,
        }
    }

    /// Register a plugin, restoring its persisted settings.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicatePlugin` if the id is already registered.
    pub fn register(
        &self,
        metadata: PluginMetadata,
        handle: Arc<dyn Plugin>,
    ) -> Result<Arc<PluginInstance>> {
        if self.entries.read().by_id.contains_key(&metadata.id) {
            return Err(Error::DuplicatePlugin(metadata.id));
        }

        let settings = self.restore_settings(&metadata);
        let instance = Arc::new(PluginInstance {
            metadata: Arc::new(metadata),
            handle,
            settings: RwLock::new(settings),
            last_generation: AtomicU64::new(0),
        });
        self.watch_settings(&instance);

        {
            let mut entries = self.entries.write();
            // Re-check under the write lock
            if entries.by_id.contains_key(instance.id()) {
                return Err(Error::DuplicatePlugin(instance.id().to_string()));
            }
            entries.order.push(instance.id().to_string());
            entries
                .by_id
                .insert(instance.id().to_string(), Arc::clone(&instance));
        }

        info!(
            "[{}] Registered {} plugin (enabled: {})",
            instance.id(),
            instance.metadata.runtime,
            instance.is_enabled()
        );
        Ok(instance)
    }

    fn restore_settings(&self, metadata: &PluginMetadata) -> PluginSettings {
        let id = metadata.id.as_str();
        let values = metadata
            .setting_definitions
            .iter()
            .filter_map(|def| {
                let key = def.key.as_ref()?;
                let value = self
                    .settings
                    .get(id, key)
                    .or_else(|| def.default_value.clone())?;
                Some((key.clone(), value))
            })
            .collect();

        PluginSettings {
            disabled: self
                .settings
                .get(id, DISABLED_KEY)
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
            trigger_keywords: self
                .settings
                .get(id, TRIGGER_KEYWORDS_KEY)
                .map(|v| split_keywords(&v)),
            values,
        }
    }

    /// Keep instance values in sync when a plugin saves a declared setting itself
    fn watch_settings(&self, instance: &Arc<PluginInstance>) {
        for key in instance
            .metadata
            .setting_definitions
            .iter()
            .filter_map(|d| d.key.clone())
        {
            let weak: Weak<PluginInstance> = Arc::downgrade(instance);
            let watched = key.clone();
            self.settings.on_change(
                instance.id(),
                &key,
                Arc::new(move |value| {
                    if let Some(instance) = weak.upgrade() {
                        instance
                            .settings
                            .write()
                            .values
                            .insert(watched.clone(), value.to_string());
                    }
                }),
            );
        }
    }

    /// Remove a plugin entirely, dropping its cached actions.
    ///
    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` if the id is unknown.
    pub fn unregister(&self, id: &str) -> Result<Arc<PluginInstance>> {
        let removed = {
            let mut entries = self.entries.write();
            let removed = entries.by_id.remove(id);
            if removed.is_some() {
                entries.order.retain(|existing| existing != id);
            }
            removed
        };

        let instance = removed.ok_or_else(|| Error::PluginNotFound(id.to_string()))?;
        self.cache.purge_plugin(id);
        info!("[{}] Unregistered plugin", id);
        Ok(instance)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<PluginInstance>> {
        self.entries.read().by_id.get(id).cloned()
    }

    /// Every instance in registration order
    #[must_use]
    pub fn all(&self) -> Vec<Arc<PluginInstance>> {
        let entries = self.entries.read();
        entries
            .order
            .iter()
            .filter_map(|id| entries.by_id.get(id).cloned())
            .collect()
    }

    #[must_use]
    pub fn enabled(&self) -> Vec<Arc<PluginInstance>> {
        self.all().into_iter().filter(|i| i.is_enabled()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enable or disable a plugin. Disabling drops its cached actions.
    ///
    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` if the id is unknown, or a store error.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let instance = self
            .get(id)
            .ok_or_else(|| Error::PluginNotFound(id.to_string()))?;

        instance.settings.write().disabled = !enabled;
        self.settings
            .set(id, DISABLED_KEY, if enabled { "false" } else { "true" }, false)?;

        if !enabled {
            self.cache.purge_plugin(id);
        }
        info!(
            "[{}] Plugin {}",
            id,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Change one setting and tell the plugin about it.
    ///
    /// `Disabled` and `TriggerKeywords` are handled by the registry itself.
    /// Other keys are stored and forwarded to the plugin's setting-changed
    /// hook: awaited for native plugins, sent in the background for
    /// host-backed ones.
    ///
    /// # Errors
    ///
    /// Returns `Error::PluginNotFound` if the id is unknown, or a store error.
    pub async fn update_setting(&self, id: &str, key: &str, value: &str) -> Result<()> {
        let instance = self
            .get(id)
            .ok_or_else(|| Error::PluginNotFound(id.to_string()))?;

        match key {
            DISABLED_KEY => {
                return self.set_enabled(id, !value.eq_ignore_ascii_case("true"));
            }
            TRIGGER_KEYWORDS_KEY => {
                let keywords = split_keywords(value);
                debug!("[{}] Trigger keywords set to {:?}", id, keywords);
                instance.settings.write().trigger_keywords = Some(keywords);
                self.settings.set(id, key, value, false)?;
                return Ok(());
            }
            _ => {}
        }

        let platform_specific = instance
            .metadata
            .setting_definition(key)
            .is_some_and(|d| d.is_platform_specific);
        instance
            .settings
            .write()
            .values
            .insert(key.to_string(), value.to_string());
        self.settings.set(id, key, value, platform_specific)?;

        let handle = instance.handle();
        if instance.is_host_backed() {
            let (id, key, value) = (id.to_string(), key.to_string(), value.to_string());
            tokio::spawn(async move {
                if let Err(e) = handle.on_setting_changed(&key, &value).await {
                    warn!("[{}] Setting-changed callback for '{}' failed: {}", id, key, e);
                }
            });
        } else if let Err(e) = handle.on_setting_changed(key, value).await {
            warn!("[{}] Setting-changed callback for '{}' failed: {}", id, key, e);
        }
        Ok(())
    }

    /// Split raw input into trigger keyword, command and search text.
    ///
    /// The first term is a trigger keyword only when an enabled plugin
    /// declares it and more text follows. The next term becomes the command
    /// when a matching plugin declares it and is itself followed by text.
    #[must_use]
    pub fn parse_query(&self, raw: &str, selection: Option<Selection>) -> Query {
        if let Some(selection) = selection {
            return Query {
                query_type: QueryType::Selection,
                raw_query: String::new(),
                selection: Some(selection),
                ..Default::default()
            };
        }

        let Some((first, rest)) = raw.split_once(' ') else {
            return Query::plain(raw);
        };

        let matching: Vec<Arc<PluginInstance>> = self
            .enabled()
            .into_iter()
            .filter(|i| i.matches_keyword(first))
            .collect();
        if first.is_empty() || matching.is_empty() {
            return Query::plain(raw);
        }

        let (command, search) = match rest.split_once(' ') {
            Some((candidate, tail))
                if matching.iter().any(|i| i.metadata.has_command(candidate)) =>
            {
                (candidate.to_string(), tail.to_string())
            }
            _ => (String::new(), rest.to_string()),
        };

        Query {
            query_type: QueryType::Input,
            raw_query: raw.to_string(),
            trigger_keyword: first.to_string(),
            command,
            search,
            selection: None,
        }
    }

    /// Enabled instances that should receive `query`.
    ///
    /// Keyword matches come first in registration order, followed by the
    /// global plugins in registration order. Selection queries go only to
    /// plugins declaring the selection feature.
    #[must_use]
    pub fn match_for_query(&self, query: &Query) -> Vec<Arc<PluginInstance>> {
        let enabled = self.enabled();

        if query.query_type == QueryType::Selection {
            return enabled
                .into_iter()
                .filter(|i| i.accepts_selection())
                .collect();
        }

        let (mut matched, rest): (Vec<_>, Vec<_>) = enabled.into_iter().partition(|i| {
            query.has_trigger_keyword() && i.matches_keyword(&query.trigger_keyword)
        });
        matched.extend(rest.into_iter().filter(|i| i.is_global()));
        matched
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.entries.read().order)
            .finish_non_exhaustive()
    }
}
