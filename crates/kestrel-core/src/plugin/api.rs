//! Core API available to plugins.
//!
//! Native plugins receive a [`PluginApi`] in their init context. Host
//! processes reach the same API through the host callback handlers.

use std::sync::Arc;

use kestrel_types::{LogLevel, PluginMetadata, Query, ResultPatch, UiUpdate};
use tracing::{debug, error, info, trace, warn};

use crate::Result;
use crate::cache::ResultCache;
use crate::services::{SettingCallback, SettingsStore, UiSink};

/// Shared collaborators every plugin API handle points at
#[derive(Clone)]
pub struct CoreServices {
    pub settings: Arc<dyn SettingsStore>,
    pub ui: Arc<dyn UiSink>,
    pub cache: Arc<ResultCache>,
}

impl CoreServices {
    pub fn new(
        settings: Arc<dyn SettingsStore>,
        ui: Arc<dyn UiSink>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            settings,
            ui,
            cache,
        }
    }
}

/// Per-plugin view of the core services
#[derive(Clone)]
pub struct PluginApi {
    metadata: Arc<PluginMetadata>,
    services: CoreServices,
}

impl PluginApi {
    #[must_use]
    pub fn new(metadata: Arc<PluginMetadata>, services: CoreServices) -> Self {
        Self { metadata, services }
    }

    #[must_use]
    pub fn plugin_id(&self) -> &str {
        &self.metadata.id
    }

    /// Re-emit a plugin log line as a tracing event.
    pub fn log(&self, level: LogLevel, message: &str) {
        let plugin = self.plugin_id();
        match level {
            LogLevel::Debug => debug!(plugin, "{}", message),
            LogLevel::Info => info!(plugin, "{}", message),
            LogLevel::Warning => warn!(plugin, "{}", message),
            LogLevel::Error => error!(plugin, "{}", message),
        }
    }

    /// Stored value, else the default declared in the plugin's settings schema
    #[must_use]
    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.services
            .settings
            .get(self.plugin_id(), key)
            .or_else(|| {
                self.metadata
                    .setting_definition(key)
                    .and_then(|d| d.default_value.clone())
            })
    }

    /// # Errors
    ///
    /// Returns an error if the settings store rejects the value.
    pub fn save_setting(&self, key: &str, value: &str, is_platform_specific: bool) -> Result<()> {
        trace!("[{}] Saving setting '{}'", self.plugin_id(), key);
        self.services
            .settings
            .set(self.plugin_id(), key, value, is_platform_specific)
    }

    pub fn on_setting_change(&self, key: &str, callback: SettingCallback) {
        self.services
            .settings
            .on_change(self.plugin_id(), key, callback);
    }

    pub fn change_query(&self, query: Query) {
        self.services.ui.change_query(query);
    }

    pub fn show_app(&self) {
        self.services.ui.show_app();
    }

    pub fn hide_app(&self) {
        self.services.ui.hide_app();
    }

    pub fn toggle_app(&self) {
        self.services.ui.toggle_app();
    }

    pub fn notify(&self, title: &str, description: &str) {
        self.services.ui.notify(title, description);
    }

    /// Update a result currently on screen. Returns false if the id is unknown
    /// or belongs to another plugin.
    ///
    /// `patch.id` is the id the plugin issued. The UI receives the patch under
    /// the id it shows, which differs when ranking reassigned a duplicate.
    pub fn update_result(&self, patch: ResultPatch) -> bool {
        let shown = self.services.cache.apply_patch(self.plugin_id(), &patch);
        if shown.is_empty() {
            debug!(
                "[{}] Ignoring update for unknown result {}",
                self.plugin_id(),
                patch.id
            );
            return false;
        }
        for id in shown {
            self.services.ui.update_result(ResultPatch {
                id,
                ..patch.clone()
            });
        }
        true
    }

    pub fn chat_stream(&self, data: serde_json::Value) {
        self.services.ui.send(UiUpdate::ChatResponse {
            plugin_id: self.plugin_id().to_string(),
            data,
        });
    }
}

impl std::fmt::Debug for PluginApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginApi")
            .field("plugin_id", &self.plugin_id())
            .finish_non_exhaustive()
    }
}
