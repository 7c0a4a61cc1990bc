//! Collaborator interfaces consumed by the core: settings storage and the UI.

use std::collections::HashMap;
use std::sync::Arc;

use kestrel_types::{Query, RankedResult, ResultPatch, UiUpdate};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::trace;

use crate::Result;

/// Called with the new value whenever a watched setting changes
pub type SettingCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-plugin key/value settings storage.
///
/// The persistence format belongs to the implementor.
pub trait SettingsStore: Send + Sync {
    fn get(&self, plugin_id: &str, key: &str) -> Option<String>;

    /// Store a value and notify watchers of `(plugin_id, key)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot persist the value.
    fn set(&self, plugin_id: &str, key: &str, value: &str, is_platform_specific: bool)
    -> Result<()>;

    fn on_change(&self, plugin_id: &str, key: &str, callback: SettingCallback);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredValue {
    value: String,
    platform_specific: bool,
}

type SettingKey = (String, String);

/// In-memory [`SettingsStore`]
#[derive(Default)]
pub struct MemorySettingsStore {
    values: RwLock<HashMap<SettingKey, StoredValue>>,
    watchers: Mutex<HashMap<SettingKey, Vec<SettingCallback>>>,
}

impl MemorySettingsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the stored value was saved as platform specific
    #[must_use]
    pub fn is_platform_specific(&self, plugin_id: &str, key: &str) -> Option<bool> {
        self.values
            .read()
            .get(&(plugin_id.to_string(), key.to_string()))
            .map(|v| v.platform_specific)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, plugin_id: &str, key: &str) -> Option<String> {
        self.values
            .read()
            .get(&(plugin_id.to_string(), key.to_string()))
            .map(|v| v.value.clone())
    }

    fn set(
        &self,
        plugin_id: &str,
        key: &str,
        value: &str,
        is_platform_specific: bool,
    ) -> Result<()> {
        let setting_key = (plugin_id.to_string(), key.to_string());
        self.values.write().insert(
            setting_key.clone(),
            StoredValue {
                value: value.to_string(),
                platform_specific: is_platform_specific,
            },
        );

        // Clone out so callbacks can touch the store without deadlocking
        let callbacks = self
            .watchers
            .lock()
            .get(&setting_key)
            .cloned()
            .unwrap_or_default();
        trace!(
            "[{}] Setting '{}' changed, {} watcher(s)",
            plugin_id,
            key,
            callbacks.len()
        );
        for callback in callbacks {
            callback(value);
        }
        Ok(())
    }

    fn on_change(&self, plugin_id: &str, key: &str, callback: SettingCallback) {
        self.watchers
            .lock()
            .entry((plugin_id.to_string(), key.to_string()))
            .or_default()
            .push(callback);
    }
}

/// Receiver of UI-facing updates.
///
/// Implementors only provide [`UiSink::send`]; the rest are conveniences.
pub trait UiSink: Send + Sync {
    fn send(&self, update: UiUpdate);

    fn show_results(&self, session: &str, generation: u64, results: Vec<RankedResult>) {
        self.send(UiUpdate::Results {
            session: session.to_string(),
            generation,
            results,
        });
    }

    fn update_result(&self, patch: ResultPatch) {
        self.send(UiUpdate::ResultUpdated { patch });
    }

    fn change_query(&self, query: Query) {
        self.send(UiUpdate::ChangeQuery { query });
    }

    fn show_app(&self) {
        self.send(UiUpdate::ShowApp);
    }

    fn hide_app(&self) {
        self.send(UiUpdate::HideApp);
    }

    fn toggle_app(&self) {
        self.send(UiUpdate::ToggleApp);
    }

    fn notify(&self, title: &str, description: &str) {
        self.send(UiUpdate::Notify {
            title: title.to_string(),
            description: description.to_string(),
        });
    }
}

impl UiSink for mpsc::UnboundedSender<UiUpdate> {
    fn send(&self, update: UiUpdate) {
        if mpsc::UnboundedSender::send(self, update).is_err() {
            trace!("UI receiver dropped, discarding update");
        }
    }
}
