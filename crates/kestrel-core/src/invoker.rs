//! Runs a surfaced result's action on its owning plugin.

use std::sync::Arc;

use kestrel_types::ActionContext;
use tracing::{debug, error, info};

use crate::cache::ResultCache;
use crate::config::ActionConfig;
use crate::registry::PluginRegistry;
use crate::services::UiSink;
use crate::{Error, Result};

/// What happened after a successful action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub plugin_id: String,
    pub action_id: String,
    /// Whether the UI was asked to hide
    pub hide_app: bool,
}

pub struct ActionInvoker {
    registry: Arc<PluginRegistry>,
    cache: Arc<ResultCache>,
    ui: Arc<dyn UiSink>,
    config: ActionConfig,
}

impl ActionInvoker {
    pub fn new(
        registry: Arc<PluginRegistry>,
        cache: Arc<ResultCache>,
        ui: Arc<dyn UiSink>,
        config: ActionConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            ui,
            config,
        }
    }

    /// Invoke `action_id` (or the default action) of a result currently shown
    /// in `session`.
    ///
    /// A failing action is logged and reported to the user as a notification
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns `ResultNotFound`/`ActionNotFound`/`PluginNotFound` when the
    /// reference cannot be resolved, or `ActionFailed` if the plugin errors,
    /// panics or exceeds the action timeout.
    pub async fn invoke(
        &self,
        session: &str,
        result_id: &str,
        action_id: Option<&str>,
    ) -> Result<ActionOutcome> {
        let cached = self
            .cache
            .lookup(session, result_id)
            .ok_or_else(|| Error::ResultNotFound(result_id.to_string()))?;

        let action = cached
            .resolve_action(action_id)
            .cloned()
            .ok_or_else(|| Error::ActionNotFound {
                result_id: result_id.to_string(),
                action_id: action_id.unwrap_or("<default>").to_string(),
            })?;

        let instance = self
            .registry
            .get(&cached.plugin_id)
            .ok_or_else(|| Error::PluginNotFound(cached.plugin_id.clone()))?;

        debug!(
            "[{}] Invoking action '{}' on result {}",
            cached.plugin_id, action.id, result_id
        );

        let handle = instance.handle();
        let ctx = ActionContext {
            result_id: cached.source_id.clone(),
            action_id: action.id.clone(),
            context_data: cached.context_data.clone(),
        };
        let timeout = self.config.action_timeout();
        let call = tokio::spawn(async move { handle.action(ctx).await });

        let failure = match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(join_error)) => Some(format!("action panicked: {join_error}")),
            Err(_) => Some(format!("timed out after {timeout:?}")),
        };

        if let Some(reason) = failure {
            error!(
                "[{}] Action '{}' failed: {}",
                cached.plugin_id, action.id, reason
            );
            self.ui.notify(
                "Action failed",
                &format!("{} ({}): {}", action.name, cached.plugin_id, reason),
            );
            return Err(Error::ActionFailed(reason));
        }

        let hide_app = !action.prevent_hide_after_action;
        if hide_app {
            self.ui.hide_app();
        }
        info!("[{}] Action '{}' completed", cached.plugin_id, action.id);

        Ok(ActionOutcome {
            plugin_id: cached.plugin_id,
            action_id: action.id,
            hide_app,
        })
    }
}

impl std::fmt::Debug for ActionInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionInvoker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
