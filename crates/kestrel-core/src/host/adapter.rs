use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kestrel_rpc::methods::{self, ActionParams, QueryParams, SettingChangedParams};
use kestrel_types::{ActionContext, PluginMetadata, Query, QueryResult};
use serde_json::Value;
use tracing::{debug, warn};

use super::{HostProcess, HostedPlugin};
use crate::plugin::{InitContext, Plugin};
use crate::{Error, Result};

/// A plugin living inside a host process.
///
/// While the host is not ready, queries answer with no results and actions
/// fail with `HostUnavailable`.
pub struct HostPlugin {
    metadata: Arc<PluginMetadata>,
    directory: PathBuf,
    host: Arc<HostProcess>,
    /// Upper bound for a single host call; queries are cut shorter by the
    /// dispatcher's own timeout.
    call_timeout: Duration,
}

impl HostPlugin {
    #[must_use]
    pub fn new(
        metadata: PluginMetadata,
        directory: PathBuf,
        host: Arc<HostProcess>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            metadata: Arc::new(metadata),
            directory,
            host,
            call_timeout,
        }
    }

    #[must_use]
    pub fn host(&self) -> &Arc<HostProcess> {
        &self.host
    }

    async fn query_hook(&self, method: &str, query: &Query) -> Result<Vec<QueryResult>> {
        let Some(channel) = self.host.ready_channel() else {
            debug!(
                "[{}] Host {} is {}, no results",
                self.metadata.id,
                self.host.runtime(),
                self.host.state()
            );
            return Ok(Vec::new());
        };

        let params = QueryParams {
            plugin_id: self.metadata.id.clone(),
            query: query.clone(),
        };
        match channel
            .request::<_, Option<Vec<QueryResult>>>(method, &params, self.call_timeout)
            .await
        {
            Ok(results) => Ok(results.unwrap_or_default()),
            Err(kestrel_rpc::Error::ChannelClosed) => {
                warn!(
                    "[{}] Host {} went away during {}, no results",
                    self.metadata.id,
                    self.host.runtime(),
                    method
                );
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Plugin for HostPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    /// Attach to the host, starting it on first use
    async fn init(&self, _ctx: InitContext) -> Result<()> {
        self.host
            .attach(HostedPlugin {
                metadata: Arc::clone(&self.metadata),
                directory: self.directory.clone(),
            })
            .await?;
        self.host.ensure_started();
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<QueryResult>> {
        self.query_hook(methods::QUERY, query).await
    }

    async fn query_fallback(&self, query: &Query) -> Result<Vec<QueryResult>> {
        self.query_hook(methods::QUERY_FALLBACK, query).await
    }

    async fn action(&self, ctx: ActionContext) -> Result<()> {
        let channel = self
            .host
            .ready_channel()
            .ok_or_else(|| Error::HostUnavailable(self.host.runtime().to_string()))?;

        let params = ActionParams {
            plugin_id: self.metadata.id.clone(),
            result_id: ctx.result_id,
            action_id: ctx.action_id,
            context_data: ctx.context_data,
        };
        match channel
            .request::<_, Value>(methods::ACTION, &params, self.call_timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(kestrel_rpc::Error::ChannelClosed) => {
                Err(Error::HostUnavailable(self.host.runtime().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_setting_changed(&self, key: &str, value: &str) -> Result<()> {
        // A restarted host reads settings afresh through get_setting
        let Some(channel) = self.host.ready_channel() else {
            return Ok(());
        };
        let params = SettingChangedParams {
            plugin_id: self.metadata.id.clone(),
            key: key.to_string(),
            value: value.to_string(),
        };
        let _: Value = channel
            .request(methods::SETTING_CHANGED, &params, self.call_timeout)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for HostPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPlugin")
            .field("id", &self.metadata.id)
            .field("runtime", &self.host.runtime())
            .finish_non_exhaustive()
    }
}
