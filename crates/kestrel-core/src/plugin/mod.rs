//! The plugin contract shared by in-process and host-backed plugins.
//!
//! Callers only ever see `Arc<dyn Plugin>`. Native plugins implement the
//! trait directly; [`crate::host::HostPlugin`] implements it by forwarding
//! each call over the host's RPC channel.

mod api;
mod discovery;

pub use api::{CoreServices, PluginApi};
pub use discovery::{DiscoveredPlugin, MANIFEST_FILENAME, discover_plugins};

use std::path::PathBuf;

use async_trait::async_trait;
use kestrel_types::{ActionContext, PluginMetadata, Query, QueryResult};

use crate::Result;

/// Handed to [`Plugin::init`]
#[derive(Clone)]
pub struct InitContext {
    /// Directory the plugin was loaded from, if any
    pub directory: Option<PathBuf>,
    pub api: PluginApi,
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    async fn init(&self, ctx: InitContext) -> Result<()>;

    async fn query(&self, query: &Query) -> Result<Vec<QueryResult>>;

    /// Results offered only when no plugin matched the query
    async fn query_fallback(&self, _query: &Query) -> Result<Vec<QueryResult>> {
        Ok(Vec::new())
    }

    /// Run the action `ctx.action_id` of a result this plugin returned
    async fn action(&self, ctx: ActionContext) -> Result<()>;

    async fn on_setting_changed(&self, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }
}
