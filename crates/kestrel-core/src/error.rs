use kestrel_rpc::RpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error: {0}")]
    Rpc(#[from] kestrel_rpc::Error),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Host startup failed for {runtime}: {reason}")]
    HostStartup { runtime: String, reason: String },

    #[error("Host unavailable: {0}")]
    HostUnavailable(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Result not found: {0}")]
    ResultNotFound(String),

    #[error("Action {action_id} not found on result {result_id}")]
    ActionNotFound { result_id: String, action_id: String },

    #[error("Query timed out after {0:?}")]
    QueryTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        match err {
            Error::PluginNotFound(id) => RpcError::plugin_not_found(id),
            Error::HostUnavailable(runtime) => RpcError::host_unavailable(runtime),
            Error::Json(e) => RpcError::invalid_params(e.to_string()),
            Error::Rpc(e) => e.into(),
            Error::Plugin(msg) | Error::ActionFailed(msg) => RpcError::plugin_error(msg),
            other => RpcError::internal_error(other.to_string()),
        }
    }
}
