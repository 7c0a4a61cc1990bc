//! Error types for the kestrel-rpc crate.

use crate::protocol::RpcError;
use crate::transport::CodecError;

/// Unified error type for RPC operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i32, message: String },

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unexpected response")]
    UnexpectedResponse,
}

impl Error {
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Remote error code, if the peer answered with an error object
    #[must_use]
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        match e {
            Error::Rpc { code, message } => RpcError::new(code, message),
            Error::Json(e) => RpcError::invalid_params(e.to_string()),
            other => RpcError::internal_error(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{INTERNAL_ERROR, INVALID_PARAMS};

    #[test]
    fn test_error_rpc_factory() {
        let err = Error::rpc(-32600, "Invalid Request");
        assert_eq!(err.rpc_code(), Some(-32600));
        assert!(err.to_string().contains("Invalid Request"));
    }

    #[test]
    fn test_error_from_rpc_error() {
        let err: Error = RpcError::method_not_found().into();
        match err {
            Error::Rpc { code, message } => {
                assert_eq!(code, -32601);
                assert!(message.contains("not found"));
            }
            _ => panic!("Expected Rpc error"),
        }
    }

    #[test]
    fn test_error_from_codec_error() {
        let err: Error = CodecError::MessageTooLarge(999_999_999).into();
        assert!(matches!(err, Error::Codec(_)));
        assert!(err.to_string().contains("999999999"));
    }

    #[test]
    fn test_error_into_rpc_error() {
        let rpc: RpcError = Error::rpc(-32002, "Plugin not found: shop").into();
        assert_eq!(rpc.code, -32002);

        let json_err = serde_json::from_str::<serde_json::Value>("}{").unwrap_err();
        let rpc: RpcError = Error::Json(json_err).into();
        assert_eq!(rpc.code, INVALID_PARAMS);

        let rpc: RpcError = Error::Timeout.into();
        assert_eq!(rpc.code, INTERNAL_ERROR);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(Error::ChannelClosed.to_string(), "Channel closed");
        assert_eq!(Error::Timeout.to_string(), "Request timeout");
        assert_eq!(Error::UnexpectedResponse.to_string(), "Unexpected response");
        assert!(Error::Timeout.rpc_code().is_none());
    }
}
