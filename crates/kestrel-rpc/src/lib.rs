//! JSON-RPC 2.0 channel between the kestrel core and plugin host processes.
//!
//! - [`protocol`]: JSON-RPC 2.0 envelopes (Request, Response, Notification)
//! - [`transport`]: Length-prefixed codec for message framing
//! - [`channel`]: Duplex channel where either side may initiate calls
//! - [`methods`]: Method names and param structs used by core and hosts
//! - [`error`]: Error type and result alias
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use kestrel_rpc::{HandlerMap, RpcChannel};
//!
//! # async fn example() -> kestrel_rpc::Result<()> {
//! let (core_end, _host_end) = tokio::io::duplex(64 * 1024);
//! let (reader, writer) = tokio::io::split(core_end);
//! let channel = RpcChannel::spawn("python", reader, writer, HandlerMap::new());
//!
//! let pong = channel.call("ping", None, Duration::from_secs(2)).await?;
//! println!("host answered: {pong}");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod methods;
pub mod protocol;
pub mod transport;

pub use channel::{FnHandler, HandlerMap, RpcChannel, RpcHandler, handler_fn, parse_params};

pub use error::{Error, Result};

pub use protocol::{
    HOST_UNAVAILABLE, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, Message, Notification, PARSE_ERROR, PLUGIN_ERROR, PLUGIN_NOT_FOUND, Request,
    RequestId, Response, RpcError,
};

pub use transport::{CodecError, Frame, JsonRpcCodec, MAX_MESSAGE_SIZE};
