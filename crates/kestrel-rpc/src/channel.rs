//! Duplex JSON-RPC channel.
//!
//! Either side of an [`RpcChannel`] may initiate calls. Outbound messages go
//! through a single writer task so ordering per direction is preserved.
//! Incoming requests are handled on their own tasks so a slow handler never
//! stalls the read loop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::transport::{CodecError, Frame, JsonRpcCodec};

/// Handler for an incoming call
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>) -> std::result::Result<Value, RpcError>;
}

/// Adapter turning an async closure into an [`RpcHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RpcHandler for FnHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, RpcError>> + Send,
{
    async fn handle(&self, params: Option<Value>) -> std::result::Result<Value, RpcError> {
        (self.0)(params).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn RpcHandler>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Deserialize call params, mapping failures to `INVALID_PARAMS`.
///
/// # Errors
///
/// Returns an `INVALID_PARAMS` error if params are missing or have the wrong shape.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> std::result::Result<T, RpcError> {
    let value = params.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| RpcError::invalid_params(e.to_string()))
}

/// Method name to handler table, shared with the channel's reader task.
///
/// Handlers may be added after the channel has been spawned.
#[derive(Clone, Default)]
pub struct HandlerMap {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn RpcHandler>>>>,
}

impl HandlerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous handler.
    pub fn on_call(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) -> &Self {
        self.handlers.write().insert(method.into(), handler);
        self
    }

    #[must_use]
    pub fn get(&self, method: &str) -> Option<Arc<dyn RpcHandler>> {
        self.handlers.read().get(method).cloned()
    }

    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.handlers.read().contains_key(method)
    }
}

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<String> = self.handlers.read().keys().cloned().collect();
        methods.sort();
        f.debug_struct("HandlerMap").field("methods", &methods).finish()
    }
}

type PendingCall = oneshot::Sender<Result<Value>>;

struct Inner {
    name: String,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<RequestId, PendingCall>>,
    next_id: AtomicU64,
    handlers: HandlerMap,
    shutdown: CancellationToken,
    /// Set when the inbound stream broke its framing
    fault: Mutex<Option<String>>,
}

impl Inner {
    fn shut_down(&self) {
        self.shutdown.cancel();
        let drained: Vec<PendingCall> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        if !drained.is_empty() {
            debug!(
                "[{}] Failing {} pending call(s): channel closed",
                self.name,
                drained.len()
            );
        }
        for tx in drained {
            let _ = tx.send(Err(Error::ChannelClosed));
        }
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => self.resolve(response),
            Message::Request(Request {
                method,
                params,
                id: Some(id),
                ..
            }) => self.handle_request(method, params, id),
            Message::Request(Request {
                method,
                params,
                id: None,
                ..
            })
            | Message::Notification(Notification { method, params, .. }) => {
                self.handle_notification(method, params);
            }
        }
    }

    fn resolve(&self, response: Response) {
        let slot = self.pending.lock().remove(&response.id);
        match slot {
            Some(tx) => {
                let _ = tx.send(response.into_result().map_err(Error::from));
            }
            None => trace!(
                "[{}] Dropping response for unknown or expired id {}",
                self.name, response.id
            ),
        }
    }

    fn handle_request(self: &Arc<Self>, method: String, params: Option<Value>, id: RequestId) {
        let Some(handler) = self.handlers.get(&method) else {
            debug!("[{}] No handler for '{}'", self.name, method);
            let _ = self.outbound.send(Message::Response(Response::error(
                id,
                RpcError::method_not_found(),
            )));
            return;
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::spawn(async move { handler.handle(params).await }).await;
            let response = match outcome {
                Ok(Ok(value)) => Response::success(id, value),
                Ok(Err(error)) => Response::error(id, error),
                Err(e) => {
                    warn!("[{}] Handler for '{}' panicked: {}", inner.name, method, e);
                    Response::error(id, RpcError::internal_error("handler panicked"))
                }
            };
            if inner.outbound.send(Message::Response(response)).is_err() {
                trace!("[{}] Response to '{}' dropped: channel closed", inner.name, method);
            }
        });
    }

    fn handle_notification(&self, method: String, params: Option<Value>) {
        let Some(handler) = self.handlers.get(&method) else {
            debug!("[{}] Ignoring notification '{}'", self.name, method);
            return;
        };

        let name = self.name.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(params).await {
                debug!("[{}] Notification '{}' failed: {}", name, method, e);
            }
        });
    }
}

/// Removes the pending slot if the caller stops waiting.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.id);
    }
}

/// One end of a duplex JSON-RPC connection.
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<Inner>,
}

impl RpcChannel {
    /// Start the reader and writer tasks over the given byte streams.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(name: impl Into<String>, reader: R, writer: W, handlers: HandlerMap) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            name: name.into(),
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handlers,
            shutdown: CancellationToken::new(),
            fault: Mutex::new(None),
        });

        tokio::spawn(read_loop(
            Arc::clone(&inner),
            FramedRead::new(reader, JsonRpcCodec::new()),
        ));
        tokio::spawn(write_loop(
            Arc::clone(&inner),
            FramedWrite::new(writer, JsonRpcCodec::new()),
            outbound_rx,
        ));

        debug!("[{}] RPC channel started", inner.name);
        Self { inner }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn handlers(&self) -> &HandlerMap {
        &self.inner.handlers
    }

    /// Register a handler for incoming calls of `method`.
    pub fn on_call(&self, method: impl Into<String>, handler: Arc<dyn RpcHandler>) {
        self.inner.handlers.on_call(method, handler);
    }

    /// Send a request and wait for its response.
    ///
    /// A response that arrives after `timeout` is dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` if no response arrives in time, `Error::ChannelClosed`
    /// if the channel dies first, or `Error::Rpc` if the peer answers with an error.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(id.clone(), tx);
        let _guard = PendingGuard {
            inner: &self.inner,
            id: id.clone(),
        };

        // The reader may have drained the table between the check above and the insert.
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }

        let request = Request::new(method, params, id);
        if self.inner.outbound.send(Message::Request(request)).is_err() {
            return Err(Error::ChannelClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                debug!(
                    "[{}] '{}' timed out after {:?}",
                    self.inner.name, method, timeout
                );
                Err(Error::Timeout)
            }
        }
    }

    /// Typed wrapper around [`RpcChannel::call`].
    ///
    /// # Errors
    ///
    /// Same as [`RpcChannel::call`], plus `Error::Json` if params or result don't (de)serialize.
    pub async fn request<P, T>(&self, method: &str, params: &P, timeout: Duration) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let params = if params.is_null() { None } else { Some(params) };
        let result = self.call(method, params, timeout).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChannelClosed` if the channel is no longer running.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        self.inner
            .outbound
            .send(Message::Notification(Notification::new(method, params)))
            .map_err(|_| Error::ChannelClosed)
    }

    /// Stop both tasks and fail every pending call with `ChannelClosed`.
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            debug!("[{}] Closing RPC channel", self.inner.name);
        }
        self.inner.shut_down();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once the channel has stopped for any reason.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Why the channel died, if the peer broke the framing. `None` for a
    /// clean close, EOF or an I/O failure.
    #[must_use]
    pub fn protocol_fault(&self) -> Option<String> {
        self.inner.fault.lock().clone()
    }

    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn read_loop<R>(inner: Arc<Inner>, mut stream: FramedRead<R, JsonRpcCodec>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    loop {
        let next = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Frame::Message(message))) => inner.dispatch(message),
            Some(Ok(Frame::Malformed { reason, len })) => {
                warn!(
                    "[{}] Dropping malformed frame ({} bytes): {}",
                    inner.name, len, reason
                );
            }
            Some(Err(CodecError::Io(e))) => {
                warn!("[{}] Read failed: {}", inner.name, e);
                break;
            }
            Some(Err(e)) => {
                warn!("[{}] Protocol violation, closing: {}", inner.name, e);
                *inner.fault.lock() = Some(e.to_string());
                break;
            }
            None => {
                debug!("[{}] Peer closed the connection", inner.name);
                break;
            }
        }
    }
    inner.shut_down();
}

async fn write_loop<W>(
    inner: Arc<Inner>,
    mut sink: FramedWrite<W, JsonRpcCodec>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let message = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            message = outbound.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        if let Err(e) = sink.send(message).await {
            warn!("[{}] Write failed: {}", inner.name, e);
            break;
        }
    }
    inner.shut_down();
}
