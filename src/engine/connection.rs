// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! One persistent duplex channel between two peers.
//!
//! A connection owns three tasks:
//! * the receive loop, the only reader of the channel, feeding the dispatcher
//! * the writer, the only writer of the channel, fed by an unbounded queue
//! * the sweeper, which expires outbound requests past their deadline
//!
//! Both peers are symmetric: each side can `invoke` the other while serving
//! the other's requests over the same channel.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use crate::engine::capability::CapabilityContext;
use crate::engine::dispatcher::Dispatcher;
use crate::engine::operation_table::OperationTable;
use crate::engine::registry::{CorrelationRegistry, InvokeResult, PendingHandle};
use crate::errors::{InvokeError, OperationError};
use crate::observability::messages::connection::{
    ConnectionClosed, ConnectionOpened, FrameTooLarge, TransportFailed,
};
use crate::observability::messages::dispatch::RequestCancelled;
use crate::observability::messages::StructuredLog;
use crate::protocol::{
    decode, encode, frame_codec, CancelEnvelope, Envelope, RequestEnvelope, ResponseEnvelope,
    MAX_FRAME_LENGTH,
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Tunables for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Deadline applied by `invoke_default`.
    pub default_timeout: Duration,
    /// How often the sweeper looks for expired outbound requests.
    pub sweep_interval: Duration,
    /// Upper bound on how long an inbound handler may run.
    pub handler_timeout: Duration,
    /// Close the connection on the first undecodable frame.
    pub strict: bool,
    /// Free-form peer description used in logs.
    pub peer: String,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(crate::config::consts::DEFAULT_TIMEOUT_MS),
            sweep_interval: Duration::from_millis(crate::config::consts::DEFAULT_SWEEP_INTERVAL_MS),
            handler_timeout: Duration::from_millis(
                crate::config::consts::DEFAULT_HANDLER_TIMEOUT_MS,
            ),
            strict: false,
            peer: "peer".to_string(),
        }
    }
}

/// State shared between the connection handle and its tasks.
struct Shared {
    connection_id: u64,
    registry: Arc<CorrelationRegistry>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the connection closed, reject everything pending and stop the
    /// tasks. Only the first call has any effect.
    fn teardown(&self, reason: InvokeError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rejected = self.registry.fail_all(|| reason.clone());
        self.shutdown.cancel();
        ConnectionClosed {
            connection_id: self.connection_id,
            reason: &reason.to_string(),
            rejected_requests: rejected,
        }
        .log();
    }
}

pub struct Connection {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Envelope>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    options: ConnectionOptions,
}

impl Connection {
    /// Start serving `io` and return a handle for issuing requests over it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<T>(
        io: T,
        table: Arc<OperationTable>,
        capabilities: CapabilityContext,
        options: ConnectionOptions,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        ConnectionOpened {
            connection_id,
            peer: &options.peer,
            capabilities: &capabilities.to_string(),
        }
        .log();

        let shared = Arc::new(Shared {
            connection_id,
            registry: Arc::new(CorrelationRegistry::new()),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });

        let (reader, writer) = tokio::io::split(io);
        let frames_in = FramedRead::new(reader, frame_codec());
        let frames_out = FramedWrite::new(writer, frame_codec());
        let (outbound, queue) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher::new(
            table,
            capabilities,
            shared.registry.clone(),
            outbound.clone(),
            shared.shutdown.clone(),
            options.handler_timeout,
        );

        let tasks = vec![
            tokio::spawn(receive_loop(frames_in, dispatcher, shared.clone(), options.strict)),
            tokio::spawn(write_loop(frames_out, queue, shared.clone())),
            tokio::spawn(sweep_loop(shared.clone(), options.sweep_interval)),
        ];

        Self {
            shared,
            outbound,
            tasks: Mutex::new(tasks),
            options,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.connection_id
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Ask the peer to perform `operation`.
    ///
    /// The request is registered and queued before this returns; the
    /// returned `Invocation` resolves with the peer's answer or with a local
    /// failure (timeout, transport error, connection closed).
    pub fn invoke(&self, operation: impl Into<String>, payload: Value, timeout: Duration) -> Invocation {
        let id = uuid::Uuid::new_v4().to_string();
        if self.shared.is_closed() {
            return Invocation::failed(id, InvokeError::ConnectionClosed);
        }

        let handle = match self.shared.registry.register(&id, timeout) {
            Ok(handle) => handle,
            Err(error) => return Invocation::failed(id, InvokeError::Transport(error.to_string())),
        };

        // Teardown may have run between the check above and the register;
        // its fail_all would then have missed this entry.
        if self.shared.is_closed() {
            self.shared.registry.cancel(&id);
            return Invocation::failed(id, InvokeError::ConnectionClosed);
        }

        let request = RequestEnvelope::new(id.clone(), operation, payload);
        if self.outbound.send(Envelope::Request(request)).is_err() {
            self.shared.registry.cancel(&id);
            return Invocation::failed(id, InvokeError::ConnectionClosed);
        }

        Invocation {
            id,
            state: InvocationState::Pending {
                handle,
                registry: self.shared.registry.clone(),
                outbound: self.outbound.clone(),
            },
        }
    }

    /// `invoke` with the configured default timeout.
    pub fn invoke_default(&self, operation: impl Into<String>, payload: Value) -> Invocation {
        self.invoke(operation, payload, self.options.default_timeout)
    }

    /// Number of outbound requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Tear the connection down and wait for its tasks to stop.
    ///
    /// Every pending request fails with `ConnectionClosed` and every inbound
    /// handler still running is cancelled.
    pub async fn close(&self) {
        self.shared.teardown(InvokeError::ConnectionClosed);
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Wait until the connection has been torn down, from either side.
    pub async fn closed(&self) {
        self.shared.shutdown.cancelled().await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.teardown(InvokeError::ConnectionClosed);
    }
}

async fn receive_loop<T>(
    mut frames: FramedRead<ReadHalf<T>, LengthDelimitedCodec>,
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
    strict: bool,
) where
    T: AsyncRead + Send,
{
    loop {
        let next: Option<Result<BytesMut, std::io::Error>> = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok(bytes)) => match decode(&bytes) {
                Ok(envelope) => {
                    dispatcher.dispatch(envelope);
                }
                Err(error) => {
                    dispatcher.reject_frame(&bytes, &error, strict);
                    if strict {
                        shared.teardown(InvokeError::ConnectionClosed);
                        break;
                    }
                }
            },
            Some(Err(error)) => {
                TransportFailed {
                    connection_id: shared.connection_id,
                    direction: "read",
                    error: &error,
                }
                .log();
                shared.teardown(InvokeError::Transport(error.to_string()));
                break;
            }
            None => {
                shared.teardown(InvokeError::ConnectionClosed);
                break;
            }
        }
    }
}

async fn write_loop<T>(
    mut frames: FramedWrite<WriteHalf<T>, LengthDelimitedCodec>,
    mut queue: mpsc::UnboundedReceiver<Envelope>,
    shared: Arc<Shared>,
) where
    T: AsyncWrite + Send,
{
    loop {
        // Drain queued frames before honoring shutdown.
        let envelope = tokio::select! {
            biased;
            next = queue.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
            _ = shared.shutdown.cancelled() => break,
        };

        let Some(bytes) = encode_within_limit(&shared, envelope) else {
            continue;
        };

        if let Err(error) = SinkExt::<Bytes>::send(&mut frames, Bytes::from(bytes)).await {
            TransportFailed {
                connection_id: shared.connection_id,
                direction: "write",
                error: &error,
            }
            .log();
            shared.teardown(InvokeError::Transport(error.to_string()));
            break;
        }
    }

    let _ = SinkExt::<Bytes>::close(&mut frames).await;
}

/// Encode `envelope`, keeping one oversized message from costing the
/// connection.
///
/// An oversized request fails its own invocation with a transport error. An
/// oversized response is replaced by a `Fault` response for the same id so
/// the peer is still answered. `None` means nothing goes on the wire.
fn encode_within_limit(shared: &Shared, envelope: Envelope) -> Option<Vec<u8>> {
    let bytes = match encode(&envelope) {
        Ok(bytes) => bytes,
        Err(error) => {
            if let Envelope::Request(request) = &envelope {
                shared
                    .registry
                    .resolve(&request.id, Err(InvokeError::Transport(error.to_string())));
            }
            TransportFailed {
                connection_id: shared.connection_id,
                direction: "encode",
                error: &error,
            }
            .log();
            return None;
        }
    };

    if bytes.len() <= MAX_FRAME_LENGTH {
        return Some(bytes);
    }

    let (request_id, kind) = match &envelope {
        Envelope::Request(request) => (request.id.as_str(), "request"),
        Envelope::Response(response) => (response.id.as_str(), "response"),
        Envelope::Cancel(cancel) => (cancel.id.as_str(), "cancel"),
    };
    FrameTooLarge {
        connection_id: shared.connection_id,
        request_id,
        kind,
        size: bytes.len(),
        limit: MAX_FRAME_LENGTH,
    }
    .log();

    let reason = format!(
        "{} of {} bytes exceeds the {} byte frame limit",
        kind,
        bytes.len(),
        MAX_FRAME_LENGTH
    );
    match envelope {
        Envelope::Request(request) => {
            shared
                .registry
                .resolve(&request.id, Err(InvokeError::Transport(reason)));
            None
        }
        Envelope::Response(response) => {
            let substitute = ResponseEnvelope::error(
                response.id,
                OperationError::fault(reason),
                response.duration_ms,
            );
            encode(&Envelope::Response(substitute)).ok()
        }
        Envelope::Cancel(_) => None,
    }
}

async fn sweep_loop(shared: Arc<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                shared.registry.sweep(Instant::now());
            }
        }
    }
}

enum InvocationState {
    Pending {
        handle: PendingHandle,
        registry: Arc<CorrelationRegistry>,
        outbound: mpsc::UnboundedSender<Envelope>,
    },
    Failed(Option<InvokeError>),
    Done,
}

/// An outbound request awaiting its response.
///
/// Dropping an unfinished invocation cancels it, exactly like `cancel`.
pub struct Invocation {
    id: String,
    state: InvocationState,
}

impl Invocation {
    fn failed(id: String, error: InvokeError) -> Self {
        Self {
            id,
            state: InvocationState::Failed(Some(error)),
        }
    }

    /// The correlation id carried on the wire.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Abandon the request.
    ///
    /// The pending entry is removed at once, so a late response is discarded,
    /// and the peer is sent a best-effort cancel notice. Returns `false` if
    /// the request had already been resolved.
    pub fn cancel(mut self) -> bool {
        self.abandon()
    }

    fn abandon(&mut self) -> bool {
        let state = std::mem::replace(&mut self.state, InvocationState::Done);
        let InvocationState::Pending { registry, outbound, .. } = state else {
            return false;
        };
        if !registry.cancel(&self.id) {
            return false;
        }
        RequestCancelled {
            request_id: &self.id,
            origin: "caller",
        }
        .log();
        let _ = outbound.send(Envelope::Cancel(CancelEnvelope {
            id: self.id.clone(),
        }));
        true
    }
}

impl Future for Invocation {
    type Output = InvokeResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match &mut this.state {
            InvocationState::Pending { handle, .. } => match Pin::new(handle).poll(cx) {
                Poll::Ready(result) => result,
                Poll::Pending => return Poll::Pending,
            },
            InvocationState::Failed(error) => {
                Err(error.take().unwrap_or(InvokeError::ConnectionClosed))
            }
            InvocationState::Done => Err(InvokeError::ConnectionClosed),
        };
        this.state = InvocationState::Done;
        Poll::Ready(result)
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            InvocationState::Pending { .. } => "pending",
            InvocationState::Failed(_) => "failed",
            InvocationState::Done => "done",
        };
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::SleepingHandler;
    use crate::engine::capability::Capability;
    use crate::engine::operation_table::Operation;
    use serde_json::json;

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            sweep_interval: Duration::from_millis(5),
            ..ConnectionOptions::default()
        }
    }

    fn sleeper_pair(delay: Duration) -> (Connection, Connection, Arc<SleepingHandler>) {
        let sleeper = Arc::new(SleepingHandler::new(delay));
        let table = Arc::new(OperationTable::new().with(Operation::Eval, sleeper.clone()));
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = Connection::open(a, Arc::new(OperationTable::new()), CapabilityContext::empty(), options());
        let server = Connection::open(b, table, CapabilityContext::new([Capability::Eval]), options());
        (client, server, sleeper)
    }

    #[tokio::test]
    async fn test_invoke_resolves_with_remote_value() {
        let (client, _server, _) = sleeper_pair(Duration::from_millis(1));

        let value = client
            .invoke("eval", json!({"tag": "x"}), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value["tag"], json!("x"));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_local_timeout_does_not_wait_for_peer() {
        let (client, _server, _) = sleeper_pair(Duration::from_secs(30));

        let started = Instant::now();
        let result = client.invoke("eval", json!({}), Duration::from_millis(50)).await;
        assert!(matches!(result, Err(InvokeError::Timeout { .. })));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_invocation_is_forgotten() {
        let (client, _server, _) = sleeper_pair(Duration::from_secs(30));

        let invocation = client.invoke("eval", json!({}), Duration::from_secs(5));
        assert_eq!(client.pending_count(), 1);
        drop(invocation);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_resolution_reports_false() {
        let (client, _server, _) = sleeper_pair(Duration::from_millis(1));

        let mut invocation = client.invoke("eval", json!({}), Duration::from_secs(5));
        let value = (&mut invocation).await;
        assert!(value.is_ok());
        assert!(!invocation.cancel());
    }

    #[tokio::test]
    async fn test_invoke_after_close_fails_immediately() {
        let (client, _server, _) = sleeper_pair(Duration::from_millis(1));
        client.close().await;

        let result = client.invoke_default("eval", json!({})).await;
        assert_eq!(result, Err(InvokeError::ConnectionClosed));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_peer_close_is_observed() {
        let (client, server, _) = sleeper_pair(Duration::from_millis(1));
        server.close().await;
        drop(server);

        tokio::time::timeout(Duration::from_secs(5), client.closed())
            .await
            .expect("client should notice the peer going away");
        assert!(client.is_closed());
    }
}
