// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Inbound envelope routing for one connection.
//!
//! The dispatcher is driven by the connection's single receive loop and must
//! never block it: responses are resolved inline against the correlation
//! registry, while every accepted request runs in its own task and reports
//! back through the connection's outbound queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::capability::CapabilityContext;
use crate::engine::operation_table::{Operation, OperationTable};
use crate::engine::registry::CorrelationRegistry;
use crate::errors::{DecodeError, ErrorCategory, OperationError};
use crate::observability::messages::dispatch::{
    HandlerPanicked, ProtocolViolation, RequestCancelled, RequestCompleted, RequestReceived,
    RequestRejected, StaleResponseDiscarded,
};
use crate::observability::messages::StructuredLog;
use crate::protocol::{
    request_id_hint, CancelEnvelope, Envelope, RequestEnvelope, ResponseEnvelope,
};
use crate::traits::{HandlerRequest, OperationHandler};

/// What the dispatcher did with one inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// A response completed a pending outbound request.
    Resolved,
    /// A response matched nothing pending and was dropped.
    StaleResponse,
    /// A request was handed to its handler.
    Accepted,
    /// A request was answered with an error without running a handler.
    Rejected(ErrorCategory),
    /// A request reused the id of one still in flight and was dropped.
    DuplicateRequest,
    /// A cancel notice stopped an in-flight request.
    Cancelled,
    /// A cancel notice named nothing in flight.
    Ignored,
}

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn in_flight(map: &InFlight) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Dispatcher {
    table: Arc<OperationTable>,
    capabilities: CapabilityContext,
    registry: Arc<CorrelationRegistry>,
    outbound: mpsc::UnboundedSender<Envelope>,
    in_flight: InFlight,
    shutdown: CancellationToken,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        table: Arc<OperationTable>,
        capabilities: CapabilityContext,
        registry: Arc<CorrelationRegistry>,
        outbound: mpsc::UnboundedSender<Envelope>,
        shutdown: CancellationToken,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            table,
            capabilities,
            registry,
            outbound,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            handler_timeout,
        }
    }

    pub fn dispatch(&self, envelope: Envelope) -> Dispatched {
        match envelope {
            Envelope::Response(response) => self.dispatch_response(response),
            Envelope::Request(request) => self.dispatch_request(request),
            Envelope::Cancel(cancel) => self.dispatch_cancel(cancel),
        }
    }

    /// Handle a frame that failed to decode.
    ///
    /// If a request id can be salvaged from the bytes the peer gets a
    /// `ProtocolError` response so its caller does not wait out a timeout.
    pub fn reject_frame(&self, bytes: &[u8], error: &DecodeError, closing: bool) {
        let request_id = request_id_hint(bytes);
        ProtocolViolation {
            request_id: request_id.as_deref(),
            error,
            closing,
        }
        .log();

        if let Some(id) = request_id {
            let error = OperationError::new(ErrorCategory::ProtocolError, error.to_string());
            self.send(ResponseEnvelope::error(id, error, 0));
        }
    }

    /// Number of inbound requests whose handlers are still running.
    pub fn in_flight_count(&self) -> usize {
        in_flight(&self.in_flight).len()
    }

    fn dispatch_response(&self, response: ResponseEnvelope) -> Dispatched {
        let id = response.id.clone();
        let status = response.status();
        if self.registry.resolve(&id, response.into_result()) {
            Dispatched::Resolved
        } else {
            StaleResponseDiscarded {
                request_id: &id,
                status: &status.to_string(),
            }
            .log();
            Dispatched::StaleResponse
        }
    }

    fn dispatch_request(&self, request: RequestEnvelope) -> Dispatched {
        // A reused id must not be answered at all, or the answer would
        // resolve the peer's original request.
        if in_flight(&self.in_flight).contains_key(&request.id) {
            let reason = "request id is already in flight";
            ProtocolViolation {
                request_id: Some(&request.id),
                error: &reason,
                closing: false,
            }
            .log();
            return Dispatched::DuplicateRequest;
        }

        let Some(descriptor) = self.table.lookup(&request.operation) else {
            let error = OperationError::unknown_operation(&request.operation);
            return self.reject(&request, error);
        };

        let missing = self.capabilities.missing(descriptor.required_capabilities());
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|capability| capability.name()).collect();
            let error = OperationError::new(
                ErrorCategory::CapabilityDenied,
                format!(
                    "operation '{}' requires [{}]",
                    descriptor.operation,
                    names.join(", ")
                ),
            );
            return self.reject(&request, error);
        }

        // Requests are dispatched one at a time from the receive loop, so the
        // id cannot have been claimed since the check above.
        let token = self.shutdown.child_token();
        in_flight(&self.in_flight).insert(request.id.clone(), token.clone());

        RequestReceived {
            request_id: &request.id,
            operation: &request.operation,
        }
        .log();

        let job = HandlerJob {
            operation: descriptor.operation,
            handler: descriptor.handler.clone(),
            request: HandlerRequest {
                id: request.id,
                payload: request.payload,
                capabilities: self.capabilities.clone(),
                cancellation: token,
            },
            handler_timeout: self.handler_timeout,
        };
        let in_flight_map = self.in_flight.clone();
        let outbound = self.outbound.clone();

        tokio::spawn(async move {
            let id = job.request.id.clone();
            let response = job.run().await;
            // Retire the id before replying so the peer may reuse it as soon
            // as it sees the response.
            in_flight(&in_flight_map).remove(&id);
            if let Some(response) = response {
                let _ = outbound.send(Envelope::Response(response));
            }
        });

        Dispatched::Accepted
    }

    fn dispatch_cancel(&self, cancel: CancelEnvelope) -> Dispatched {
        let token = in_flight(&self.in_flight).get(&cancel.id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                RequestCancelled {
                    request_id: &cancel.id,
                    origin: "peer",
                }
                .log();
                Dispatched::Cancelled
            }
            None => Dispatched::Ignored,
        }
    }

    fn reject(&self, request: &RequestEnvelope, error: OperationError) -> Dispatched {
        RequestRejected {
            request_id: &request.id,
            operation: &request.operation,
            error: &error,
        }
        .log();
        let category = error.category.clone();
        self.send(ResponseEnvelope::error(request.id.clone(), error, 0));
        Dispatched::Rejected(category)
    }

    fn send(&self, response: ResponseEnvelope) {
        // A closed queue means the writer is gone along with the connection.
        let _ = self.outbound.send(Envelope::Response(response));
    }
}

/// One accepted request, ready to run detached from the receive loop.
struct HandlerJob {
    operation: Operation,
    handler: Arc<dyn OperationHandler>,
    request: HandlerRequest,
    handler_timeout: Duration,
}

impl HandlerJob {
    /// Run the handler to completion, timeout or cancellation.
    ///
    /// Returns `None` when cancelled: a cancelled request gets no response.
    async fn run(self) -> Option<ResponseEnvelope> {
        let started = Instant::now();
        let id = self.request.id.clone();
        let token = self.request.cancellation.clone();
        let handler = self.handler;
        let request = self.request;

        let mut task = tokio::spawn(async move { handler.handle(request).await });

        let outcome = tokio::select! {
            _ = token.cancelled() => {
                task.abort();
                return None;
            }
            joined = tokio::time::timeout(self.handler_timeout, &mut task) => joined,
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        let response = match outcome {
            Ok(Ok(Ok(value))) => ResponseEnvelope::ok(id, value, duration_ms),
            Ok(Ok(Err(error))) => ResponseEnvelope::error(id, error, duration_ms),
            Ok(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    HandlerPanicked {
                        request_id: &id,
                        operation: self.operation.name(),
                    }
                    .log();
                    "handler panicked"
                } else {
                    "handler task was aborted"
                };
                ResponseEnvelope::error(id, OperationError::fault(message), duration_ms)
            }
            Err(_elapsed) => {
                task.abort();
                token.cancel();
                ResponseEnvelope::timeout(id, duration_ms)
            }
        };

        RequestCompleted {
            request_id: &response.id,
            operation: self.operation.name(),
            status: &response.status().to_string(),
            duration_ms,
        }
        .log();
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::stub::{PanickingHandler, RecordingHandler, SleepingHandler};
    use crate::engine::capability::Capability;
    use crate::errors::InvokeError;
    use crate::protocol::{encode, ResponseOutcome, Status};
    use serde_json::json;

    struct Harness {
        dispatcher: Dispatcher,
        registry: Arc<CorrelationRegistry>,
        outbound: mpsc::UnboundedReceiver<Envelope>,
    }

    fn harness(table: OperationTable, capabilities: CapabilityContext) -> Harness {
        let registry = Arc::new(CorrelationRegistry::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::new(table),
            capabilities,
            registry.clone(),
            tx,
            CancellationToken::new(),
            Duration::from_secs(5),
        );
        Harness {
            dispatcher,
            registry,
            outbound: rx,
        }
    }

    fn request(id: &str, operation: &str) -> Envelope {
        Envelope::Request(RequestEnvelope::new(id, operation, json!({})))
    }

    async fn next_response(outbound: &mut mpsc::UnboundedReceiver<Envelope>) -> ResponseEnvelope {
        match tokio::time::timeout(Duration::from_secs(5), outbound.recv()).await {
            Ok(Some(Envelope::Response(response))) => response,
            other => panic!("Expected a response envelope, got {:?}", other),
        }
    }

    fn error_category(response: &ResponseEnvelope) -> &ErrorCategory {
        match &response.outcome {
            ResponseOutcome::Error(error) => &error.category,
            other => panic!("Expected an error outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_response_resolves_pending_request() {
        let h = harness(OperationTable::new(), CapabilityContext::empty());
        let handle = h.registry.register("out-1", Duration::from_secs(5)).unwrap();

        let response = Envelope::Response(ResponseEnvelope::ok("out-1", json!(3), 1));
        assert_eq!(h.dispatcher.dispatch(response), Dispatched::Resolved);
        assert_eq!(handle.await, Ok(json!(3)));
    }

    #[tokio::test]
    async fn test_duplicate_response_is_discarded() {
        let h = harness(OperationTable::new(), CapabilityContext::empty());
        let handle = h.registry.register("out-1", Duration::from_secs(5)).unwrap();

        let first = Envelope::Response(ResponseEnvelope::ok("out-1", json!("first"), 1));
        let second = Envelope::Response(ResponseEnvelope::ok("out-1", json!("second"), 1));
        assert_eq!(h.dispatcher.dispatch(first), Dispatched::Resolved);
        assert_eq!(h.dispatcher.dispatch(second), Dispatched::StaleResponse);
        assert_eq!(handle.await, Ok(json!("first")));
    }

    #[tokio::test]
    async fn test_remote_error_response_reaches_caller() {
        let h = harness(OperationTable::new(), CapabilityContext::empty());
        let handle = h.registry.register("out-1", Duration::from_secs(5)).unwrap();

        let error = OperationError::new(ErrorCategory::Exhausted, "fuel exhausted");
        let response = Envelope::Response(ResponseEnvelope::error("out-1", error.clone(), 4));
        h.dispatcher.dispatch(response);
        assert_eq!(handle.await, Err(InvokeError::Remote(error)));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_rejected() {
        let mut h = harness(OperationTable::new(), CapabilityContext::empty());

        assert_eq!(
            h.dispatcher.dispatch(request("r1", "launch-missiles")),
            Dispatched::Rejected(ErrorCategory::UnknownOperation)
        );
        let response = next_response(&mut h.outbound).await;
        assert_eq!(response.id, "r1");
        assert_eq!(error_category(&response), &ErrorCategory::UnknownOperation);
    }

    #[tokio::test]
    async fn test_known_operation_without_handler_is_unknown() {
        let reader = Arc::new(RecordingHandler::new("reader"));
        let table = OperationTable::new().with(Operation::ReadFile, reader);
        let mut h = harness(table, CapabilityContext::new([Capability::Eval]));

        assert_eq!(
            h.dispatcher.dispatch(request("r1", "eval")),
            Dispatched::Rejected(ErrorCategory::UnknownOperation)
        );
        let response = next_response(&mut h.outbound).await;
        assert_eq!(error_category(&response), &ErrorCategory::UnknownOperation);
    }

    #[tokio::test]
    async fn test_missing_capability_never_reaches_handler() {
        let writer = Arc::new(RecordingHandler::new("writer"));
        let table = OperationTable::new().with(Operation::WriteFile, writer.clone());
        let mut h = harness(table, CapabilityContext::new([Capability::ReadFs]));

        assert_eq!(
            h.dispatcher.dispatch(request("r1", "write-file")),
            Dispatched::Rejected(ErrorCategory::CapabilityDenied)
        );
        let response = next_response(&mut h.outbound).await;
        assert_eq!(error_category(&response), &ErrorCategory::CapabilityDenied);
        assert_eq!(writer.invocations(), 0);
    }

    #[tokio::test]
    async fn test_accepted_request_replies_with_same_id() {
        let reader = Arc::new(RecordingHandler::new("reader"));
        let table = OperationTable::new().with(Operation::ReadFile, reader.clone());
        let mut h = harness(table, CapabilityContext::new([Capability::ReadFs]));

        assert_eq!(
            h.dispatcher.dispatch(request("r7", "read-file")),
            Dispatched::Accepted
        );
        let response = next_response(&mut h.outbound).await;
        assert_eq!(response.id, "r7");
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(reader.invocations(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_fault() {
        let table = OperationTable::new().with(Operation::Eval, Arc::new(PanickingHandler));
        let mut h = harness(table, CapabilityContext::new([Capability::Eval]));

        h.dispatcher.dispatch(request("r1", "eval"));
        let response = next_response(&mut h.outbound).await;
        assert_eq!(error_category(&response), &ErrorCategory::Fault);
    }

    #[tokio::test]
    async fn test_handler_timeout_yields_timeout_status() {
        let sleeper = Arc::new(SleepingHandler::new(Duration::from_secs(30)));
        let table = OperationTable::new().with(Operation::Eval, sleeper);
        let registry = Arc::new(CorrelationRegistry::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            Arc::new(table),
            CapabilityContext::new([Capability::Eval]),
            registry,
            tx,
            CancellationToken::new(),
            Duration::from_millis(50),
        );

        dispatcher.dispatch(request("r1", "eval"));
        let response = next_response(&mut rx).await;
        assert_eq!(response.status(), Status::Timeout);
        assert!(response.duration_ms >= 50);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_request_is_dropped() {
        let sleeper = Arc::new(SleepingHandler::new(Duration::from_millis(100)));
        let table = OperationTable::new().with(Operation::Eval, sleeper);
        let mut h = harness(table, CapabilityContext::new([Capability::Eval]));

        assert_eq!(h.dispatcher.dispatch(request("r1", "eval")), Dispatched::Accepted);
        assert_eq!(
            h.dispatcher.dispatch(request("r1", "eval")),
            Dispatched::DuplicateRequest
        );

        let response = next_response(&mut h.outbound).await;
        assert_eq!(response.id, "r1");
        assert_eq!(h.dispatcher.in_flight_count(), 0);
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reused_id_with_unknown_operation_gets_no_answer() {
        let sleeper = Arc::new(SleepingHandler::new(Duration::from_millis(100)));
        let table = OperationTable::new().with(Operation::Eval, sleeper);
        let mut h = harness(table, CapabilityContext::new([Capability::Eval]));

        assert_eq!(h.dispatcher.dispatch(request("r1", "eval")), Dispatched::Accepted);
        assert_eq!(
            h.dispatcher.dispatch(request("r1", "not-a-real-op")),
            Dispatched::DuplicateRequest
        );
        assert_eq!(
            h.dispatcher.dispatch(request("r1", "write-file")),
            Dispatched::DuplicateRequest
        );

        let response = next_response(&mut h.outbound).await;
        assert_eq!(response.id, "r1");
        assert_eq!(response.status(), Status::Ok);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_handler_without_response() {
        let sleeper = Arc::new(SleepingHandler::new(Duration::from_secs(30)));
        let table = OperationTable::new().with(Operation::Eval, sleeper.clone());
        let mut h = harness(table, CapabilityContext::new([Capability::Eval]));

        h.dispatcher.dispatch(request("r1", "eval"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sleeper.started(), 1);

        let cancel = Envelope::Cancel(CancelEnvelope { id: "r1".to_string() });
        assert_eq!(h.dispatcher.dispatch(cancel), Dispatched::Cancelled);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.dispatcher.in_flight_count(), 0);
        assert_eq!(sleeper.finished(), 0);
        assert!(h.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_for_unknown_id_is_ignored() {
        let h = harness(OperationTable::new(), CapabilityContext::empty());
        let cancel = Envelope::Cancel(CancelEnvelope { id: "nope".to_string() });
        assert_eq!(h.dispatcher.dispatch(cancel), Dispatched::Ignored);
    }

    #[tokio::test]
    async fn test_malformed_request_gets_protocol_error() {
        let mut h = harness(OperationTable::new(), CapabilityContext::empty());
        // A request frame whose operation was left empty.
        let bytes = encode(&request("r9", "")).unwrap();
        let error = crate::protocol::decode(&bytes).unwrap_err();

        h.dispatcher.reject_frame(&bytes, &error, false);
        let response = next_response(&mut h.outbound).await;
        assert_eq!(response.id, "r9");
        assert_eq!(error_category(&response), &ErrorCategory::ProtocolError);
    }

    #[tokio::test]
    async fn test_garbage_frame_sends_nothing() {
        let mut h = harness(OperationTable::new(), CapabilityContext::empty());
        let bytes = [0xff_u8, 0xff, 0xff];
        let error = crate::protocol::decode(&bytes).unwrap_err();

        h.dispatcher.reject_frame(&bytes, &error, false);
        assert!(h.outbound.try_recv().is_err());
    }
}
