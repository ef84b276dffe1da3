// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for request dispatch.
//!
//! Covers the lifecycle of a single correlated request in both directions:
//! inbound requests routed to handlers, outbound requests awaiting a response,
//! and the ways either can end early.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::Span;

/// An inbound request was accepted and handed to its handler.
///
/// # Log Level
/// `debug!` - Per-request detail
pub struct RequestReceived<'a> {
    pub request_id: &'a str,
    pub operation: &'a str,
}

impl Display for RequestReceived<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Dispatching request {} to operation '{}'",
            self.request_id, self.operation
        )
    }
}

impl StructuredLog for RequestReceived<'_> {
    fn log(&self) {
        tracing::debug!(
            request_id = self.request_id,
            operation = self.operation,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::debug_span!(
            "request",
            span_name = name,
            request_id = self.request_id,
            operation = self.operation,
        )
    }
}

/// An inbound request was refused before its handler ran.
///
/// # Log Level
/// `warn!` - The peer asked for something it cannot have
pub struct RequestRejected<'a> {
    pub request_id: &'a str,
    pub operation: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for RequestRejected<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Rejected request {} for operation '{}': {}",
            self.request_id, self.operation, self.error
        )
    }
}

impl StructuredLog for RequestRejected<'_> {
    fn log(&self) {
        tracing::warn!(
            request_id = self.request_id,
            operation = self.operation,
            error = %self.error,
            "{}", self
        );
    }
}

/// A handler finished and its response was queued.
///
/// # Log Level
/// `debug!` - Per-request detail
pub struct RequestCompleted<'a> {
    pub request_id: &'a str,
    pub operation: &'a str,
    pub status: &'a str,
    pub duration_ms: i64,
}

impl Display for RequestCompleted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Request {} ('{}') completed with status {} in {}ms",
            self.request_id, self.operation, self.status, self.duration_ms
        )
    }
}

impl StructuredLog for RequestCompleted<'_> {
    fn log(&self) {
        tracing::debug!(
            request_id = self.request_id,
            operation = self.operation,
            status = self.status,
            duration_ms = self.duration_ms,
            "{}", self
        );
    }
}

/// A handler panicked; the peer receives a fault.
///
/// # Log Level
/// `error!` - Handler bug
pub struct HandlerPanicked<'a> {
    pub request_id: &'a str,
    pub operation: &'a str,
}

impl Display for HandlerPanicked<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Handler for '{}' panicked while serving request {}",
            self.operation, self.request_id
        )
    }
}

impl StructuredLog for HandlerPanicked<'_> {
    fn log(&self) {
        tracing::error!(
            request_id = self.request_id,
            operation = self.operation,
            "{}", self
        );
    }
}

/// An in-flight request was cancelled, locally or by the peer.
///
/// # Log Level
/// `debug!` - Per-request detail
pub struct RequestCancelled<'a> {
    pub request_id: &'a str,
    pub origin: &'a str,
}

impl Display for RequestCancelled<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Request {} cancelled by {}", self.request_id, self.origin)
    }
}

impl StructuredLog for RequestCancelled<'_> {
    fn log(&self) {
        tracing::debug!(
            request_id = self.request_id,
            origin = self.origin,
            "{}", self
        );
    }
}

/// An outbound request passed its deadline without a response.
///
/// # Log Level
/// `warn!` - The peer is slow or gone
pub struct RequestTimedOut<'a> {
    pub request_id: &'a str,
    pub timeout: Duration,
    pub waited: Duration,
}

impl Display for RequestTimedOut<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Request {} timed out after {:?} (deadline {:?})",
            self.request_id, self.waited, self.timeout
        )
    }
}

impl StructuredLog for RequestTimedOut<'_> {
    fn log(&self) {
        tracing::warn!(
            request_id = self.request_id,
            timeout_ms = self.timeout.as_millis() as u64,
            waited_ms = self.waited.as_millis() as u64,
            "{}", self
        );
    }
}

/// A response arrived for an id that was no longer pending.
///
/// # Log Level
/// `debug!` - Expected after timeouts and cancellations
pub struct StaleResponseDiscarded<'a> {
    pub request_id: &'a str,
    pub status: &'a str,
}

impl Display for StaleResponseDiscarded<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Discarded {} response for request {}: nothing pending",
            self.status, self.request_id
        )
    }
}

impl StructuredLog for StaleResponseDiscarded<'_> {
    fn log(&self) {
        tracing::debug!(
            request_id = self.request_id,
            status = self.status,
            "{}", self
        );
    }
}

/// The peer broke the protocol: an undecodable frame or a reused in-flight id.
///
/// # Log Level
/// `warn!` - Peer misbehaviour
pub struct ProtocolViolation<'a> {
    pub request_id: Option<&'a str>,
    pub error: &'a dyn Display,
    pub closing: bool,
}

impl Display for ProtocolViolation<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.request_id {
            Some(id) => write!(f, "Protocol violation on request {}: {}", id, self.error)?,
            None => write!(f, "Protocol violation: {}", self.error)?,
        }
        if self.closing {
            write!(f, " (closing connection)")?;
        }
        Ok(())
    }
}

impl StructuredLog for ProtocolViolation<'_> {
    fn log(&self) {
        tracing::warn!(
            request_id = self.request_id.unwrap_or("-"),
            closing = self.closing,
            error = %self.error,
            "{}", self
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_violation_display() {
        let reason = "unknown envelope kind 9";
        let with_id = ProtocolViolation {
            request_id: Some("r1"),
            error: &reason,
            closing: true,
        };
        assert_eq!(
            with_id.to_string(),
            "Protocol violation on request r1: unknown envelope kind 9 (closing connection)"
        );

        let without_id = ProtocolViolation {
            request_id: None,
            error: &reason,
            closing: false,
        };
        assert_eq!(without_id.to_string(), "Protocol violation: unknown envelope kind 9");
    }

    #[test]
    fn test_request_completed_display() {
        let msg = RequestCompleted {
            request_id: "r1",
            operation: "eval",
            status: "ok",
            duration_ms: 12,
        };
        assert_eq!(
            msg.to_string(),
            "Request r1 ('eval') completed with status ok in 12ms"
        );
    }
}
