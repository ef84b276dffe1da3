// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::{InvokeError, OperationError};

/// Milliseconds since the Unix epoch, used for `issued_at`.
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Request,
    Response,
    Cancel,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EnvelopeKind::Request => "request",
            EnvelopeKind::Response => "response",
            EnvelopeKind::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// A decoded message exchanged over the duplex channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(RequestEnvelope),
    Response(ResponseEnvelope),
    /// Best-effort notice that the issuer abandoned a request.
    Cancel(CancelEnvelope),
}

impl Envelope {
    pub fn id(&self) -> &str {
        match self {
            Envelope::Request(request) => &request.id,
            Envelope::Response(response) => &response.id,
            Envelope::Cancel(cancel) => &cancel.id,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Request(_) => EnvelopeKind::Request,
            Envelope::Response(_) => EnvelopeKind::Response,
            Envelope::Cancel(_) => EnvelopeKind::Cancel,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub id: String,
    pub operation: String,
    pub payload: Value,
    pub issued_at: i64,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<String>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            operation: operation.into(),
            payload,
            issued_at: unix_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
    Timeout,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::Error => "error",
            Status::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Result half of a response; the status is implied by the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Ok(Value),
    Error(OperationError),
    Timeout,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: String,
    pub outcome: ResponseOutcome,
    pub duration_ms: i64,
}

impl ResponseEnvelope {
    pub fn ok(id: impl Into<String>, value: Value, duration_ms: i64) -> Self {
        Self {
            id: id.into(),
            outcome: ResponseOutcome::Ok(value),
            duration_ms,
        }
    }

    pub fn error(id: impl Into<String>, error: OperationError, duration_ms: i64) -> Self {
        Self {
            id: id.into(),
            outcome: ResponseOutcome::Error(error),
            duration_ms,
        }
    }

    pub fn timeout(id: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            id: id.into(),
            outcome: ResponseOutcome::Timeout,
            duration_ms,
        }
    }

    pub fn status(&self) -> Status {
        match self.outcome {
            ResponseOutcome::Ok(_) => Status::Ok,
            ResponseOutcome::Error(_) => Status::Error,
            ResponseOutcome::Timeout => Status::Timeout,
        }
    }

    /// Convert into the value handed to the waiting caller.
    pub fn into_result(self) -> Result<Value, InvokeError> {
        match self.outcome {
            ResponseOutcome::Ok(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(InvokeError::Remote(error)),
            ResponseOutcome::Timeout => Err(InvokeError::RemoteTimeout {
                duration_ms: self.duration_ms,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelEnvelope {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use serde_json::json;

    #[test]
    fn test_response_into_result() {
        let ok = ResponseEnvelope::ok("a", json!(3), 1);
        assert_eq!(ok.status(), Status::Ok);
        assert_eq!(ok.into_result(), Ok(json!(3)));

        let error = ResponseEnvelope::error(
            "b",
            OperationError::new(ErrorCategory::CapabilityDenied, "no"),
            0,
        );
        assert_eq!(error.status(), Status::Error);
        match error.into_result() {
            Err(InvokeError::Remote(e)) => assert_eq!(e.category, ErrorCategory::CapabilityDenied),
            other => panic!("Expected remote error, got {:?}", other),
        }

        let timeout = ResponseEnvelope::timeout("c", 250);
        assert_eq!(
            timeout.into_result(),
            Err(InvokeError::RemoteTimeout { duration_ms: 250 })
        );
    }

    #[test]
    fn test_envelope_accessors() {
        let request = Envelope::Request(RequestEnvelope::new("req-1", "eval", json!("1 + 2")));
        assert_eq!(request.id(), "req-1");
        assert_eq!(request.kind(), EnvelopeKind::Request);
        assert_eq!(request.kind().to_string(), "request");

        let cancel = Envelope::Cancel(CancelEnvelope { id: "req-1".to_string() });
        assert_eq!(cancel.kind(), EnvelopeKind::Cancel);
    }
}
