// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error categories carried inside `status = error` responses.

use std::fmt;
use thiserror::Error;

/// Wire-visible classification of a failed request.
///
/// The string form is what travels in `ErrorDetail.category`. Categories sent
/// by a peer that this build does not know are preserved in `Unrecognized` so
/// they can still be shown to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The inbound message could not be decoded or violated the protocol.
    ProtocolError,
    /// The request named an operation absent from the operation table.
    UnknownOperation,
    /// The connection's capability context lacks a required capability.
    CapabilityDenied,
    /// The handler (or sandboxed expression) failed at runtime.
    Fault,
    /// The sandbox ran out of fuel or time.
    Exhausted,
    /// The payload did not match the operation's contract.
    InvalidPayload,
    Unrecognized(String),
}

impl ErrorCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCategory::ProtocolError => "ProtocolError",
            ErrorCategory::UnknownOperation => "UnknownOperation",
            ErrorCategory::CapabilityDenied => "CapabilityDenied",
            ErrorCategory::Fault => "Fault",
            ErrorCategory::Exhausted => "Exhausted",
            ErrorCategory::InvalidPayload => "InvalidPayload",
            ErrorCategory::Unrecognized(other) => other,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "ProtocolError" => ErrorCategory::ProtocolError,
            "UnknownOperation" => ErrorCategory::UnknownOperation,
            "CapabilityDenied" => ErrorCategory::CapabilityDenied,
            "Fault" => ErrorCategory::Fault,
            "Exhausted" => ErrorCategory::Exhausted,
            "InvalidPayload" => ErrorCategory::InvalidPayload,
            other => ErrorCategory::Unrecognized(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized failure produced by the dispatcher or a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{category}: {message}")]
pub struct OperationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl OperationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Fault, message)
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::InvalidPayload, message)
    }

    pub fn unknown_operation(operation: &str) -> Self {
        Self::new(
            ErrorCategory::UnknownOperation,
            format!("operation '{}' is not registered", operation),
        )
    }
}
