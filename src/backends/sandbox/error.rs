// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Error types for sandboxed evaluation.

use thiserror::Error;

use crate::errors::{ErrorCategory, OperationError};

/// Ways an evaluation can fail.
///
/// Every variant maps onto exactly one wire category, so the `eval` handler
/// can forward a failure to the peer without inspecting it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The expression is invalid, or the guest trapped, or a host call failed.
    #[error("{0}")]
    Fault(String),

    /// Fuel ran out, the time budget expired, or the evaluation was aborted.
    #[error("{0}")]
    Exhausted(String),

    /// The expression calls a builtin the connection is not allowed to use.
    #[error("{0}")]
    CapabilityDenied(String),

    /// The wasmtime engine could not be configured.
    #[error("sandbox engine unavailable: {0}")]
    Engine(String),
}

impl ExecutionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutionError::Fault(_) | ExecutionError::Engine(_) => ErrorCategory::Fault,
            ExecutionError::Exhausted(_) => ErrorCategory::Exhausted,
            ExecutionError::CapabilityDenied(_) => ErrorCategory::CapabilityDenied,
        }
    }
}

impl From<ExecutionError> for OperationError {
    fn from(error: ExecutionError) -> Self {
        OperationError::new(error.category(), error.to_string())
    }
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let cases = vec![
            (ExecutionError::Fault("x".into()), ErrorCategory::Fault),
            (ExecutionError::Engine("x".into()), ErrorCategory::Fault),
            (ExecutionError::Exhausted("x".into()), ErrorCategory::Exhausted),
            (
                ExecutionError::CapabilityDenied("x".into()),
                ErrorCategory::CapabilityDenied,
            ),
        ];

        for (error, expected) in cases {
            let operation_error: OperationError = error.into();
            assert_eq!(operation_error.category, expected);
        }
    }
}
