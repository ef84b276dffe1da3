// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::time::Duration;
use thiserror::Error;

use crate::errors::OperationError;

/// Errors delivered to a local caller awaiting an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// No response arrived before the local deadline.
    #[error("request '{id}' timed out after {after:?}")]
    Timeout { id: String, after: Duration },

    /// The remote handler ran past its own deadline.
    #[error("remote handler timed out after {duration_ms}ms")]
    RemoteTimeout { duration_ms: i64 },

    /// The remote peer answered with `status = error`.
    #[error("remote error: {0}")]
    Remote(OperationError),

    /// Reading or writing the duplex channel failed.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    ConnectionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("request id '{0}' is already outstanding")]
    DuplicateId(String),
}
