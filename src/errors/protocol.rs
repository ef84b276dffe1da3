// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// Reasons an inbound frame is rejected as a malformed message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The bytes are not a well-formed frame.
    #[error("malformed frame: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("unknown envelope kind: {0}")]
    UnknownKind(i32),

    #[error("envelope is missing its id")]
    MissingId,

    #[error("request '{id}' does not name an operation")]
    MissingOperation { id: String },

    #[error("response '{id}' has unknown status {status}")]
    UnknownStatus { id: String, status: i32 },

    #[error("error response '{id}' carries no error detail")]
    MissingErrorDetail { id: String },

    /// Payload bytes are present but are not JSON.
    #[error("payload of '{id}' is not valid JSON: {source}")]
    InvalidPayload {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload could not be serialized: {0}")]
    Payload(#[from] serde_json::Error),
}
