// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Handlers for the standard operations.
//!
//! Each handler decodes its JSON payload into a typed request, performs the
//! operation and serializes a typed result. Payloads that do not decode are
//! answered with `InvalidPayload`.

pub mod eval;
pub mod read_file;
pub mod run_shell;
pub mod store;
pub mod write_file;

pub use eval::EvalHandler;
pub use read_file::ReadFileHandler;
pub use run_shell::RunShellHandler;
pub use store::{QueryStoreHandler, TransactStoreHandler};
pub use write_file::WriteFileHandler;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::OperationError;

/// Decode a handler payload, naming the operation in the error.
pub(crate) fn decode_payload<T: DeserializeOwned>(operation: &str, payload: Value) -> Result<T, OperationError> {
    serde_json::from_value(payload)
        .map_err(|e| OperationError::invalid_payload(format!("{} payload: {}", operation, e)))
}

pub(crate) fn encode_result<T: Serialize>(result: &T) -> Result<Value, OperationError> {
    serde_json::to_value(result)
        .map_err(|e| OperationError::fault(format!("Failed to serialize result: {}", e)))
}
