// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Operation handler backends for The Switchboard.
//!
//! # Available Backends
//!
//! ## Local Backend
//! In-process handlers for the standard operations:
//! - **Filesystem**: `read-file` and `write-file`, confined to a root directory
//! - **Shell**: `run-shell`, killed when the request is cancelled
//! - **Datastore**: `query-store` and `transact-store` over the `Datastore` trait
//! - **Eval**: `eval`, delegated to the sandbox
//!
//! ## Sandbox Backend
//! Expression evaluation in WebAssembly under wasmtime:
//! - **Fuel**: every guest instruction burns from a fixed budget
//! - **Interruption**: time budgets and cancellation stop the guest
//! - **Capabilities**: host builtins are linked only when granted
//!
//! ## Datastore
//! `MemoryDatastore`, an in-memory key/value store used so the store
//! operations work end to end.
//!
//! ## Stub Backend (Test-Only)
//! Handlers for dispatcher and connection tests (only available in test builds):
//! - **RecordingHandler**: counts invocations and echoes payloads
//! - **SleepingHandler**: answers after a delay
//! - **FailingHandler**: always fails
//! - **PanickingHandler**: panics, to exercise fault isolation
//!
//! # Architecture
//!
//! ```text
//! Configuration → HandlerResources → LocalHandlerFactory → OperationTable → Dispatcher
//! ```

pub mod datastore;
pub mod local;
pub mod sandbox;
#[cfg(test)]
pub mod stub;
