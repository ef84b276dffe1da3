// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Sandboxed evaluation of caller-supplied expressions.
//!
//! Expressions are compiled to a WebAssembly module and run under wasmtime
//! with fuel metering, epoch-based interruption and a fresh store per call.
//! Builtins that touch the host are imports, and the linker only defines the
//! imports the connection's capabilities grant.
//!
//! # Flow
//! ```text
//! expression → compiler (parse, check, emit WAT) → wat → Module
//!            → Linker (capability-scoped imports) → Store (fuel, epoch) → i64
//! ```

pub mod capability_manager;
pub mod compiler;
pub mod error;
pub mod executor;

pub use error::{ExecutionError, ExecutionResult};
pub use executor::{SandboxSettings, SandboxedExecutor};
