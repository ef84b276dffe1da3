// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Observability module for structured logging and tracing.
//!
//! This module provides centralized message types for all diagnostic and
//! operational logging in The Switchboard. Message types follow a struct-based
//! pattern with `Display` implementations so that:
//!
//! * There are no magic strings scattered through the dispatch code
//! * Every event carries the same structured fields wherever it is logged
//! * Wording can change in one place
//!
//! # Architecture
//!
//! Messages are organized by subsystem:
//! * `messages::connection` - connection lifecycle and transport events
//! * `messages::dispatch` - request routing, completion, cancellation and timeouts
//! * `messages::sandbox` - sandboxed evaluation events
//!
//! # Usage
//!
//! ```rust
//! use the_switchboard::observability::messages::{dispatch::RequestReceived, StructuredLog};
//!
//! let msg = RequestReceived {
//!     request_id: "3f1c",
//!     operation: "eval",
//! };
//!
//! msg.log();
//! ```

pub mod messages;
