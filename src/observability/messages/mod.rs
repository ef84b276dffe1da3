// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Centralized message types for structured logging.
//!
//! Each message type implements `Display` for the human-readable line and
//! `StructuredLog` to emit it at its documented level with structured fields.
//!
//! * `connection` - connection lifecycle and transport events
//! * `dispatch` - request routing, completion, cancellation and timeouts
//! * `sandbox` - sandboxed evaluation events

use tracing::Span;

pub mod connection;
pub mod dispatch;
pub mod sandbox;

/// A log message that knows its own level and structured fields.
pub trait StructuredLog {
    /// Emit the event.
    fn log(&self);

    /// Open a span carrying the message's fields.
    fn span(&self, _name: &str) -> Span {
        Span::none()
    }
}
