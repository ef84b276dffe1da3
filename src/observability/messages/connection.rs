// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types for connection lifecycle and transport events.

use crate::observability::messages::StructuredLog;
use std::fmt::{Display, Formatter};
use tracing::Span;

/// A connection was opened over a duplex channel.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ConnectionOpened<'a> {
    pub connection_id: u64,
    pub peer: &'a str,
    pub capabilities: &'a str,
}

impl Display for ConnectionOpened<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connection {} opened with {}: capabilities={}",
            self.connection_id, self.peer, self.capabilities
        )
    }
}

impl StructuredLog for ConnectionOpened<'_> {
    fn log(&self) {
        tracing::info!(
            connection_id = self.connection_id,
            peer = self.peer,
            capabilities = self.capabilities,
            "{}", self
        );
    }

    fn span(&self, name: &str) -> Span {
        tracing::info_span!(
            "connection",
            span_name = name,
            connection_id = self.connection_id,
            peer = self.peer,
        )
    }
}

/// A connection was torn down and its pending requests rejected.
///
/// # Log Level
/// `info!` - Important operational event
pub struct ConnectionClosed<'a> {
    pub connection_id: u64,
    pub reason: &'a str,
    pub rejected_requests: usize,
}

impl Display for ConnectionClosed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connection {} closed ({}): rejected {} pending requests",
            self.connection_id, self.reason, self.rejected_requests
        )
    }
}

impl StructuredLog for ConnectionClosed<'_> {
    fn log(&self) {
        tracing::info!(
            connection_id = self.connection_id,
            reason = self.reason,
            rejected_requests = self.rejected_requests,
            "{}", self
        );
    }
}

/// Reading from or writing to the channel failed.
///
/// # Log Level
/// `error!` - Failure requiring attention
pub struct TransportFailed<'a> {
    pub connection_id: u64,
    pub direction: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl Display for TransportFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connection {} {} failed: {}",
            self.connection_id, self.direction, self.error
        )
    }
}

impl StructuredLog for TransportFailed<'_> {
    fn log(&self) {
        tracing::error!(
            connection_id = self.connection_id,
            direction = self.direction,
            error = %self.error,
            "{}", self
        );
    }
}

/// An outbound envelope encoded past the frame limit and was not sent as is.
///
/// # Log Level
/// `warn!` - The message is lost, the connection survives
pub struct FrameTooLarge<'a> {
    pub connection_id: u64,
    pub request_id: &'a str,
    pub kind: &'a str,
    pub size: usize,
    pub limit: usize,
}

impl Display for FrameTooLarge<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Connection {} dropped {} '{}': {} bytes exceeds the {} byte frame limit",
            self.connection_id, self.kind, self.request_id, self.size, self.limit
        )
    }
}

impl StructuredLog for FrameTooLarge<'_> {
    fn log(&self) {
        tracing::warn!(
            connection_id = self.connection_id,
            request_id = self.request_id,
            kind = self.kind,
            size = self.size,
            limit = self.limit,
            "{}", self
        );
    }
}

/// The server accepted a new peer.
///
/// # Log Level
/// `info!` - Important operational event
pub struct PeerAccepted<'a> {
    pub peer: &'a str,
}

impl Display for PeerAccepted<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Accepted peer {}", self.peer)
    }
}

impl StructuredLog for PeerAccepted<'_> {
    fn log(&self) {
        tracing::info!(peer = self.peer, "{}", self);
    }
}

/// Accepting a peer failed; the listener keeps going.
///
/// # Log Level
/// `warn!` - Transient listener failure
pub struct AcceptFailed<'a> {
    pub error: &'a dyn std::error::Error,
}

impl Display for AcceptFailed<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "Failed to accept peer: {}", self.error)
    }
}

impl StructuredLog for AcceptFailed<'_> {
    fn log(&self) {
        tracing::warn!(error = %self.error, "{}", self);
    }
}

/// The server is listening.
///
/// # Log Level
/// `info!` - Important operational event
pub struct Listening<'a> {
    pub address: &'a str,
    pub operations: usize,
    pub capabilities: &'a str,
}

impl Display for Listening<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "Listening on {} with {} operations, capabilities={}",
            self.address, self.operations, self.capabilities
        )
    }
}

impl StructuredLog for Listening<'_> {
    fn log(&self) {
        tracing::info!(
            address = self.address,
            operations = self.operations,
            capabilities = self.capabilities,
            "{}", self
        );
    }
}
