// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::capability::CapabilityContext;
use crate::errors::OperationError;

/// Everything a handler gets to see about one inbound request.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    pub id: String,
    pub payload: Value,
    /// The connection's capabilities, for handlers that gate finer-grained
    /// actions themselves (the sandbox gates builtins with it).
    pub capabilities: CapabilityContext,
    /// Fired when the remote peer cancels the request or the connection
    /// closes. The dispatcher drops the handler's future right after, so
    /// only handlers that want to return early need to watch it (eval does).
    pub cancellation: CancellationToken,
}

#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError>;

    fn name(&self) -> &'static str;
}
