// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::OperationError;
use crate::traits::{HandlerRequest, OperationHandler};

/// A handler that counts its invocations and echoes the payload back
pub struct RecordingHandler {
    pub label: String,
    invocations: AtomicUsize,
}

impl RecordingHandler {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OperationHandler for RecordingHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "handler": self.label, "payload": request.payload }))
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A handler that sleeps before answering.
///
/// The payload may override the delay with `{"sleep_ms": n}`; any `tag` in
/// the payload is echoed so callers can tell responses apart.
pub struct SleepingHandler {
    pub delay: Duration,
    started: AtomicUsize,
    finished: AtomicUsize,
}

impl SleepingHandler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl OperationHandler for SleepingHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let delay = request
            .payload
            .get("sleep_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.delay);

        tokio::time::sleep(delay).await;

        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "slept_ms": delay.as_millis() as u64,
            "tag": request.payload.get("tag").cloned().unwrap_or(Value::Null),
        }))
    }

    fn name(&self) -> &'static str {
        "sleeping"
    }
}

/// A handler that always fails for testing failure scenarios
pub struct FailingHandler;

#[async_trait::async_trait]
impl OperationHandler for FailingHandler {
    async fn handle(&self, _request: HandlerRequest) -> Result<Value, OperationError> {
        Err(OperationError::fault("simulated handler failure"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// A handler that panics, to exercise fault isolation
pub struct PanickingHandler;

#[async_trait::async_trait]
impl OperationHandler for PanickingHandler {
    async fn handle(&self, _request: HandlerRequest) -> Result<Value, OperationError> {
        panic!("simulated handler panic");
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}
