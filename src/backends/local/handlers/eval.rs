// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::decode_payload;
use crate::backends::sandbox::SandboxedExecutor;
use crate::errors::{ErrorCategory, OperationError};
use crate::traits::{HandlerRequest, OperationHandler};

#[derive(Deserialize)]
#[serde(untagged)]
enum EvalPayload {
    Expression(String),
    Detailed {
        expression: String,
        time_budget_ms: Option<u64>,
    },
}

/// Eval handler - runs an expression in the sandbox
pub struct EvalHandler {
    executor: Arc<SandboxedExecutor>,
}

impl EvalHandler {
    pub fn new(executor: Arc<SandboxedExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl OperationHandler for EvalHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        let (expression, requested_budget) = match decode_payload("eval", request.payload)? {
            EvalPayload::Expression(expression) => (expression, None),
            EvalPayload::Detailed {
                expression,
                time_budget_ms,
            } => (expression, time_budget_ms.map(Duration::from_millis)),
        };

        let budget = self.executor.effective_time_budget(requested_budget);
        // Dropping the evaluation aborts the guest.
        tokio::select! {
            result = self.executor.execute(&expression, &request.capabilities, budget) => {
                result.map_err(OperationError::from)
            }
            _ = request.cancellation.cancelled() => Err(OperationError::new(
                ErrorCategory::Exhausted,
                "evaluation cancelled",
            )),
        }
    }

    fn name(&self) -> &'static str {
        "eval"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sandbox::SandboxSettings;
    use crate::engine::capability::{Capability, CapabilityContext};
    use crate::errors::ErrorCategory;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    fn handler() -> EvalHandler {
        EvalHandler::new(Arc::new(SandboxedExecutor::new(SandboxSettings::default()).unwrap()))
    }

    fn request(payload: Value, capabilities: CapabilityContext) -> HandlerRequest {
        HandlerRequest {
            id: "r1".to_string(),
            payload,
            capabilities,
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_string_and_object_payloads() {
        let handler = handler();
        let eval_only = CapabilityContext::new([Capability::Eval]);

        let plain = handler.handle(request(json!("1 + 2"), eval_only.clone())).await;
        assert_eq!(plain, Ok(json!(3)));

        let detailed = handler
            .handle(request(
                json!({"expression": "6 * 7", "time_budget_ms": 500}),
                eval_only,
            ))
            .await;
        assert_eq!(detailed, Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_invalid_payload() {
        let result = handler()
            .handle(request(json!({"expr": 1}), CapabilityContext::new([Capability::Eval])))
            .await;
        assert_eq!(result.unwrap_err().category, ErrorCategory::InvalidPayload);
    }

    #[tokio::test]
    async fn test_ungranted_builtin_is_denied() {
        let result = handler()
            .handle(request(json!("exit(1)"), CapabilityContext::new([Capability::Eval])))
            .await;
        assert_eq!(result.unwrap_err().category, ErrorCategory::CapabilityDenied);
    }

    #[tokio::test]
    async fn test_cancellation_stops_a_running_evaluation() {
        let executor = SandboxedExecutor::new(SandboxSettings {
            fuel: 1 << 40,
            default_time_budget: Duration::from_secs(10),
            max_time_budget: Duration::from_secs(10),
            ..SandboxSettings::default()
        })
        .unwrap();
        let handler = EvalHandler::new(Arc::new(executor));
        let request = request(json!("sum_to(1000000000000)"), CapabilityContext::new([Capability::Eval]));
        let token = request.cancellation.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let error = handler.handle(request).await.unwrap_err();
        assert_eq!(error.category, ErrorCategory::Exhausted);
        assert_eq!(error.message, "evaluation cancelled");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
