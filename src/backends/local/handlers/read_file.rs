// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use super::{decode_payload, encode_result};
use crate::backends::local::paths::resolve_under_root;
use crate::errors::OperationError;
use crate::traits::{HandlerRequest, OperationHandler};

#[derive(Deserialize)]
#[serde(untagged)]
enum ReadFilePayload {
    Path(String),
    Object { path: String },
}

#[derive(Serialize)]
struct ReadFileResult {
    path: String,
    contents: String,
}

/// Reads a UTF-8 file under the filesystem root
pub struct ReadFileHandler {
    root: PathBuf,
}

impl ReadFileHandler {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl OperationHandler for ReadFileHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        let path = match decode_payload("read-file", request.payload)? {
            ReadFilePayload::Path(path) | ReadFilePayload::Object { path } => path,
        };
        let resolved = resolve_under_root(&self.root, &path)?;

        let contents = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| OperationError::fault(format!("reading '{}': {}", path, e)))?;

        encode_result(&ReadFileResult { path, contents })
    }

    fn name(&self) -> &'static str {
        "read_file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::capability::CapabilityContext;
    use crate::errors::ErrorCategory;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn request(payload: Value) -> HandlerRequest {
        HandlerRequest {
            id: "r1".to_string(),
            payload,
            capabilities: CapabilityContext::empty(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_reads_file_contents() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("greeting.txt"), "hello").unwrap();
        let handler = ReadFileHandler::new(root.path().to_path_buf());

        for payload in [json!("greeting.txt"), json!({"path": "greeting.txt"})] {
            let value = handler.handle(request(payload)).await.unwrap();
            assert_eq!(value, json!({"path": "greeting.txt", "contents": "hello"}));
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_fault() {
        let root = TempDir::new().unwrap();
        let handler = ReadFileHandler::new(root.path().to_path_buf());

        let error = handler.handle(request(json!("nope.txt"))).await.unwrap_err();
        assert_eq!(error.category, ErrorCategory::Fault);
    }

    #[tokio::test]
    async fn test_escape_is_invalid_payload() {
        let root = TempDir::new().unwrap();
        let handler = ReadFileHandler::new(root.path().to_path_buf());

        let error = handler.handle(request(json!("../etc/passwd"))).await.unwrap_err();
        assert_eq!(error.category, ErrorCategory::InvalidPayload);
    }
}
