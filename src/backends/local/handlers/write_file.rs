// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use super::{decode_payload, encode_result};
use crate::backends::local::paths::resolve_under_root;
use crate::errors::OperationError;
use crate::traits::{HandlerRequest, OperationHandler};

#[derive(Deserialize)]
struct WriteFilePayload {
    path: String,
    contents: String,
    #[serde(default)]
    append: bool,
}

#[derive(Serialize)]
struct WriteFileResult {
    path: String,
    bytes_written: usize,
}

/// Writes or appends to a file under the filesystem root
pub struct WriteFileHandler {
    root: PathBuf,
}

impl WriteFileHandler {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl OperationHandler for WriteFileHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        let payload: WriteFilePayload = decode_payload("write-file", request.payload)?;
        let resolved = resolve_under_root(&self.root, &payload.path)?;
        let fault = |e: std::io::Error| OperationError::fault(format!("writing '{}': {}", payload.path, e));

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(fault)?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(payload.append)
            .truncate(!payload.append)
            .open(&resolved)
            .await
            .map_err(fault)?;
        file.write_all(payload.contents.as_bytes()).await.map_err(fault)?;
        file.flush().await.map_err(fault)?;

        encode_result(&WriteFileResult {
            bytes_written: payload.contents.len(),
            path: payload.path.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "write_file"
    }
}
