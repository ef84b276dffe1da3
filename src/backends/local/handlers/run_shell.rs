// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;

use super::{decode_payload, encode_result};
use crate::errors::OperationError;
use crate::traits::{HandlerRequest, OperationHandler};

#[derive(Deserialize)]
#[serde(untagged)]
enum RunShellPayload {
    Command(String),
    Object { command: String },
}

#[derive(Serialize)]
struct RunShellResult {
    /// `None` when the process was ended by a signal.
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Runs a command line through the configured shell, from the filesystem root.
///
/// The child is killed if the request is cancelled or times out, since the
/// handler future is dropped at that point.
pub struct RunShellHandler {
    program: String,
    root: PathBuf,
}

impl RunShellHandler {
    pub fn new(program: String, root: PathBuf) -> Self {
        Self { program, root }
    }
}

#[async_trait]
impl OperationHandler for RunShellHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        let command = match decode_payload("run-shell", request.payload)? {
            RunShellPayload::Command(command) | RunShellPayload::Object { command } => command,
        };

        let output = Command::new(&self.program)
            .arg("-c")
            .arg(&command)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OperationError::fault(format!("spawning '{}': {}", self.program, e)))?;

        encode_result(&RunShellResult {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn name(&self) -> &'static str {
        "run_shell"
    }
}
