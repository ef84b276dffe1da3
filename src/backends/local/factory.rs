// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::sync::Arc;

use super::handlers::*;
use crate::backends::sandbox::SandboxedExecutor;
use crate::engine::operation_table::{Operation, OperationTable};
use crate::traits::{Datastore, OperationHandler};

/// Shared resources the standard handlers are built from.
#[derive(Clone)]
pub struct HandlerResources {
    pub fs_root: PathBuf,
    pub shell_program: String,
    pub executor: Arc<SandboxedExecutor>,
    pub datastore: Arc<dyn Datastore>,
}

/// Factory for creating local (in-process) operation handlers
pub struct LocalHandlerFactory;

impl LocalHandlerFactory {
    /// Create the handler for an operation:
    /// - `eval` -> EvalHandler (sandboxed expression evaluation)
    /// - `read-file` -> ReadFileHandler
    /// - `write-file` -> WriteFileHandler
    /// - `run-shell` -> RunShellHandler
    /// - `query-store` -> QueryStoreHandler
    /// - `transact-store` -> TransactStoreHandler
    pub fn create_handler(operation: Operation, resources: &HandlerResources) -> Arc<dyn OperationHandler> {
        match operation {
            Operation::Eval => Arc::new(EvalHandler::new(resources.executor.clone())),
            Operation::ReadFile => Arc::new(ReadFileHandler::new(resources.fs_root.clone())),
            Operation::WriteFile => Arc::new(WriteFileHandler::new(resources.fs_root.clone())),
            Operation::RunShell => Arc::new(RunShellHandler::new(
                resources.shell_program.clone(),
                resources.fs_root.clone(),
            )),
            Operation::QueryStore => Arc::new(QueryStoreHandler::new(resources.datastore.clone())),
            Operation::TransactStore => {
                Arc::new(TransactStoreHandler::new(resources.datastore.clone()))
            }
        }
    }

    /// A table with every operation registered.
    ///
    /// Capabilities still decide, per connection, which of them a peer may
    /// actually call.
    pub fn standard_table(resources: &HandlerResources) -> OperationTable {
        Operation::ALL
            .into_iter()
            .fold(OperationTable::new(), |table, operation| {
                table.with(operation, Self::create_handler(operation, resources))
            })
    }

    /// Wire names of every operation this factory can build.
    pub fn list_available_operations() -> Vec<&'static str> {
        Operation::ALL.iter().map(Operation::name).collect()
    }
}
