// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The closed set of operations and the table mapping them to handlers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::capability::Capability;
use crate::traits::OperationHandler;

/// Every operation a peer can ask for.
///
/// The wire carries the operation as a string; it is resolved to a variant
/// exactly once, in the dispatcher. Capability requirements are attached to
/// the variant rather than to whatever handler happens to be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Eval,
    ReadFile,
    WriteFile,
    RunShell,
    QueryStore,
    TransactStore,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Eval,
        Operation::ReadFile,
        Operation::WriteFile,
        Operation::RunShell,
        Operation::QueryStore,
        Operation::TransactStore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Eval => "eval",
            Operation::ReadFile => "read-file",
            Operation::WriteFile => "write-file",
            Operation::RunShell => "run-shell",
            Operation::QueryStore => "query-store",
            Operation::TransactStore => "transact-store",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|operation| operation.name() == name)
    }

    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            Operation::Eval => &[Capability::Eval],
            Operation::ReadFile => &[Capability::ReadFs],
            Operation::WriteFile => &[Capability::WriteFs],
            Operation::RunShell => &[Capability::ShellExec],
            Operation::QueryStore => &[Capability::QueryStore],
            Operation::TransactStore => &[Capability::TransactStore],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An operation bound to its handler.
#[derive(Clone)]
pub struct OperationDescriptor {
    pub operation: Operation,
    pub handler: Arc<dyn OperationHandler>,
}

impl OperationDescriptor {
    pub fn required_capabilities(&self) -> &'static [Capability] {
        self.operation.required_capabilities()
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("operation", &self.operation)
            .field("handler", &self.handler.name())
            .field("required_capabilities", &self.required_capabilities())
            .finish()
    }
}

/// Newtype wrapper for the operation registry.
///
/// Assembled once at startup, then shared read-only behind an `Arc` by every
/// connection's dispatcher.
#[derive(Clone, Default)]
pub struct OperationTable(HashMap<Operation, OperationDescriptor>);

impl OperationTable {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Register (or replace) the handler for an operation.
    pub fn insert(&mut self, operation: Operation, handler: Arc<dyn OperationHandler>) {
        self.0.insert(operation, OperationDescriptor { operation, handler });
    }

    /// Builder-style variant of `insert`.
    pub fn with(mut self, operation: Operation, handler: Arc<dyn OperationHandler>) -> Self {
        self.insert(operation, handler);
        self
    }

    pub fn get(&self, operation: Operation) -> Option<&OperationDescriptor> {
        self.0.get(&operation)
    }

    /// Resolve a wire operation name. Names that are not operations at all
    /// and operations with no registered handler both come back `None`.
    pub fn lookup(&self, name: &str) -> Option<&OperationDescriptor> {
        Operation::from_name(name).and_then(|operation| self.get(operation))
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.0.contains_key(&operation)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations: Vec<&str> = self.0.keys().map(Operation::name).collect();
        operations.sort_unstable();
        f.debug_struct("OperationTable")
            .field("operation_count", &self.0.len())
            .field("operations", &operations)
            .finish()
    }
}
