// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Capabilities and the per-connection capability context.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A named permission that must be granted to a connection before a gated
/// operation (or sandbox builtin) may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Eval,
    ReadFs,
    WriteFs,
    ShellExec,
    QueryStore,
    TransactStore,
    ProcessExit,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Eval => "eval",
            Capability::ReadFs => "read-fs",
            Capability::WriteFs => "write-fs",
            Capability::ShellExec => "shell-exec",
            Capability::QueryStore => "query-store",
            Capability::TransactStore => "transact-store",
            Capability::ProcessExit => "process-exit",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable set of capabilities attached to a connection at creation.
///
/// Cloning shares the underlying set; there is no way to add a capability to
/// an existing context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityContext(Arc<BTreeSet<Capability>>);

impl CapabilityContext {
    pub fn new<I: IntoIterator<Item = Capability>>(capabilities: I) -> Self {
        Self(Arc::new(capabilities.into_iter().collect()))
    }

    /// A context that grants nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Capabilities from `required` that this context does not grant.
    pub fn missing(&self, required: &[Capability]) -> Vec<Capability> {
        required
            .iter()
            .copied()
            .filter(|capability| !self.allows(*capability))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilityContext {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for CapabilityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(Capability::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
