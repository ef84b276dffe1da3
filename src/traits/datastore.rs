// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::OperationError;

/// The storage/query engine behind `query-store` and `transact-store`.
///
/// The protocol only fixes the envelope contract; query and transaction
/// shapes belong to the implementation.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn query(&self, query: Value) -> Result<Value, OperationError>;

    async fn transact(&self, transaction: Value) -> Result<Value, OperationError>;
}
