// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::OperationError;
use crate::traits::{Datastore, HandlerRequest, OperationHandler};

/// Forwards `query-store` payloads to the datastore
pub struct QueryStoreHandler {
    store: Arc<dyn Datastore>,
}

impl QueryStoreHandler {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for QueryStoreHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        self.store.query(request.payload).await
    }

    fn name(&self) -> &'static str {
        "query_store"
    }
}

/// Forwards `transact-store` payloads to the datastore
pub struct TransactStoreHandler {
    store: Arc<dyn Datastore>,
}

impl TransactStoreHandler {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl OperationHandler for TransactStoreHandler {
    async fn handle(&self, request: HandlerRequest) -> Result<Value, OperationError> {
        self.store.transact(request.payload).await
    }

    fn name(&self) -> &'static str {
        "transact_store"
    }
}
