// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! In-memory key/value datastore.
//!
//! Exists so the store operations can be exercised end to end; it is not a
//! storage engine. Keys are strings, values arbitrary JSON, and every
//! transaction is applied atomically under one write lock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::backends::local::handlers::{decode_payload, encode_result};
use crate::errors::OperationError;
use crate::traits::Datastore;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Transaction {
    #[serde(default)]
    assert: Map<String, Value>,
    #[serde(default)]
    retract: Vec<String>,
}

#[derive(Serialize)]
struct TransactionReceipt {
    tx: u64,
    asserted: usize,
    retracted: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Query {
    Key { key: String },
    Prefix { prefix: String },
}

#[derive(Default)]
struct Contents {
    entries: BTreeMap<String, Value>,
    last_tx: u64,
}

#[derive(Default)]
pub struct MemoryDatastore {
    contents: RwLock<Contents>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    /// `{"key": k}` answers the value or null; `{"prefix": p}` answers an
    /// object of every matching entry.
    async fn query(&self, query: Value) -> Result<Value, OperationError> {
        let query: Query = decode_payload("query-store", query)?;
        let contents = self.contents.read().await;

        match query {
            Query::Key { key } => Ok(contents.entries.get(&key).cloned().unwrap_or(Value::Null)),
            Query::Prefix { prefix } => {
                let matches: Map<String, Value> = contents
                    .entries
                    .range(prefix.clone()..)
                    .take_while(|(key, _)| key.starts_with(&prefix))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                Ok(Value::Object(matches))
            }
        }
    }

    /// `{"assert": {k: v, ..}, "retract": [k, ..]}`; retractions apply after
    /// assertions.
    async fn transact(&self, transaction: Value) -> Result<Value, OperationError> {
        let transaction: Transaction = decode_payload("transact-store", transaction)?;
        if transaction.assert.is_empty() && transaction.retract.is_empty() {
            return Err(OperationError::invalid_payload(
                "transaction neither asserts nor retracts anything",
            ));
        }

        let mut contents = self.contents.write().await;
        let asserted = transaction.assert.len();
        for (key, value) in transaction.assert {
            contents.entries.insert(key, value);
        }
        let retracted = transaction
            .retract
            .iter()
            .filter(|key| contents.entries.remove(key.as_str()).is_some())
            .count();
        contents.last_tx += 1;

        encode_result(&TransactionReceipt {
            tx: contents.last_tx,
            asserted,
            retracted,
        })
    }
}
