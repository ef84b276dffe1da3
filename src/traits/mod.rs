// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod datastore;
pub mod handler;

pub use datastore::Datastore;
pub use handler::{HandlerRequest, OperationHandler};
