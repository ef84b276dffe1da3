// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The dispatch core: correlation of outbound requests, routing of inbound
//! ones, and the connection that ties both to a duplex channel.

pub mod capability;
pub mod connection;
pub mod dispatcher;
pub mod operation_table;
pub mod registry;

pub use capability::{Capability, CapabilityContext};
pub use connection::{Connection, ConnectionOptions, Invocation};
pub use dispatcher::{Dispatched, Dispatcher};
pub use operation_table::{Operation, OperationDescriptor, OperationTable};
pub use registry::{CorrelationRegistry, InvokeResult, PendingHandle};
