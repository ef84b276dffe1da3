// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod config;
mod invoke;
mod operation;
mod protocol;

pub use config::ConfigError;
pub use invoke::{InvokeError, RegistryError};
pub use operation::{ErrorCategory, OperationError};
pub use protocol::{DecodeError, EncodeError};
