// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

pub mod factory;
pub mod handlers;
pub mod paths;

pub use factory::{HandlerResources, LocalHandlerFactory};
pub use handlers::*;
