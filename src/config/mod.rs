// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod loader;
mod runtime;

pub mod consts;

pub use loader::{
    load_and_validate_config, load_config, Config, ConnectionConfig, FilesystemConfig,
    FuelConfig, SandboxConfig, ShellConfig, TimeBudgetConfig,
};
pub use runtime::{Runtime, RuntimeBuilder};
