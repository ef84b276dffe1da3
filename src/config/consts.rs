// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

/// Default address `switchboard serve` listens on
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7171";

/// Default deadline for outbound requests (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
/// Default period of the deadline sweeper
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 25;
/// Default upper bound on a single inbound handler (30 seconds)
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 30_000;

/// Default fuel level for sandboxed evaluation (10 million instructions)
pub const DEFAULT_FUEL_LEVEL: u64 = 10_000_000;
/// Minimum allowed fuel level (100 thousand instructions)
pub const MIN_FUEL_LEVEL: u64 = 100_000;
/// Maximum allowed fuel level (500 million instructions) - security limit
pub const MAX_FUEL_LEVEL: u64 = 500_000_000;

/// Default wall-clock budget for one evaluation
pub const DEFAULT_TIME_BUDGET_MS: u64 = 1_000;
/// Largest wall-clock budget a caller may request
pub const MAX_TIME_BUDGET_MS: u64 = 10_000;

/// Default root for file operations
pub const DEFAULT_FS_ROOT: &str = ".";
/// Default shell for `run-shell`
pub const DEFAULT_SHELL_PROGRAM: &str = "sh";
