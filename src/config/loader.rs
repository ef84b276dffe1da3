// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use crate::config::consts::*;
use crate::engine::capability::Capability;
use crate::errors::ConfigError;
use crate::observability::messages::sandbox::FuelLevelClamped;
use crate::observability::messages::StructuredLog;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for a switchboard peer.
///
/// Every section is optional; missing values fall back to the defaults in
/// `config::consts`.
///
/// # Fields
/// * `connection` - Listen address, timeouts and protocol strictness
/// * `capabilities` - What connecting peers may ask this peer to do
/// * `sandbox` - Fuel and time limits for `eval`
/// * `filesystem` - Root directory for file operations
/// * `shell` - Program used by `run-shell`
///
/// # Example
/// ```yaml
/// connection:
///   listen: "127.0.0.1:7171"
///   default_timeout_ms: 5000
/// capabilities: [eval, read-fs, query-store]
/// sandbox:
///   fuel:
///     default: 10000000
///   time_budget:
///     default_ms: 1000
/// filesystem:
///   root: "/srv/switchboard"
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub filesystem: FilesystemConfig,
    #[serde(default)]
    pub shell: ShellConfig,
}

/// Connection-level options.
///
/// # Fields
/// * `listen` - Address for `switchboard serve` (and the default `invoke` target)
/// * `default_timeout_ms` - Deadline for outbound requests without an explicit one
/// * `sweep_interval_ms` - How often expired requests are swept
/// * `handler_timeout_ms` - Upper bound on one inbound handler
/// * `strict` - Close the connection on the first undecodable frame
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionConfig {
    pub listen: Option<String>,
    pub default_timeout_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub handler_timeout_ms: Option<u64>,
    pub strict: Option<bool>,
}

impl ConnectionConfig {
    pub fn get_listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR)
    }

    pub fn get_default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn get_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.unwrap_or(DEFAULT_SWEEP_INTERVAL_MS))
    }

    pub fn get_handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms.unwrap_or(DEFAULT_HANDLER_TIMEOUT_MS))
    }

    pub fn get_strict(&self) -> bool {
        self.strict.unwrap_or(false)
    }
}

/// Sandbox limits.
///
/// # Example
/// ```yaml
/// sandbox:
///   fuel:
///     default: 10000000
///     minimum: 100000
///     maximum: 500000000
///   time_budget:
///     default_ms: 1000
///     maximum_ms: 10000
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub fuel: FuelConfig,
    #[serde(default)]
    pub time_budget: TimeBudgetConfig,
}

/// Fuel consumption configuration for sandboxed evaluation.
///
/// Fuel limits stop runaway loops by bounding the number of instructions an
/// evaluation may execute.
///
/// # Fields
/// * `default` - Fuel given to each evaluation (defaults to 10M)
/// * `minimum` - Lower bound for `default` (defaults to 100K)
/// * `maximum` - Upper bound for `default` (defaults to 500M) - security limit
#[derive(Debug, Default, Deserialize)]
pub struct FuelConfig {
    pub default: Option<u64>,
    pub minimum: Option<u64>,
    pub maximum: Option<u64>,
}

impl FuelConfig {
    /// Get the default fuel level, using built-in default if not configured.
    pub fn get_default(&self) -> u64 {
        self.default.unwrap_or(DEFAULT_FUEL_LEVEL)
    }

    /// Get the minimum fuel level, using built-in default if not configured.
    pub fn get_minimum(&self) -> u64 {
        self.minimum.unwrap_or(MIN_FUEL_LEVEL)
    }

    /// Get the maximum fuel level, using built-in default if not configured.
    pub fn get_maximum(&self) -> u64 {
        self.maximum.unwrap_or(MAX_FUEL_LEVEL)
    }

    /// Validate and clamp a fuel level to configured bounds.
    ///
    /// Out-of-range values are clamped to the nearest bound and a warning is
    /// logged.
    ///
    /// # Example
    /// ```
    /// use the_switchboard::config::FuelConfig;
    ///
    /// let config = FuelConfig::default();
    /// let fuel = config.validate_and_clamp(1_000_000_000); // Too high
    /// assert_eq!(fuel, 500_000_000); // Clamped to maximum
    /// ```
    pub fn validate_and_clamp(&self, requested: u64) -> u64 {
        let min = self.get_minimum();
        let max = self.get_maximum();
        let clamped = requested.clamp(min, max);

        if clamped != requested {
            FuelLevelClamped {
                requested,
                clamped,
                minimum: min,
                maximum: max,
            }
            .log();
        }
        clamped
    }

    /// The fuel each evaluation actually receives.
    pub fn effective_default(&self) -> u64 {
        self.validate_and_clamp(self.get_default())
    }
}

/// Wall-clock limits for one evaluation.
///
/// Callers may ask for a budget in the `eval` payload; requests above
/// `maximum_ms` are clamped.
#[derive(Debug, Default, Deserialize)]
pub struct TimeBudgetConfig {
    pub default_ms: Option<u64>,
    pub maximum_ms: Option<u64>,
}

impl TimeBudgetConfig {
    pub fn get_default(&self) -> Duration {
        Duration::from_millis(self.default_ms.unwrap_or(DEFAULT_TIME_BUDGET_MS))
    }

    pub fn get_maximum(&self) -> Duration {
        Duration::from_millis(self.maximum_ms.unwrap_or(MAX_TIME_BUDGET_MS))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FilesystemConfig {
    pub root: Option<PathBuf>,
}

impl FilesystemConfig {
    pub fn get_root(&self) -> PathBuf {
        self.root
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FS_ROOT))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ShellConfig {
    pub program: Option<String>,
}

impl ShellConfig {
    pub fn get_program(&self) -> &str {
        self.program.as_deref().unwrap_or(DEFAULT_SHELL_PROGRAM)
    }
}

impl Config {
    /// Check values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection
            .get_listen()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                field: "connection.listen",
                reason: e.to_string(),
            })?;

        let durations = [
            ("connection.default_timeout_ms", self.connection.get_default_timeout()),
            ("connection.sweep_interval_ms", self.connection.get_sweep_interval()),
            ("connection.handler_timeout_ms", self.connection.get_handler_timeout()),
            ("sandbox.time_budget.default_ms", self.sandbox.time_budget.get_default()),
            ("sandbox.time_budget.maximum_ms", self.sandbox.time_budget.get_maximum()),
        ];
        for (field, duration) in durations {
            if duration.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        let time_budget = &self.sandbox.time_budget;
        if time_budget.get_default() > time_budget.get_maximum() {
            return Err(ConfigError::Invalid {
                field: "sandbox.time_budget.default_ms",
                reason: format!(
                    "{}ms exceeds maximum_ms {}ms",
                    time_budget.get_default().as_millis(),
                    time_budget.get_maximum().as_millis()
                ),
            });
        }

        let fuel = &self.sandbox.fuel;
        if fuel.get_minimum() == 0 || fuel.get_minimum() > fuel.get_maximum() {
            return Err(ConfigError::Invalid {
                field: "sandbox.fuel",
                reason: format!(
                    "minimum {} and maximum {} do not form a valid range",
                    fuel.get_minimum(),
                    fuel.get_maximum()
                ),
            });
        }

        if self.shell.get_program().trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "shell.program",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Load a config from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    Ok(cfg)
}

/// Load and validate a config from a YAML file
pub fn load_and_validate_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let cfg = load_config(path)?;
    cfg.validate()?;
    Ok(cfg)
}
