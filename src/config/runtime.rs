// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::net::SocketAddr;
use std::sync::Arc;

use crate::backends::datastore::MemoryDatastore;
use crate::backends::local::{HandlerResources, LocalHandlerFactory};
use crate::backends::sandbox::{SandboxSettings, SandboxedExecutor};
use crate::config::Config;
use crate::engine::capability::CapabilityContext;
use crate::engine::connection::ConnectionOptions;
use crate::engine::operation_table::OperationTable;
use crate::errors::ConfigError;

/// Everything needed to open connections: built once, shared by all of them.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub table: Arc<OperationTable>,
    pub capabilities: CapabilityContext,
    pub options: ConnectionOptions,
    pub listen: SocketAddr,
}

/// Runtime builder - turns a configuration into an operation table,
/// capability context and connection options.
///
/// # Examples
///
/// ```
/// use the_switchboard::config::{Config, RuntimeBuilder};
///
/// let config: Config = serde_yaml::from_str("capabilities: [eval]").unwrap();
/// let runtime = RuntimeBuilder::from_config(&config).unwrap();
///
/// assert_eq!(runtime.table.len(), 6);
/// assert_eq!(runtime.capabilities.len(), 1);
/// ```
pub struct RuntimeBuilder;

impl RuntimeBuilder {
    /// Build the runtime from a validated configuration.
    ///
    /// Every standard operation is registered; the configured capabilities
    /// decide which of them peers may call.
    pub fn from_config(cfg: &Config) -> Result<Runtime, ConfigError> {
        cfg.validate()?;

        let listen = cfg
            .connection
            .get_listen()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                field: "connection.listen",
                reason: e.to_string(),
            })?;

        let fs_root = cfg.filesystem.get_root();
        let executor = SandboxedExecutor::new(SandboxSettings {
            fuel: cfg.sandbox.fuel.effective_default(),
            default_time_budget: cfg.sandbox.time_budget.get_default(),
            max_time_budget: cfg.sandbox.time_budget.get_maximum(),
            fs_root: fs_root.clone(),
        })
        .map_err(|e| ConfigError::Invalid {
            field: "sandbox",
            reason: e.to_string(),
        })?;

        let resources = HandlerResources {
            fs_root,
            shell_program: cfg.shell.get_program().to_string(),
            executor: Arc::new(executor),
            datastore: Arc::new(MemoryDatastore::new()),
        };

        let options = ConnectionOptions {
            default_timeout: cfg.connection.get_default_timeout(),
            sweep_interval: cfg.connection.get_sweep_interval(),
            handler_timeout: cfg.connection.get_handler_timeout(),
            strict: cfg.connection.get_strict(),
            ..ConnectionOptions::default()
        };

        Ok(Runtime {
            table: Arc::new(LocalHandlerFactory::standard_table(&resources)),
            capabilities: cfg.capabilities.iter().copied().collect(),
            options,
            listen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::capability::Capability;
    use std::time::Duration;

    #[test]
    fn test_runtime_reflects_config() {
        let yaml = r#"
connection:
  listen: "127.0.0.1:0"
  default_timeout_ms: 750
  handler_timeout_ms: 2000
  strict: true
capabilities: [read-fs, write-fs]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let runtime = RuntimeBuilder::from_config(&cfg).unwrap();

        assert_eq!(runtime.listen.port(), 0);
        assert_eq!(runtime.options.default_timeout, Duration::from_millis(750));
        assert_eq!(runtime.options.handler_timeout, Duration::from_secs(2));
        assert!(runtime.options.strict);
        assert!(runtime.capabilities.allows(Capability::WriteFs));
        assert!(!runtime.capabilities.allows(Capability::Eval));
        assert_eq!(runtime.table.len(), 6);
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let cfg: Config = serde_yaml::from_str("connection: { listen: nowhere }").unwrap();
        assert!(matches!(
            RuntimeBuilder::from_config(&cfg),
            Err(ConfigError::Invalid { field: "connection.listen", .. })
        ));
    }
}
