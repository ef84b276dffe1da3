// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use wasmtime::{Engine, Module, Store, Trap, UpdateDeadline};

use crate::backends::sandbox::capability_manager::{build_linker, create_engine, SandboxState};
use crate::backends::sandbox::compiler::{compile, MAX_EXPRESSION_BYTES};
use crate::backends::sandbox::error::{ExecutionError, ExecutionResult};
use crate::engine::capability::CapabilityContext;
use crate::observability::messages::sandbox::{
    EvaluationAborted, EvaluationFinished, EvaluationStarted,
};
use crate::observability::messages::StructuredLog;

/// Limits applied to every evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub fuel: u64,
    pub default_time_budget: Duration,
    pub max_time_budget: Duration,
    /// Directory the file builtins are confined to.
    pub fs_root: PathBuf,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        use crate::config::consts::*;
        Self {
            fuel: DEFAULT_FUEL_LEVEL,
            default_time_budget: Duration::from_millis(DEFAULT_TIME_BUDGET_MS),
            max_time_budget: Duration::from_millis(MAX_TIME_BUDGET_MS),
            fs_root: PathBuf::from(DEFAULT_FS_ROOT),
        }
    }
}

/// Raises the abort flag and bumps the engine epoch so a running guest
/// notices at its next epoch check.
struct AbortOnDrop {
    flag: Arc<AtomicBool>,
    engine: Engine,
    armed: bool,
}

impl AbortOnDrop {
    fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.engine.increment_epoch();
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.trigger();
        }
    }
}

/// Evaluates expressions inside a fresh WebAssembly instance each time.
///
/// Each call gets its own `Store`, so no state survives from one evaluation
/// to the next. Guest code runs on the blocking pool; the async caller only
/// waits, bounded by the time budget.
pub struct SandboxedExecutor {
    engine: Engine,
    settings: SandboxSettings,
}

impl SandboxedExecutor {
    pub fn new(settings: SandboxSettings) -> ExecutionResult<Self> {
        Ok(Self {
            engine: create_engine()?,
            settings,
        })
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    /// Clamp a caller-requested time budget to the configured maximum.
    pub fn effective_time_budget(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.settings.default_time_budget)
            .min(self.settings.max_time_budget)
    }

    /// Evaluate `expression` with the builtins `capabilities` allow.
    ///
    /// Dropping the returned future aborts the evaluation: host imports stop
    /// acting immediately and the guest is interrupted at its next epoch
    /// check.
    pub async fn execute(
        &self,
        expression: &str,
        capabilities: &CapabilityContext,
        time_budget: Duration,
    ) -> ExecutionResult<Value> {
        if expression.len() > MAX_EXPRESSION_BYTES {
            return Err(ExecutionError::Fault(format!(
                "expression is {} bytes, limit is {}",
                expression.len(),
                MAX_EXPRESSION_BYTES
            )));
        }

        let compiled = compile(expression)?;
        let missing = capabilities.missing(&compiled.required_capabilities());
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|c| c.name()).collect();
            return Err(ExecutionError::CapabilityDenied(format!(
                "expression needs [{}]",
                names.join(", ")
            )));
        }

        let binary = wat::parse_str(&compiled.wat)
            .map_err(|e| ExecutionError::Fault(format!("assembling expression: {}", e)))?;
        let module = Module::from_binary(&self.engine, &binary)
            .map_err(|e| ExecutionError::Fault(format!("compiling expression: {}", e)))?;

        let imports: Vec<&str> = compiled.builtins.iter().map(|b| b.name()).collect();
        EvaluationStarted {
            expression_len: expression.len(),
            fuel: self.settings.fuel,
            time_budget,
            imports: &imports,
        }
        .log();

        let flag = Arc::new(AtomicBool::new(false));
        let mut guard = AbortOnDrop {
            flag: flag.clone(),
            engine: self.engine.clone(),
            armed: true,
        };

        let run = Evaluation {
            engine: self.engine.clone(),
            module,
            capabilities: capabilities.clone(),
            state: SandboxState::new(self.settings.fs_root.clone(), flag),
            fuel: self.settings.fuel,
        };

        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || run.run());

        let outcome = match tokio::time::timeout(time_budget, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(ExecutionError::Fault(format!(
                "evaluation task failed: {}",
                join_error
            ))),
            Err(_elapsed) => {
                guard.trigger();
                EvaluationAborted {
                    reason: "time budget",
                    elapsed: started.elapsed(),
                }
                .log();
                Err(ExecutionError::Exhausted(format!(
                    "time budget of {}ms exceeded",
                    time_budget.as_millis()
                )))
            }
        };
        guard.disarm();

        let (result, fuel_consumed) = match outcome {
            Ok((value, consumed)) => (Ok(Value::from(value)), consumed),
            Err(error) => (Err(error), 0),
        };
        EvaluationFinished {
            outcome: if result.is_ok() { "succeeded" } else { "failed" },
            fuel_consumed,
            elapsed: started.elapsed(),
        }
        .log();
        result
    }
}

/// Everything one evaluation needs on the blocking thread.
struct Evaluation {
    engine: Engine,
    module: Module,
    capabilities: CapabilityContext,
    state: SandboxState,
    fuel: u64,
}

impl Evaluation {
    /// Returns the guest's result and the fuel it burned.
    fn run(self) -> ExecutionResult<(i64, u64)> {
        let linker = build_linker(&self.engine, &self.capabilities)?;
        let abort = self.state.abort.clone();

        let mut store = Store::new(&self.engine, self.state);
        store
            .set_fuel(self.fuel)
            .map_err(|e| ExecutionError::Engine(e.to_string()))?;
        // Deadline zero: the first epoch check consults the abort flag, which
        // covers an abort that landed before the store existed.
        store.set_epoch_deadline(0);
        store.epoch_deadline_callback(move |_| {
            if abort.load(Ordering::SeqCst) {
                Err(anyhow::anyhow!("evaluation aborted"))
            } else {
                // Another evaluation was aborted; keep going.
                Ok(UpdateDeadline::Continue(1))
            }
        });

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| ExecutionError::Fault(format!("instantiating expression: {}", e)))?;
        let evaluate = instance
            .get_typed_func::<(), i64>(&mut store, "evaluate")
            .map_err(|e| ExecutionError::Fault(e.to_string()))?;

        let result = evaluate.call(&mut store, ());
        let consumed = self.fuel.saturating_sub(store.get_fuel().unwrap_or(0));

        match result {
            Ok(value) => Ok((value, consumed)),
            Err(error) => match store.data().exit_code {
                Some(code) => Ok((code, consumed)),
                None => Err(classify(store.data(), error, self.fuel)),
            },
        }
    }
}

fn classify(state: &SandboxState, error: anyhow::Error, fuel: u64) -> ExecutionError {
    if state.aborted() {
        return ExecutionError::Exhausted("evaluation aborted".to_string());
    }
    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => ExecutionError::Exhausted(format!("fuel budget of {} exhausted", fuel)),
        Some(trap) => ExecutionError::Fault(format!("guest trapped: {}", trap)),
        None => ExecutionError::Fault(error.root_cause().to_string()),
    }
}
