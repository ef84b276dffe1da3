// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wasmtime engine configuration and capability-scoped host imports.
//!
//! The engine is created once per executor with security-focused defaults.
//! The linker is built per evaluation from the connection's capability
//! context: a host import whose capability is not granted is never defined,
//! so a module that somehow references it fails to instantiate.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use wasmtime::{Caller, Config, Engine, Extern, Linker};

use crate::backends::local::paths::resolve_under_root;
use crate::backends::sandbox::compiler::{Builtin, HOST_MODULE};
use crate::backends::sandbox::error::{ExecutionError, ExecutionResult};
use crate::engine::capability::CapabilityContext;

/// Per-evaluation store data.
pub struct SandboxState {
    pub fs_root: PathBuf,
    pub abort: Arc<AtomicBool>,
    /// Set by the `exit` builtin; the guest is stopped right after.
    pub exit_code: Option<i64>,
}

impl SandboxState {
    pub fn new(fs_root: PathBuf, abort: Arc<AtomicBool>) -> Self {
        Self {
            fs_root,
            abort,
            exit_code: None,
        }
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

/// Creates the Wasmtime engine shared by every evaluation.
///
/// **Security configuration:**
/// - `consume_fuel(true)` - every instruction burns fuel from a fixed budget
/// - `epoch_interruption(true)` - lets the host stop a running guest
/// - Disabled features: threads, SIMD, relaxed SIMD, multi-memory, memory64,
///   component model
pub fn create_engine() -> ExecutionResult<Engine> {
    let mut config = Config::new();

    config.wasm_threads(false);
    config.wasm_simd(false);
    config.wasm_relaxed_simd(false);
    config.wasm_multi_memory(false);
    config.wasm_memory64(false);
    config.wasm_component_model(false);

    config.consume_fuel(true);
    config.epoch_interruption(true);

    Engine::new(&config).map_err(|e| ExecutionError::Engine(e.to_string()))
}

/// Build a linker exposing only the host imports `capabilities` grant.
pub fn build_linker(
    engine: &Engine,
    capabilities: &CapabilityContext,
) -> ExecutionResult<Linker<SandboxState>> {
    let mut linker = Linker::new(engine);

    for builtin in Builtin::ALL {
        let Some(capability) = builtin.required_capability() else {
            continue;
        };
        if !capabilities.allows(capability) {
            continue;
        }
        define_import(&mut linker, builtin)
            .map_err(|e| ExecutionError::Engine(format!("defining '{}': {}", builtin.name(), e)))?;
    }

    Ok(linker)
}

fn define_import(linker: &mut Linker<SandboxState>, builtin: Builtin) -> anyhow::Result<()> {
    match builtin {
        Builtin::SumTo => {}
        Builtin::FileLen => {
            linker.func_wrap(
                HOST_MODULE,
                builtin.name(),
                |mut caller: Caller<'_, SandboxState>, ptr: i32, len: i32| -> anyhow::Result<i64> {
                    refuse_if_aborted(&caller)?;
                    let path = read_guest_str(&mut caller, ptr, len)?;
                    let resolved = resolve_under_root(&caller.data().fs_root, &path)?;
                    let metadata = std::fs::metadata(&resolved)
                        .map_err(|e| anyhow!("file_len(\"{}\"): {}", path, e))?;
                    Ok(i64::try_from(metadata.len())?)
                },
            )?;
        }
        Builtin::AppendFile => {
            linker.func_wrap(
                HOST_MODULE,
                builtin.name(),
                |mut caller: Caller<'_, SandboxState>,
                 path_ptr: i32,
                 path_len: i32,
                 text_ptr: i32,
                 text_len: i32|
                 -> anyhow::Result<i64> {
                    refuse_if_aborted(&caller)?;
                    let path = read_guest_str(&mut caller, path_ptr, path_len)?;
                    let text = read_guest_str(&mut caller, text_ptr, text_len)?;
                    let resolved = resolve_under_root(&caller.data().fs_root, &path)?;
                    let mut file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&resolved)
                        .map_err(|e| anyhow!("append_file(\"{}\"): {}", path, e))?;
                    file.write_all(text.as_bytes())
                        .map_err(|e| anyhow!("append_file(\"{}\"): {}", path, e))?;
                    Ok(i64::try_from(text.len())?)
                },
            )?;
        }
        Builtin::Exit => {
            linker.func_wrap(
                HOST_MODULE,
                builtin.name(),
                |mut caller: Caller<'_, SandboxState>, code: i64| -> anyhow::Result<i64> {
                    refuse_if_aborted(&caller)?;
                    caller.data_mut().exit_code = Some(code);
                    bail!("exit({}) requested", code)
                },
            )?;
        }
    }
    Ok(())
}

fn refuse_if_aborted(caller: &Caller<'_, SandboxState>) -> anyhow::Result<()> {
    if caller.data().aborted() {
        bail!("evaluation aborted");
    }
    Ok(())
}

fn read_guest_str(caller: &mut Caller<'_, SandboxState>, ptr: i32, len: i32) -> anyhow::Result<String> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| anyhow!("guest exports no memory"))?;
    let start = usize::try_from(ptr)?;
    let end = start
        .checked_add(usize::try_from(len)?)
        .ok_or_else(|| anyhow!("string length overflows"))?;
    let bytes = memory
        .data(&*caller)
        .get(start..end)
        .ok_or_else(|| anyhow!("string at {}..{} is outside guest memory", start, end))?;
    Ok(std::str::from_utf8(bytes)?.to_string())
}
