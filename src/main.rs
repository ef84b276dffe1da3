// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use the_switchboard::config::{load_and_validate_config, RuntimeBuilder};
use the_switchboard::errors::InvokeError;
use the_switchboard::transport;

const EXIT_USAGE: u8 = 1;
const EXIT_REMOTE_ERROR: u8 = 2;
const EXIT_TIMEOUT: u8 = 3;
const EXIT_CLOSED: u8 = 4;

/// A parsed `invoke` command line
struct InvokeArgs {
    config: String,
    operation: String,
    payload: Value,
    timeout: Option<Duration>,
    target: Option<SocketAddr>,
}

fn usage(program: &str) {
    eprintln!("Usage: {} serve <config.yaml>", program);
    eprintln!("       {} invoke <config.yaml> <operation> [payload-json] [--timeout-ms N] [--target host:port]", program);
    eprintln!("Example: {} invoke switchboard.yaml eval '\"1 + 2\"'", program);
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("switchboard");

    let outcome = match args.get(1).map(String::as_str) {
        Some("serve") if args.len() == 3 => serve(&args[2]).await.map(|_| ExitCode::SUCCESS),
        Some("invoke") => match parse_invoke_args(&args[2..]) {
            Ok(invoke_args) => invoke(invoke_args).await,
            Err(e) => {
                eprintln!("{}", e);
                usage(program);
                return ExitCode::from(EXIT_USAGE);
            }
        },
        _ => {
            usage(program);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    outcome.unwrap_or_else(|e| {
        eprintln!("{:#}", e);
        ExitCode::from(EXIT_USAGE)
    })
}

fn parse_invoke_args(args: &[String]) -> anyhow::Result<InvokeArgs> {
    let mut positional = Vec::new();
    let mut timeout = None;
    let mut target = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--timeout-ms" => {
                let value = iter.next().context("--timeout-ms needs a value")?;
                let ms: u64 = value.parse().with_context(|| format!("invalid --timeout-ms '{}'", value))?;
                timeout = Some(Duration::from_millis(ms));
            }
            "--target" => {
                let value = iter.next().context("--target needs a value")?;
                target = Some(value.parse().with_context(|| format!("invalid --target '{}'", value))?);
            }
            _ => positional.push(arg.clone()),
        }
    }

    let (config, operation, payload) = match positional.as_slice() {
        [config, operation] => (config.clone(), operation.clone(), Value::Null),
        [config, operation, payload] => {
            let payload = serde_json::from_str(payload)
                .with_context(|| format!("payload is not valid json: {}", payload))?;
            (config.clone(), operation.clone(), payload)
        }
        _ => bail!("invoke expects <config.yaml> <operation> [payload-json]"),
    };

    Ok(InvokeArgs {
        config,
        operation,
        payload,
        timeout,
        target,
    })
}

async fn serve(config_file: &str) -> anyhow::Result<()> {
    let config = load_and_validate_config(config_file)
        .with_context(|| format!("loading {}", config_file))?;
    let runtime = RuntimeBuilder::from_config(&config)?;

    let listener = TcpListener::bind(runtime.listen)
        .await
        .with_context(|| format!("binding {}", runtime.listen))?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    transport::serve(listener, runtime, shutdown).await?;
    Ok(())
}

async fn invoke(args: InvokeArgs) -> anyhow::Result<ExitCode> {
    let config = load_and_validate_config(&args.config)
        .with_context(|| format!("loading {}", args.config))?;
    let runtime = RuntimeBuilder::from_config(&config)?;
    let address = args.target.unwrap_or(runtime.listen);

    let connection = match transport::connect(address, &runtime).await {
        Ok(connection) => connection,
        Err(e) => {
            eprintln!("transport: connecting to {}: {}", address, e);
            return Ok(ExitCode::from(EXIT_CLOSED));
        }
    };

    let timeout = args.timeout.unwrap_or(runtime.options.default_timeout);
    let result = connection.invoke(args.operation, args.payload, timeout).await;
    connection.close().await;

    Ok(match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            ExitCode::SUCCESS
        }
        Err(InvokeError::Remote(error)) => {
            eprintln!("{}: {}", error.category, error.message);
            ExitCode::from(EXIT_REMOTE_ERROR)
        }
        Err(e @ (InvokeError::Timeout { .. } | InvokeError::RemoteTimeout { .. })) => {
            eprintln!("timeout: {}", e);
            ExitCode::from(EXIT_TIMEOUT)
        }
        Err(e) => {
            eprintln!("transport: {}", e);
            ExitCode::from(EXIT_CLOSED)
        }
    })
}
