// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! TCP glue: every accepted socket becomes one `Connection`.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::config::Runtime;
use crate::engine::connection::{Connection, ConnectionOptions};
use crate::observability::messages::connection::{AcceptFailed, Listening, PeerAccepted};
use crate::observability::messages::StructuredLog;

fn options_for(runtime: &Runtime, peer: SocketAddr) -> ConnectionOptions {
    ConnectionOptions {
        peer: peer.to_string(),
        ..runtime.options.clone()
    }
}

/// Accept peers until `shutdown` fires, serving each on its own connection.
///
/// Open connections are closed when `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    runtime: Runtime,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    Listening {
        address: &listener.local_addr()?.to_string(),
        operations: runtime.table.len(),
        capabilities: &runtime.capabilities.to_string(),
    }
    .log();

    let mut consecutive_failures = 0;
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => {
                consecutive_failures = 0;
                accepted
            }
            Err(error) => {
                AcceptFailed { error: &error }.log();
                consecutive_failures += 1;
                // Errors like EMFILE persist until something else closes.
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(accept_backoff(consecutive_failures)) => {}
                }
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        PeerAccepted {
            peer: &peer.to_string(),
        }
        .log();

        let connection = Connection::open(
            stream,
            runtime.table.clone(),
            runtime.capabilities.clone(),
            options_for(&runtime, peer),
        );
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = connection.closed() => {}
                _ = shutdown.cancelled() => {}
            }
            connection.close().await;
        });
    }
}

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause after the `failures`-th consecutive accept error: doubles from
/// `ACCEPT_BACKOFF_MIN` up to `ACCEPT_BACKOFF_MAX`.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// Dial a peer and open a connection to it.
///
/// The local side serves the runtime's table under its capabilities, so the
/// remote peer can call back over the same channel.
pub async fn connect(address: SocketAddr, runtime: &Runtime) -> std::io::Result<Connection> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    Ok(Connection::open(
        stream,
        runtime.table.clone(),
        runtime.capabilities.clone(),
        options_for(runtime, address),
    ))
}
