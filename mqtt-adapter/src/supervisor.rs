//! Process supervisor (C10): brings collaborators up in dependency order,
//! runs the transport listeners and bus bridge side by side, and drives a
//! bounded graceful shutdown on SIGINT/SIGTERM (spec §4.10).
//!
//! Start order mirrors the dependency graph: shared state (C5) before the
//! auth client matters less than the transports, so the binding choice here
//! is auth (C3) before the bus bridge (C8) before the transport listeners
//! (C7) — nothing accepts a client connection until everything it would
//! need to serve one is already live.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::emitter::RedisEmitter;
use crate::hooks::AdapterState;

pub struct Ports {
    pub mqtt: u16,
    pub ws: u16,
}

/// Bring up the bus bridge and both transport listeners, then wait for a
/// shutdown signal and drain everything within `shutdown_grace` (spec
/// §4.10). `mqtt-broker`'s hooks and `actix-ws`'s session type are `!Send`,
/// so every task this spawns uses `spawn_local` — the caller is expected to
/// already be running inside a `LocalSet`-enabled context (the arbiter
/// `actix_web::main` provides one, which is why `main` is entered that way
/// rather than via a second, independently-nested `LocalSet`).
pub async fn run(
    state: Arc<AdapterState>,
    emitter: Arc<RedisEmitter>,
    bus: async_nats::Client,
    ports: Ports,
    shutdown_grace: Duration,
) -> std::io::Result<()> {
    let cancel = CancellationToken::new();

    let emitter_cancel = cancel.child_token();
    let bridge_cancel = cancel.child_token();
    let tcp_cancel = cancel.child_token();
    let ws_cancel = cancel.child_token();

    let emitter_task = tokio::task::spawn_local(emitter.clone().run(emitter_cancel));

    let bridge_task = tokio::task::spawn_local({
        let bus = bus.clone();
        let emitter = emitter as Arc<dyn crate::emitter::Emitter>;
        let grace = shutdown_grace;
        async move { crate::bridge::run(bus, emitter, bridge_cancel, grace).await }
    });

    let tcp_task = tokio::task::spawn_local({
        let state = state.clone();
        async move { crate::tcp::run(ports.mqtt, state, tcp_cancel).await }
    });

    let ws_task = tokio::task::spawn_local({
        let state = state.clone();
        async move { crate::ws::run(ports.ws, state, ws_cancel).await }
    });

    log::info!(
        "mqtt-adapter listening: raw tcp :{}, websocket :{}",
        ports.mqtt,
        ports.ws
    );

    wait_for_shutdown_signal().await;
    log::info!("shutdown signal received, draining connections");
    cancel.cancel();

    let drain = async {
        let _ = tokio::join!(emitter_task, bridge_task, tcp_task, ws_task);
    };

    if tokio::time::timeout(shutdown_grace, drain).await.is_err() {
        log::error!(
            "shutdown grace period of {shutdown_grace:?} elapsed with tasks still running, exiting"
        );
        std::process::exit(1);
    }

    log::info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            log::warn!("failed to install SIGTERM handler: {err}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
