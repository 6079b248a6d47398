//! Raw TCP transport listener (C7): the other half of the dual MQTT
//! transport, a plain `tokio::net::TcpListener` feeding accepted sockets
//! straight into the shared session loop (spec §4.7). Every accepted
//! connection gets its own `spawn_local` task since the broker's hooks are
//! `!Send`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::hooks::AdapterState;
use crate::session::{ConnMeta, Session};

type Server = mqtt_broker::MqttServerService<ConnMeta, Session, crate::error::AdapterError>;

pub async fn run(
    port: u16,
    state: Arc<AdapterState>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("raw MQTT listener bound on 0.0.0.0:{port}");

    let server = build_server(state);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("raw MQTT listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (io, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        log::warn!("failed to accept TCP connection: {err}");
                        continue;
                    }
                };
                let server = server.clone();
                tokio::task::spawn_local(async move {
                    if let Err(err) = server.run(io, ConnMeta { peer }).await {
                        log::debug!("connection from {peer} ended: {err}");
                    }
                });
            }
        }
    }
}

// `CONCURRENCY` (spec §5/§6) is enforced instance-wide by `state.concurrency`
// (a shared `tokio::sync::Semaphore`, acquired once per inbound packet in
// each hook — see `hooks.rs`), not by the broker's own per-connection
// `inflight` backpressure knob, which is left at its library default here.
fn build_server(state: Arc<AdapterState>) -> Server {
    let connect_state = state.clone();
    let publish_state = state.clone();
    let subscribe_state = state.clone();
    let disconnect_state = state.clone();

    mqtt_broker::MqttServer::new(move |c| {
        let state = connect_state.clone();
        async move { crate::hooks::authenticate(c, state).await }
    })
    .subscribe(move |s| {
        let state = subscribe_state.clone();
        async move { crate::hooks::authorize_subscribe(s, state).await }
    })
    .disconnect(move |session, had_error| {
        crate::hooks::on_disconnect(session, had_error, disconnect_state.clone())
    })
    .finish(move |p| {
        let state = publish_state.clone();
        async move { crate::hooks::authorize_publish(p, state).await }
    })
}
