//! WebSocket transport listener (C7): an `actix-web` server upgrading to a
//! websocket session via `actix-ws`, feeding the same MQTT session loop raw
//! TCP connections use. Binary frames carry transparent MQTT packets; the
//! `mqtt` sub-protocol token is accepted but not required (spec §4.7).

use std::sync::Arc;

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::hooks::AdapterState;
use crate::session::{ConnMeta, Session};

type Server = mqtt_broker::MqttServerService<ConnMeta, Session, crate::error::AdapterError>;

/// Adapts an `actix-ws` session/message-stream pair to `AsyncRead`/
/// `AsyncWrite` so it can be driven through the same `MqttServerService::run`
/// raw-TCP connections use, without duplicating the dispatch loop.
///
/// Outbound bytes are handed to an unbounded channel drained by a task that
/// owns the real `actix_ws::Session` (mirrors the shape `mqtt-broker`'s own
/// `MqttSink` uses to decouple queuing a packet from the write actually
/// landing) — this keeps `poll_write` a synchronous, non-blocking queue push
/// instead of re-issuing `Session::binary`'s future on every poll.
struct WsIo {
    stream: actix_ws::MessageStream,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    read_buf: bytes::BytesMut,
}

impl AsyncRead for WsIo {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use futures_util::Stream;
        use std::task::Poll;

        if !self.read_buf.is_empty() {
            let n = self.read_buf.len().min(buf.remaining());
            let chunk = self.read_buf.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }

        loop {
            match std::pin::Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(actix_ws::Message::Binary(bytes)))) => {
                    self.read_buf.extend_from_slice(&bytes);
                    let n = self.read_buf.len().min(buf.remaining());
                    let chunk = self.read_buf.split_to(n);
                    buf.put_slice(&chunk);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(actix_ws::Message::Close(_))) | None) => {
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(_))) => {
                    return Poll::Ready(Err(std::io::ErrorKind::Other.into()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for WsIo {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match self.outbound.send(buf.to_vec()) {
            Ok(()) => std::task::Poll::Ready(Ok(buf.len())),
            Err(_) => std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

async fn upgrade(
    req: HttpRequest,
    body: web::Payload,
    server: web::Data<Server>,
) -> actix_web::Result<HttpResponse> {
    let (response, mut session, stream) = actix_ws::handle_with_protocols(&req, body, &["mqtt"])?;

    let peer = req
        .peer_addr()
        .unwrap_or_else(|| "0.0.0.0:0".parse().unwrap());

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    actix_web::rt::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if session.binary(bytes).await.is_err() {
                break;
            }
        }
        let _ = session.close(None).await;
    });

    let io = WsIo {
        stream,
        outbound: tx,
        read_buf: bytes::BytesMut::new(),
    };
    let server = server.get_ref().clone();

    actix_web::rt::spawn(async move {
        let _ = server.run(io, ConnMeta { peer }).await;
    });

    Ok(response)
}

pub async fn run(
    port: u16,
    state: Arc<AdapterState>,
    cancel: tokio_util::sync::CancellationToken,
) -> std::io::Result<()> {
    // `Server` (`MqttServerService`) holds `Rc`-based hooks and is therefore
    // `!Send`, so it cannot be built once and captured by the factory
    // closure below — `HttpServer` ships that closure to each worker's own
    // OS thread, which requires it to be `Send`. Only the `Send + Sync`
    // `Arc<AdapterState>` crosses that boundary; each worker builds its own
    // `Server` from it on first call.
    let http_server = HttpServer::new(move || {
        let server = build_server(state.clone());
        App::new()
            .app_data(web::Data::new(server))
            .route("/mqtt", web::get().to(upgrade))
    })
    .bind(("0.0.0.0", port))?
    .run();

    let handle = http_server.handle();
    actix_web::rt::spawn(async move {
        cancel.cancelled().await;
        log::info!("websocket listener shutting down");
        handle.stop(true).await;
    });

    http_server.await
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
