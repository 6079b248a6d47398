use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, Interval};
use tokio_util::codec::Framed;

use crate::connect::{Connect, ConnectAck};
use crate::default::{subs_not_implemented, unsubs_not_implemented};
use crate::dispatcher::{Dispatcher, MqttState};
use crate::error::MqttError;
use crate::publish::Publish;
use crate::sink::MqttSink;
use crate::subs::{Subscribe, SubscribeResult, Unsubscribe};

type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

type ConnectHook<Meta, St, E> =
    Rc<dyn Fn(Connect<Meta>) -> LocalBoxFuture<'static, Result<ConnectAck<Meta, St>, MqttError<E>>>>;
type PublishHook<St, E> =
    Rc<dyn Fn(Publish<St>) -> LocalBoxFuture<'static, Result<bool, MqttError<E>>>>;
type SubscribeHook<St, E> =
    Rc<dyn Fn(Subscribe<St>) -> LocalBoxFuture<'static, Result<SubscribeResult, MqttError<E>>>>;
type UnsubscribeHook<St, E> =
    Rc<dyn Fn(Unsubscribe<St>) -> LocalBoxFuture<'static, Result<(), MqttError<E>>>>;
type DisconnectHook<St> = Rc<dyn Fn(St, bool)>;

/// Awaits the next tick of `ticker`, or never resolves if keep-alive is
/// disabled (`ticker` is `None`).
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn box_hook<F, Fut, Req, Res, Err>(
    f: F,
) -> Rc<dyn Fn(Req) -> LocalBoxFuture<'static, Result<Res, Err>>>
where
    F: Fn(Req) -> Fut + 'static,
    Fut: Future<Output = Result<Res, Err>> + 'static,
{
    Rc::new(move |req| Box::pin(f(req)) as LocalBoxFuture<'static, Result<Res, Err>>)
}

/// Builder for a per-connection MQTT v3.1.1 session handler.
///
/// `Meta` is whatever connection metadata the connect hook needs to see
/// (typically the peer's `SocketAddr`, or `()` if none is needed) — the
/// session loop itself always owns the real transport via `Framed`, so
/// `Meta` does not need to be the transport type.
///
/// Mirrors the shape of a request router: register hooks for `CONNECT`,
/// `SUBSCRIBE`, `UNSUBSCRIBE`, disconnect and (via `finish`) `PUBLISH`, then
/// call [`MqttServerService::run`] once per accepted transport connection.
pub struct MqttServer<Meta, St, E> {
    connect: ConnectHook<Meta, St, E>,
    subscribe: SubscribeHook<St, E>,
    unsubscribe: UnsubscribeHook<St, E>,
    disconnect: DisconnectHook<St>,
    max_size: usize,
    inflight: usize,
    handshake_timeout: Duration,
}

impl<Meta, St, E> MqttServer<Meta, St, E>
where
    Meta: 'static,
    St: Clone + 'static,
    E: 'static,
{
    /// Create server factory and provide connect hook
    pub fn new<F, Fut>(connect: F) -> Self
    where
        F: Fn(Connect<Meta>) -> Fut + 'static,
        Fut: Future<Output = Result<ConnectAck<Meta, St>, MqttError<E>>> + 'static,
    {
        MqttServer {
            connect: box_hook(connect),
            subscribe: box_hook(subs_not_implemented),
            unsubscribe: box_hook(unsubs_not_implemented),
            disconnect: Rc::new(|_, _| {}),
            max_size: 0,
            inflight: 15,
            handshake_timeout: Duration::from_secs(0),
        }
    }

    /// Set handshake timeout.
    ///
    /// Handshake includes the `CONNECT` packet and the `CONNACK` response.
    /// By default handshake timeout is disabled (zero means no timeout).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set max inbound frame size.
    ///
    /// If max size is set to `0`, size is unlimited. By default max size is
    /// set to `0`.
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Number of in-flight concurrent PUBLISH packets accepted before
    /// backpressuring the connection's read loop.
    ///
    /// Defaults to 15.
    pub fn inflight(mut self, val: usize) -> Self {
        self.inflight = val;
        self
    }

    /// Hook to execute for every SUBSCRIBE packet
    pub fn subscribe<F, Fut>(mut self, subscribe: F) -> Self
    where
        F: Fn(Subscribe<St>) -> Fut + 'static,
        Fut: Future<Output = Result<SubscribeResult, MqttError<E>>> + 'static,
    {
        self.subscribe = box_hook(subscribe);
        self
    }

    /// Hook to execute for every UNSUBSCRIBE packet
    pub fn unsubscribe<F, Fut>(mut self, unsubscribe: F) -> Self
    where
        F: Fn(Unsubscribe<St>) -> Fut + 'static,
        Fut: Future<Output = Result<(), MqttError<E>>> + 'static,
    {
        self.unsubscribe = box_hook(unsubscribe);
        self
    }

    /// Callback to execute on disconnect
    ///
    /// Second parameter indicates that the session ended due to an error
    /// rather than a clean DISCONNECT.
    pub fn disconnect<F>(mut self, disconnect: F) -> Self
    where
        F: Fn(St, bool) + 'static,
    {
        self.disconnect = Rc::new(disconnect);
        self
    }

    /// Finalize the server with a PUBLISH hook, ready to drive connections.
    ///
    /// The hook resolves to `Ok(true)` to accept the packet (a PUBACK is
    /// sent for QoS >= 1), `Ok(false)` to silently reject it (no PUBACK,
    /// connection stays open — the shape authorization failures need, see
    /// `authorize_publish`), or `Err` for a protocol-level failure that
    /// should tear the connection down.
    pub fn finish<F, Fut>(self, publish: F) -> MqttServerService<Meta, St, E>
    where
        F: Fn(Publish<St>) -> Fut + 'static,
        Fut: Future<Output = Result<bool, MqttError<E>>> + 'static,
    {
        MqttServerService {
            connect: self.connect,
            publish: box_hook(publish),
            subscribe: self.subscribe,
            unsubscribe: self.unsubscribe,
            disconnect: self.disconnect,
            max_size: self.max_size,
            inflight: self.inflight,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

/// A fully configured server, ready to drive one connection at a time via
/// [`MqttServerService::run`]. Cheap to clone; every accepted connection gets
/// its own `run` call sharing the same hook set.
pub struct MqttServerService<Meta, St, E> {
    connect: ConnectHook<Meta, St, E>,
    publish: PublishHook<St, E>,
    subscribe: SubscribeHook<St, E>,
    unsubscribe: UnsubscribeHook<St, E>,
    disconnect: DisconnectHook<St>,
    max_size: usize,
    inflight: usize,
    handshake_timeout: Duration,
}

impl<Meta, St, E> Clone for MqttServerService<Meta, St, E> {
    fn clone(&self) -> Self {
        Self {
            connect: self.connect.clone(),
            publish: self.publish.clone(),
            subscribe: self.subscribe.clone(),
            unsubscribe: self.unsubscribe.clone(),
            disconnect: self.disconnect.clone(),
            max_size: self.max_size,
            inflight: self.inflight,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

impl<Meta, St, E> MqttServerService<Meta, St, E>
where
    Meta: 'static,
    St: Clone + 'static,
    E: 'static,
{
    /// Run the handshake and session dispatch loop for one accepted
    /// connection to completion. Intended to be spawned (e.g. via
    /// `tokio::task::spawn_local`, since hooks are `!Send`) by the transport
    /// listener for each newly accepted socket. `meta` is handed to the
    /// connect hook as connection-scoped context (peer address, TLS info, …).
    pub async fn run<Io>(&self, io: Io, meta: Meta) -> Result<(), MqttError<E>>
    where
        Io: AsyncRead + AsyncWrite + Unpin + 'static,
    {
        let mut framed = Framed::new(io, mqtt_codec::Codec::new().max_size(self.max_size));

        let handshake = async {
            let packet = framed
                .next()
                .await
                .ok_or(MqttError::Disconnected)
                .and_then(|res| res.map_err(MqttError::Protocol))?;

            match packet {
                mqtt_codec::Packet::Connect(connect) => Ok(connect),
                packet => {
                    log::info!(
                        "MQTT-3.1.0-1: Expected CONNECT packet, received {}",
                        packet.packet_type()
                    );
                    Err(MqttError::Unexpected(
                        packet,
                        "MQTT-3.1.0-1: Expected CONNECT packet",
                    ))
                }
            }
        };

        let connect = if self.handshake_timeout.is_zero() {
            handshake.await?
        } else {
            timeout(self.handshake_timeout, handshake)
                .await
                .map_err(|_| MqttError::HandshakeTimeout)??
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = MqttSink::new(tx);

        log::trace!("Dispatch packet: {:#?}", connect);
        let ack = (self.connect)(Connect::new(connect, meta, sink.clone(), self.inflight)).await?;

        let (session, keep_alive) = match ack.session {
            Some(session) => {
                framed
                    .send(mqtt_codec::Packet::ConnectAck {
                        session_present: ack.session_present,
                        return_code: mqtt_codec::ConnectCode::ConnectionAccepted,
                    })
                    .await
                    .map_err(MqttError::Protocol)?;
                (session, ack.keep_alive)
            }
            None => {
                framed
                    .send(mqtt_codec::Packet::ConnectAck {
                        session_present: false,
                        return_code: ack.return_code,
                    })
                    .await
                    .map_err(MqttError::Protocol)?;
                return Err(MqttError::Disconnected);
            }
        };

        let state = MqttState::new(session.clone(), sink.clone());
        let mut dispatcher = Dispatcher::new(
            state,
            self.publish.clone(),
            self.subscribe.clone(),
            self.unsubscribe.clone(),
            self.inflight,
        );

        // A negotiated keep-alive of 0 disables the keep-alive mechanism
        // entirely (MQTT-3.1.2-22); `tokio::time::interval` panics on a
        // zero period, so skip building a ticker altogether in that case.
        // Otherwise the effective idle timeout is 1.5x the negotiated
        // keep-alive (spec: close if no packet arrives within 1.5x).
        let mut ticker = if keep_alive.is_zero() {
            None
        } else {
            let mut t = interval(keep_alive.mul_f32(1.5));
            t.tick().await;
            Some(t)
        };
        let mut missed_ticks = 0u32;

        let result = loop {
            tokio::select! {
                biased;

                reply = dispatcher.poll_reply(), if !dispatcher.is_full() => {
                    match reply {
                        Some(Ok(Some(packet))) => {
                            if framed.send(packet).await.is_err() {
                                break Err(MqttError::Disconnected);
                            }
                        }
                        Some(Ok(None)) | None => {}
                        Some(Err(e)) => break Err(e),
                    }
                }

                packet = framed.next() => {
                    match packet {
                        Some(Ok(packet)) => {
                            missed_ticks = 0;
                            let is_disconnect = matches!(packet, mqtt_codec::Packet::Disconnect);
                            match dispatcher.dispatch(packet).await {
                                Ok(Some(reply)) => {
                                    if framed.send(reply).await.is_err() {
                                        break Err(MqttError::Disconnected);
                                    }
                                }
                                Ok(None) => {
                                    if is_disconnect {
                                        break Ok(());
                                    }
                                }
                                Err(e) => break Err(e),
                            }
                        }
                        Some(Err(e)) => break Err(MqttError::Protocol(e)),
                        None => break Ok(()),
                    }
                }

                queued = rx.recv() => {
                    match queued {
                        Some(packet) => {
                            if framed.send(packet).await.is_err() {
                                break Err(MqttError::Disconnected);
                            }
                        }
                        None => break Ok(()),
                    }
                }

                _ = tick(&mut ticker) => {
                    missed_ticks += 1;
                    if missed_ticks >= 1 {
                        break Err(MqttError::KeepAliveTimeout);
                    }
                }
            }

            if sink.is_closed() {
                break Ok(());
            }
        };

        let had_error = result.is_err();
        (self.disconnect)(session, had_error);
        result
    }
}
