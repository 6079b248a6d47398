use std::rc::Rc;

use futures_util::stream::FuturesOrdered;
use futures_util::StreamExt;

use crate::cell::Cell;
use crate::error::MqttError;
use crate::publish::Publish;
use crate::sink::MqttSink;
use crate::subs::{Subscribe, SubscribeResult, Unsubscribe};

/// Per-connection session handle shared between the dispatch loop and the
/// `Publish`/`Subscribe`/`Unsubscribe` hook arguments.
pub(crate) struct MqttState<St> {
    inner: Cell<MqttStateInner<St>>,
}

struct MqttStateInner<St> {
    st: St,
    sink: MqttSink,
}

impl<St> Clone for MqttState<St> {
    fn clone(&self) -> Self {
        MqttState {
            inner: self.inner.clone(),
        }
    }
}

impl<St> MqttState<St> {
    pub(crate) fn new(st: St, sink: MqttSink) -> Self {
        MqttState {
            inner: Cell::new(MqttStateInner { st, sink }),
        }
    }

    pub(crate) fn sink(&self) -> &MqttSink {
        &self.inner.get_ref().sink
    }

    pub(crate) fn session(&self) -> &St {
        &self.inner.get_ref().st
    }

    pub(crate) fn session_mut(&mut self) -> &mut St {
        &mut self.inner.get_mut().st
    }
}

type LocalBoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + 'a>>;

pub(crate) type PublishHook<St, E> =
    Rc<dyn Fn(Publish<St>) -> LocalBoxFuture<'static, Result<bool, MqttError<E>>>>;
pub(crate) type SubscribeHook<St, E> =
    Rc<dyn Fn(Subscribe<St>) -> LocalBoxFuture<'static, Result<SubscribeResult, MqttError<E>>>>;
pub(crate) type UnsubscribeHook<St, E> =
    Rc<dyn Fn(Unsubscribe<St>) -> LocalBoxFuture<'static, Result<(), MqttError<E>>>>;

/// Drives application hooks for inbound PUBLISH/SUBSCRIBE/UNSUBSCRIBE packets.
///
/// PUBLISH handling is bounded by `inflight` concurrently in-flight calls into
/// the publish hook; completions are re-ordered back into submission order
/// before their PUBACKs are written, honoring the MQTT requirement that
/// acknowledgements are not reordered on the wire.
pub(crate) struct Dispatcher<St, E> {
    state: MqttState<St>,
    publish: PublishHook<St, E>,
    subscribe: SubscribeHook<St, E>,
    unsubscribe: UnsubscribeHook<St, E>,
    inflight: usize,
    pending: FuturesOrdered<LocalBoxFuture<'static, Result<Option<mqtt_codec::Packet>, MqttError<E>>>>,
}

impl<St, E> Dispatcher<St, E>
where
    St: Clone + 'static,
    E: 'static,
{
    pub(crate) fn new(
        state: MqttState<St>,
        publish: PublishHook<St, E>,
        subscribe: SubscribeHook<St, E>,
        unsubscribe: UnsubscribeHook<St, E>,
        inflight: usize,
    ) -> Self {
        Self {
            state,
            publish,
            subscribe,
            unsubscribe,
            inflight: inflight.max(1),
            pending: FuturesOrdered::new(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.pending.len() >= self.inflight
    }

    /// Feed one inbound packet into the dispatcher. Packets that need an
    /// immediate reply (PING, DISCONNECT, UNSUBSCRIBE, PUBLISH with QoS 0)
    /// return `Ok(Some(_))`/`Ok(None)` directly; PUBLISH/SUBSCRIBE with an
    /// application hook are queued and drained via `poll_reply`.
    pub(crate) async fn dispatch(
        &mut self,
        packet: mqtt_codec::Packet,
    ) -> Result<Option<mqtt_codec::Packet>, MqttError<E>> {
        log::trace!("Dispatch packet: {:#?}", packet);
        match packet {
            mqtt_codec::Packet::PingRequest => Ok(Some(mqtt_codec::Packet::PingResponse)),
            mqtt_codec::Packet::Disconnect => Ok(None),
            mqtt_codec::Packet::PublishAck { packet_id } => {
                self.state.sink().complete_publish_qos1(packet_id);
                Ok(None)
            }
            mqtt_codec::Packet::Publish(publish) => {
                let packet_id = publish.packet_id;
                let hook = self.publish.clone();
                let req = Publish::new(self.state.clone(), publish);
                self.pending.push_back(Box::pin(async move {
                    let accepted = hook(req).await?;
                    if !accepted {
                        return Ok(None);
                    }
                    Ok(packet_id.map(|packet_id| mqtt_codec::Packet::PublishAck { packet_id }))
                }));
                Ok(None)
            }
            mqtt_codec::Packet::Subscribe {
                packet_id,
                topic_filters,
            } => {
                let hook = self.subscribe.clone();
                let req = Subscribe::new(self.state.clone(), topic_filters);
                self.pending.push_back(Box::pin(async move {
                    let result = hook(req).await?;
                    Ok(Some(mqtt_codec::Packet::SubscribeAck {
                        packet_id,
                        status: result.codes,
                    }))
                }));
                Ok(None)
            }
            mqtt_codec::Packet::Unsubscribe {
                packet_id,
                topic_filters,
            } => {
                let hook = self.unsubscribe.clone();
                let req = Unsubscribe::new(self.state.clone(), topic_filters);
                self.pending.push_back(Box::pin(async move {
                    hook(req).await?;
                    Ok(Some(mqtt_codec::Packet::UnsubscribeAck { packet_id }))
                }));
                Ok(None)
            }
            other => {
                log::trace!("Ignoring unexpected packet in established session: {:?}", other);
                Ok(None)
            }
        }
    }

    /// Await the next completed application hook, in submission order.
    pub(crate) async fn poll_reply(
        &mut self,
    ) -> Option<Result<Option<mqtt_codec::Packet>, MqttError<E>>> {
        self.pending.next().await
    }
}
