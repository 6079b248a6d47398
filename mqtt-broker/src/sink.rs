use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU16;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use bytestring::ByteString;
use tokio::sync::{mpsc, oneshot};

use crate::cell::Cell;

/// Handle to a connected MQTT client's outbound packet stream.
///
/// Cloning a `MqttSink` is cheap; all clones refer to the same connection and
/// share the same QoS1 in-flight tracking.
#[derive(Clone)]
pub struct MqttSink {
    tx: mpsc::UnboundedSender<mqtt_codec::Packet>,
    closed: Arc<AtomicBool>,
    inner: Cell<MqttSinkInner>,
}

#[derive(Default)]
struct MqttSinkInner {
    idx: u16,
    queue: VecDeque<(u16, oneshot::Sender<()>)>,
}

impl MqttSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<mqtt_codec::Packet>) -> Self {
        MqttSink {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            inner: Cell::new(MqttSinkInner::default()),
        }
    }

    /// Mark the connection for closing. The dispatch loop observes this on
    /// its next iteration and tears the connection down.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn send(&self, packet: mqtt_codec::Packet) {
        if self.tx.send(packet).is_err() {
            log::trace!("Failed to queue packet, connection is gone");
        }
    }

    /// Send publish packet with qos set to 0
    pub fn publish_qos0(&self, topic: ByteString, payload: Bytes, dup: bool) {
        log::trace!("Publish (QoS0) to {:?}", topic);
        let publish = mqtt_codec::Publish {
            topic,
            payload,
            dup,
            retain: false,
            qos: mqtt_codec::QoS::AtMostOnce,
            packet_id: None,
        };
        self.send(mqtt_codec::Packet::Publish(publish));
    }

    /// Send publish packet with qos set to 1, resolving once the peer PUBACKs it.
    pub async fn publish_qos1(
        &self,
        topic: ByteString,
        payload: Bytes,
        dup: bool,
    ) -> Result<(), ()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        let inner = self.inner.get_mut();
        inner.idx = inner.idx.wrapping_add(1);
        if inner.idx == 0 {
            inner.idx = 1
        }
        inner.queue.push_back((inner.idx, ack_tx));

        let publish = mqtt_codec::Packet::Publish(mqtt_codec::Publish {
            topic,
            payload,
            dup,
            retain: false,
            qos: mqtt_codec::QoS::AtLeastOnce,
            packet_id: NonZeroU16::new(inner.idx),
        });
        log::trace!("Publish (QoS1) to {:#?}", publish);

        self.send(publish);
        ack_rx.await.map_err(|_| ())
    }

    pub(crate) fn complete_publish_qos1(&self, packet_id: NonZeroU16) {
        if let Some((idx, tx)) = self.inner.get_mut().queue.pop_front() {
            if idx != packet_id.get() {
                log::trace!(
                    "MQTT protocol error, packet_id order does not match, expected {}, got: {}",
                    idx,
                    packet_id
                );
                self.close();
            } else {
                log::trace!("Ack publish packet with id: {}", packet_id);
                let _ = tx.send(());
            }
        } else {
            log::trace!("Unexpected PublishAck packet");
            self.close();
        }
    }
}

impl fmt::Debug for MqttSink {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("MqttSink").finish()
    }
}
