use std::num::NonZeroU16;

use bytes::Bytes;

use crate::dispatcher::MqttState;
use crate::sink::MqttSink;

/// Publish message, passed to the publish hook for every inbound PUBLISH packet
pub struct Publish<S> {
    publish: mqtt_codec::Publish,
    sink: MqttSink,
    state: MqttState<S>,
}

impl<S> Publish<S> {
    pub(crate) fn new(state: MqttState<S>, publish: mqtt_codec::Publish) -> Self {
        let sink = state.sink().clone();
        Self {
            sink,
            publish,
            state,
        }
    }

    #[inline]
    /// this might be re-delivery of an earlier attempt to send the Packet.
    pub fn dup(&self) -> bool {
        self.publish.dup
    }

    #[inline]
    pub fn retain(&self) -> bool {
        self.publish.retain
    }

    #[inline]
    /// the level of assurance for delivery of an Application Message.
    pub fn qos(&self) -> mqtt_codec::QoS {
        self.publish.qos
    }

    #[inline]
    /// the information channel to which payload data is published.
    pub fn publish_topic(&self) -> &str {
        &self.publish.topic
    }

    #[inline]
    /// returns reference to a connection session
    pub fn session(&self) -> &S {
        self.state.session()
    }

    #[inline]
    /// returns mutable reference to a connection session
    pub fn session_mut(&mut self) -> &mut S {
        self.state.session_mut()
    }

    #[inline]
    /// only present in PUBLISH Packets where the QoS level is 1 or 2.
    pub fn id(&self) -> Option<NonZeroU16> {
        self.publish.packet_id
    }

    #[inline]
    pub fn packet(&self) -> &mqtt_codec::Publish {
        &self.publish
    }

    #[inline]
    /// the Application Message that is being published.
    pub fn payload(&self) -> &Bytes {
        &self.publish.payload
    }

    /// Extract Bytes from packet payload
    pub fn take_payload(&self) -> Bytes {
        self.publish.payload.clone()
    }

    #[inline]
    /// Mqtt client sink object
    pub fn sink(&self) -> &MqttSink {
        &self.sink
    }
}

impl<S> std::fmt::Debug for Publish<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.publish.fmt(f)
    }
}
