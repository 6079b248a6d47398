use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use crate::sink::MqttSink;

/// Connect message, passed to the connect hook before a session is accepted.
///
/// `Meta` carries whatever connection-scoped context the caller passed to
/// [`crate::MqttServerService::run`] (a peer `SocketAddr`, TLS peer identity,
/// `()` if nothing is needed, ...). It is not the transport itself — by the
/// time the CONNECT packet has been parsed the transport is already owned by
/// the session's `Framed` and stays there for the lifetime of the connection.
pub struct Connect<Meta> {
    connect: mqtt_codec::Connect,
    sink: MqttSink,
    keep_alive: Duration,
    inflight: usize,
    meta: Meta,
}

impl<Meta> Connect<Meta> {
    pub(crate) fn new(
        connect: mqtt_codec::Connect,
        meta: Meta,
        sink: MqttSink,
        inflight: usize,
    ) -> Self {
        Self {
            keep_alive: Duration::from_secs(connect.keep_alive as u64),
            connect,
            meta,
            sink,
            inflight,
        }
    }

    /// Returns reference to the connection metadata passed to `run`
    pub fn get_ref(&self) -> &Meta {
        &self.meta
    }

    /// Returns mutable reference to the connection metadata
    pub fn get_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    /// Returns mqtt server sink
    pub fn sink(&self) -> &MqttSink {
        &self.sink
    }

    /// Ack connect message and set session state
    pub fn ack<St>(self, st: St, session_present: bool) -> ConnectAck<Meta, St> {
        ConnectAck::new(self.meta, st, session_present, self.keep_alive, self.inflight)
    }

    /// Create connect ack object with `identifier rejected` return code
    pub fn identifier_rejected<St>(self) -> ConnectAck<Meta, St> {
        ConnectAck {
            meta: self.meta,
            session: None,
            session_present: false,
            return_code: mqtt_codec::ConnectCode::IdentifierRejected,
            keep_alive: Duration::from_secs(5),
            inflight: 15,
        }
    }

    /// Create connect ack object with `bad user name or password` return code
    pub fn bad_username_or_pwd<St>(self) -> ConnectAck<Meta, St> {
        ConnectAck {
            meta: self.meta,
            session: None,
            session_present: false,
            return_code: mqtt_codec::ConnectCode::BadUserNameOrPassword,
            keep_alive: Duration::from_secs(5),
            inflight: 15,
        }
    }

    /// Create connect ack object with `not authorized` return code
    pub fn not_authorized<St>(self) -> ConnectAck<Meta, St> {
        ConnectAck {
            meta: self.meta,
            session: None,
            session_present: false,
            return_code: mqtt_codec::ConnectCode::NotAuthorized,
            keep_alive: Duration::from_secs(5),
            inflight: 15,
        }
    }

    /// Create connect ack object with `service unavailable` return code
    pub fn service_unavailable<St>(self) -> ConnectAck<Meta, St> {
        ConnectAck {
            meta: self.meta,
            session: None,
            session_present: false,
            return_code: mqtt_codec::ConnectCode::ServiceUnavailable,
            keep_alive: Duration::from_secs(5),
            inflight: 15,
        }
    }
}

impl<Meta> Deref for Connect<Meta> {
    type Target = mqtt_codec::Connect;

    fn deref(&self) -> &Self::Target {
        &self.connect
    }
}

impl<T> fmt::Debug for Connect<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.connect.fmt(f)
    }
}

/// Ack connect message, returned by the connect hook
pub struct ConnectAck<Meta, St> {
    pub(crate) meta: Meta,
    pub(crate) session: Option<St>,
    pub(crate) session_present: bool,
    pub(crate) return_code: mqtt_codec::ConnectCode,
    pub(crate) keep_alive: Duration,
    pub(crate) inflight: usize,
}

impl<Meta, St> ConnectAck<Meta, St> {
    /// Create connect ack, `session_present` indicates that previous session is present
    pub(crate) fn new(
        meta: Meta,
        session: St,
        session_present: bool,
        keep_alive: Duration,
        inflight: usize,
    ) -> Self {
        Self {
            meta,
            session_present,
            keep_alive,
            inflight,
            session: Some(session),
            return_code: mqtt_codec::ConnectCode::ConnectionAccepted,
        }
    }

    /// Set idle time-out for the connection
    ///
    /// By default idle time-out is set to 300 seconds
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive = timeout;
        self
    }

    /// Set in-flight count. Total number of `in-flight` packets
    ///
    /// By default in-flight count is set to 15
    pub fn in_flight(mut self, in_flight: usize) -> Self {
        self.inflight = in_flight;
        self
    }
}
