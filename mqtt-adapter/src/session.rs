//! Connection-scoped state handed to `mqtt-broker` as its `Meta`/`St` type
//! parameters (spec §3: `Connection`, `Session`).

use std::net::SocketAddr;

/// Ephemeral per-socket metadata, known before CONNECT is even parsed.
#[derive(Debug, Clone, Copy)]
pub struct ConnMeta {
    pub peer: SocketAddr,
}

/// Session state carried for the lifetime of an accepted connection. The
/// thing key is cleared as soon as the connection closes (spec §4.6,
/// "clear in-memory secret material").
#[derive(Clone)]
pub struct Session {
    pub client_id: String,
    pub thing_id: String,
    thing_key: Option<String>,
}

impl Session {
    pub fn new(client_id: String, thing_id: String, thing_key: String) -> Self {
        Session {
            client_id,
            thing_id,
            thing_key: Some(thing_key),
        }
    }

    /// The thing key is needed on every PUBLISH/SUBSCRIBE to re-authorize
    /// (spec: "no authorization caching"); `None` once the connection has
    /// started closing.
    pub fn thing_key(&self) -> Option<&str> {
        self.thing_key.as_deref()
    }

    pub fn clear_secret(&mut self) {
        self.thing_key = None;
    }
}
