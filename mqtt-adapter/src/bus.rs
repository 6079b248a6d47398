//! Outbound half of the internal bus connection (C9's publish side): a thin
//! trait over `async_nats::Client::publish` so the PUBLISH hook (spec §4.6,
//! §4.9) does not depend on a live NATS connection in tests, mirroring how
//! `Persistence`/`Emitter`/`EventPublisher` wrap their own collaborators.

use bytes::Bytes;

use crate::error::AdapterError;

#[async_trait::async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), AdapterError>;
}

pub struct NatsBus(async_nats::Client);

impl NatsBus {
    pub fn new(client: async_nats::Client) -> Self {
        NatsBus(client)
    }
}

#[async_trait::async_trait]
impl BusPublisher for NatsBus {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), AdapterError> {
        self.0
            .publish(subject, payload)
            .await
            .map_err(|e| AdapterError::Unavailable(e.to_string()))
    }
}
