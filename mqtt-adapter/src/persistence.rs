//! Shared broker state (C5), persistence half: session bookkeeping, the
//! retained-message table and the subscription index, all backed by Redis
//! so that any adapter instance can serve any client (spec §4.5).
//!
//! Kept as a trait so the broker-facing hooks in `hooks` stay storage
//! agnostic, mirroring the teacher's own pattern of taking session state as
//! a generic parameter rather than hard-coding a backing store.

use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::AdapterError;

#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Record that `client_id` now has a live session; `clean` mirrors the
    /// CONNECT packet's clean-session flag.
    async fn put_session(&self, client_id: &str, clean: bool) -> Result<(), AdapterError>;
    async fn remove_session(&self, client_id: &str) -> Result<(), AdapterError>;

    /// Subscription index: add/remove a `client_id` under a rendered MQTT
    /// topic filter, and list the client ids eligible for a given topic.
    async fn add_subscriber(&self, topic: &str, client_id: &str) -> Result<(), AdapterError>;
    async fn remove_subscriber(&self, topic: &str, client_id: &str) -> Result<(), AdapterError>;
    async fn subscribers_for(&self, topic: &str) -> Result<Vec<String>, AdapterError>;

    async fn put_retained(&self, topic: &str, payload: Bytes) -> Result<(), AdapterError>;
    async fn get_retained(&self, topic: &str) -> Result<Option<Bytes>, AdapterError>;
}

pub struct RedisPersistence {
    conn: ConnectionManager,
}

impl RedisPersistence {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisPersistence { conn }
    }

    fn session_key(client_id: &str) -> String {
        format!("mqtt:session:{client_id}")
    }

    fn subs_key(topic: &str) -> String {
        format!("mqtt:subs:{topic}")
    }

    fn retained_key(topic: &str) -> String {
        format!("mqtt:retained:{topic}")
    }
}

#[async_trait::async_trait]
impl Persistence for RedisPersistence {
    async fn put_session(&self, client_id: &str, clean: bool) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::session_key(client_id), clean as u8)
            .await?;
        Ok(())
    }

    async fn remove_session(&self, client_id: &str) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::session_key(client_id)).await?;
        Ok(())
    }

    async fn add_subscriber(&self, topic: &str, client_id: &str) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(Self::subs_key(topic), client_id)
            .await?;
        Ok(())
    }

    async fn remove_subscriber(&self, topic: &str, client_id: &str) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(Self::subs_key(topic), client_id)
            .await?;
        Ok(())
    }

    async fn subscribers_for(&self, topic: &str) -> Result<Vec<String>, AdapterError> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(Self::subs_key(topic)).await?;
        Ok(members)
    }

    async fn put_retained(&self, topic: &str, payload: Bytes) -> Result<(), AdapterError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(Self::retained_key(topic), payload.to_vec())
            .await?;
        Ok(())
    }

    async fn get_retained(&self, topic: &str) -> Result<Option<Bytes>, AdapterError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(Self::retained_key(topic)).await?;
        Ok(value.map(Bytes::from))
    }
}
