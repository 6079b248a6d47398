//! Shared broker state (C5), emitter half: a Redis Pub/Sub fanout so a
//! PUBLISH handled by one adapter instance reaches a subscribed client
//! connected to any other instance (spec §4.5).
//!
//! The subscription *decision* lives in the shared `Persistence` index;
//! only the `MqttSink` handles in `local` are instance-local — every
//! instance still has to be told about every publish so it can check its
//! own sockets against that shared index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use bytestring::ByteString;
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use mqtt_broker::MqttSink;

use crate::error::AdapterError;
use crate::persistence::Persistence;

const FANOUT_CHANNEL: &str = "mqtt:fanout";

#[derive(Debug, Serialize, Deserialize)]
struct FanoutMessage {
    topic: String,
    payload: Vec<u8>,
    qos: u8,
    retain: bool,
}

#[async_trait::async_trait]
pub trait Emitter: Send + Sync {
    /// Fan a publish out to every instance in the fleet. After this
    /// resolves, every connection in the fleet whose session has a
    /// matching subscription is eligible for delivery (spec §4.5).
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: mqtt_codec::QoS,
        retain: bool,
    ) -> Result<(), AdapterError>;

    fn register(&self, client_id: String, sink: MqttSink);
    fn unregister(&self, client_id: &str);
}

pub struct RedisEmitter {
    client: redis::Client,
    persistence: Arc<dyn Persistence>,
    local: Mutex<HashMap<String, MqttSink>>,
}

impl RedisEmitter {
    pub fn new(client: redis::Client, persistence: Arc<dyn Persistence>) -> Arc<Self> {
        Arc::new(RedisEmitter {
            client,
            persistence,
            local: Mutex::new(HashMap::new()),
        })
    }

    /// Drive the fanout listener until `cancel` fires. Spawned once per
    /// instance by the supervisor alongside the transport listeners.
    pub async fn run(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
        loop {
            match self.client.get_async_pubsub().await {
                Ok(mut pubsub) => {
                    if let Err(err) = pubsub.subscribe(FANOUT_CHANNEL).await {
                        log::error!("failed to subscribe to fanout channel: {err}");
                        return;
                    }
                    let mut stream = pubsub.on_message();
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            msg = stream.next() => {
                                match msg {
                                    Some(msg) => {
                                        let payload: Vec<u8> = match msg.get_payload() {
                                            Ok(p) => p,
                                            Err(err) => {
                                                log::warn!("malformed fanout payload: {err}");
                                                continue;
                                            }
                                        };
                                        self.deliver(&payload).await;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                }
                Err(err) => {
                    log::error!("fanout pubsub connection failed: {err}, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn deliver(&self, raw: &[u8]) {
        let msg: FanoutMessage = match serde_json::from_slice(raw) {
            Ok(m) => m,
            Err(err) => {
                log::warn!("failed to decode fanout message: {err}");
                return;
            }
        };

        let subscribers = match self.persistence.subscribers_for(&msg.topic).await {
            Ok(s) => s,
            Err(err) => {
                log::error!("persistence error resolving subscribers for {}: {err}", msg.topic);
                return;
            }
        };

        let local = self.local.lock().unwrap();
        let topic = ByteString::from(msg.topic.as_str());
        for client_id in subscribers {
            if let Some(sink) = local.get(&client_id) {
                let payload = Bytes::from(msg.payload.clone());
                if msg.qos == 0 {
                    sink.publish_qos0(topic.clone(), payload, false);
                } else {
                    let sink = sink.clone();
                    let topic = topic.clone();
                    tokio::task::spawn_local(async move {
                        let _ = sink.publish_qos1(topic, payload, false).await;
                    });
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Emitter for RedisEmitter {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: mqtt_codec::QoS,
        retain: bool,
    ) -> Result<(), AdapterError> {
        if retain {
            self.persistence.put_retained(topic, payload.clone()).await?;
        }

        let msg = FanoutMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos: match qos {
                mqtt_codec::QoS::AtMostOnce => 0,
                mqtt_codec::QoS::AtLeastOnce => 1,
                mqtt_codec::QoS::ExactlyOnce => 2,
            },
            retain,
        };
        let serialized =
            serde_json::to_vec(&msg).map_err(|e| AdapterError::Codec(e.to_string()))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(AdapterError::from)?;
        conn.publish::<_, _, ()>(FANOUT_CHANNEL, serialized)
            .await?;
        Ok(())
    }

    fn register(&self, client_id: String, sink: MqttSink) {
        self.local.lock().unwrap().insert(client_id, sink);
    }

    fn unregister(&self, client_id: &str) {
        self.local.lock().unwrap().remove(client_id);
    }
}
