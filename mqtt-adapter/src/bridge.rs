//! Bus bridge in (C8): subscribes on the internal bus with a queue group so
//! each message is delivered to exactly one adapter instance, then
//! translates and fans it out to MQTT through the shared emitter (spec
//! §4.8).

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::emitter::Emitter;
use crate::envelope::{self, PROTOCOL_MQTT};
use crate::topic;

const QUEUE_GROUP: &str = "mqtts";
const BUS_WILDCARD: &str = "channel.>";

/// Runs until `cancel` fires, then drains in-flight handlers for up to
/// `grace` before dropping the subscription (default 30s, spec §4.8).
pub async fn run(
    bus: async_nats::Client,
    emitter: Arc<dyn Emitter>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<(), async_nats::Error> {
    let mut sub = bus.queue_subscribe(BUS_WILDCARD, QUEUE_GROUP.into()).await?;
    log::info!("bus bridge subscribed to {BUS_WILDCARD} (queue group {QUEUE_GROUP})");

    let mut inflight = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(msg) = sub.next() => {
                let emitter = emitter.clone();
                inflight.spawn_local(async move {
                    handle_message(msg, emitter).await;
                });
            }
        }
    }

    sub.unsubscribe().await.ok();

    let drain = async {
        while inflight.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        log::warn!("bus bridge shutdown grace window elapsed with handlers still inflight");
    }

    Ok(())
}

async fn handle_message(msg: async_nats::Message, emitter: Arc<dyn Emitter>) {
    let envelope = match envelope::decode(&msg.payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            log::warn!("dropping undecodable bus message on {}: {err}", msg.subject);
            return;
        }
    };

    let Some(mqtt_topic) = mqtt_topic_for(&envelope) else {
        return;
    };

    if let Err(err) = emitter
        .publish(
            &mqtt_topic,
            envelope.payload.clone().into(),
            mqtt_codec::QoS::ExactlyOnce,
            false,
        )
        .await
    {
        log::warn!("failed to fan out bus message to {mqtt_topic}: {err}");
    }
}

/// Decide the MQTT topic a bus envelope should be fanned out to, or `None`
/// if it must be suppressed. Pulled out of `handle_message` so the loop
/// suppression and topic rendering can be exercised without a live NATS
/// message (spec §3 invariant 3, §4.8).
fn mqtt_topic_for(envelope: &envelope::RawMessage) -> Option<String> {
    if envelope.protocol == PROTOCOL_MQTT {
        // This message was produced by an MQTT adapter (possibly this
        // one); re-publishing it to MQTT would echo it back to its own
        // originator's peers.
        return None;
    }

    Some(topic::render_topic(&envelope.channel, &envelope.subtopic))
}
