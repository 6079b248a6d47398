//! Wires `mqtt-broker`'s CONNECT/PUBLISH/SUBSCRIBE/disconnect hooks (C6) to
//! the auth client (C3), topic translator (C2), envelope codec (C1), event
//! stream (C4) and shared state (C5) — this is C9, the bridge-out path,
//! plus the authentication half of the session lifecycle (spec §4.6).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;

use bytestring::ByteString;

use mqtt_broker::{Connect, ConnectAck, MqttError, Publish, Subscribe, SubscribeResult};

use crate::bus::BusPublisher;
use crate::emitter::Emitter;
use crate::envelope::{self, RawMessage, PROTOCOL_MQTT};
use crate::error::AdapterError;
use crate::events::{ConnEvent, EventPublisher, EventType};
use crate::persistence::Persistence;
use crate::session::{ConnMeta, Session};
use crate::things::ThingsClient;
use crate::topic;

pub struct AdapterState {
    pub things: Arc<dyn ThingsClient>,
    pub persistence: Arc<dyn Persistence>,
    pub emitter: Arc<dyn Emitter>,
    pub events: Arc<dyn EventPublisher>,
    pub bus: Arc<dyn BusPublisher>,
    pub instance_id: String,
    /// Instance-wide cap on inbound packets being dispatched to a hook at
    /// once (spec §5, §6 `CONCURRENCY`): a permit is acquired before every
    /// CONNECT/PUBLISH/SUBSCRIBE hook call and released on completion,
    /// across every connection this process serves — not per connection.
    pub concurrency: Arc<Semaphore>,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// CONNECT hook: `Identify(password)` sets `thingID`; the client-id falls
/// back to the thing id if the CONNECT packet left it blank (spec §4.6).
pub async fn authenticate(
    connect: Connect<ConnMeta>,
    state: Arc<AdapterState>,
) -> Result<ConnectAck<ConnMeta, Session>, MqttError<AdapterError>> {
    let _permit = state
        .concurrency
        .acquire()
        .await
        .expect("concurrency semaphore is never closed");

    let key = match connect.password.as_ref() {
        Some(pwd) => String::from_utf8_lossy(pwd).into_owned(),
        None => return Ok(connect.bad_username_or_pwd()),
    };

    let thing_id = match state.things.identify(&key).await {
        Ok(id) => id,
        Err(AdapterError::Unauthenticated) => return Ok(connect.bad_username_or_pwd()),
        Err(_) => return Ok(connect.service_unavailable()),
    };

    let client_id = if connect.client_id.is_empty() {
        thing_id.clone()
    } else {
        connect.client_id.to_string()
    };

    if let Err(err) = state.persistence.put_session(&client_id, connect.clean_session).await {
        log::error!("persistence error recording session for {client_id}: {err}");
        return Ok(connect.service_unavailable());
    }

    state.events.publish(ConnEvent {
        thing_id: thing_id.clone(),
        timestamp: now_secs(),
        event_type: EventType::Connect,
        instance: state.instance_id.clone(),
    }).await;

    let session = Session::new(client_id, thing_id, key);
    Ok(connect.ack(session, false))
}

/// PUBLISH hook (C9): parse topic, `CanAccess`, encode the envelope and
/// publish it to the internal bus. Accept locally afterwards — the adapter
/// does not fan the MQTT packet out itself, the message re-enters through
/// the bus bridge (C8) so every subscribed device gets the platform
/// canonical form (spec §4.6).
///
/// Returns `Ok(false)` (reject, connection stays open) for every failure
/// kind in spec §7 except a genuine protocol violation.
pub async fn authorize_publish(
    publish: Publish<Session>,
    state: Arc<AdapterState>,
) -> Result<bool, MqttError<AdapterError>> {
    let _permit = state
        .concurrency
        .acquire()
        .await
        .expect("concurrency semaphore is never closed");

    let thing_key = match publish.session().thing_key() {
        Some(key) => key.to_string(),
        None => return Ok(false),
    };

    let (channel, subtopic) = match topic::parse_publish_topic(publish.publish_topic()) {
        Ok(parsed) => parsed,
        Err(_) => {
            log::warn!("rejecting publish on invalid topic {:?}", publish.publish_topic());
            return Ok(false);
        }
    };

    let publisher = match state.things.can_access(&thing_key, channel.as_str()).await {
        Ok(id) => id,
        Err(err) => {
            log::warn!("rejecting publish on {channel}: {err}");
            return Ok(false);
        }
    };

    let envelope = RawMessage {
        channel: channel.as_str().to_string(),
        subtopic: subtopic.as_str().to_string(),
        publisher,
        protocol: PROTOCOL_MQTT.to_string(),
        payload: publish.payload().to_vec(),
    };

    let wire = envelope::encode(&envelope);
    let subject = format!("channel.{channel}{}", {
        if subtopic.is_empty() {
            String::new()
        } else {
            format!(".{}", subtopic.as_str())
        }
    });

    if let Err(err) = state.bus.publish(subject, wire).await {
        log::warn!("failed to publish to internal bus: {err}");
        return Ok(false);
    }

    Ok(true)
}

/// SUBSCRIBE hook: per filter, parse + `CanAccess`; the whole SUBSCRIBE is
/// rejected wholesale if any filter fails (spec §4.6, §9 open question
/// resolved in favor of retaining this behavior).
pub async fn authorize_subscribe(
    mut subscribe: Subscribe<Session>,
    state: Arc<AdapterState>,
) -> Result<SubscribeResult, MqttError<AdapterError>> {
    let _permit = state
        .concurrency
        .acquire()
        .await
        .expect("concurrency semaphore is never closed");

    let thing_key = subscribe.session().thing_key().map(|k| k.to_string());
    let client_id = subscribe.session().client_id.clone();

    let Some(thing_key) = thing_key else {
        return Ok(subscribe.into_result());
    };

    let mut parsed: Vec<(ByteString, mqtt_codec::QoS, Option<String>)> = Vec::new();
    for mut sub in subscribe.iter_mut() {
        match topic::parse_filter(sub.topic()) {
            Ok(channel) => parsed.push((sub.topic().clone(), sub.qos(), Some(channel.as_str().to_string()))),
            Err(_) => {
                parsed.push((sub.topic().clone(), sub.qos(), None));
                sub.fail();
            }
        }
    }

    let all_parsed = parsed.iter().all(|(_, _, ch)| ch.is_some());
    if !all_parsed {
        log::warn!("rejecting subscribe: at least one filter failed to parse");
        for mut sub in subscribe.iter_mut() {
            sub.fail();
        }
        return Ok(subscribe.into_result());
    }

    for (topic_filter, _, channel) in &parsed {
        let channel = channel.as_deref().unwrap();
        if state.things.can_access(&thing_key, channel).await.is_err() {
            log::warn!("rejecting subscribe: {client_id} not authorized on {channel}");
            for mut sub in subscribe.iter_mut() {
                sub.fail();
            }
            return Ok(subscribe.into_result());
        }
        // A failure here would leave the client believing it is subscribed
        // while the shared index (which the emitter's fan-out reads back
        // through, see `emitter::RedisEmitter::deliver`) never recorded it —
        // refuse the whole SUBSCRIBE rather than silently accept (spec §7).
        if let Err(err) = state.persistence.add_subscriber(topic_filter.as_ref(), &client_id).await {
            log::error!("persistence error recording subscriber {client_id} on {topic_filter}: {err}");
            for mut sub in subscribe.iter_mut() {
                sub.fail();
            }
            return Ok(subscribe.into_result());
        }
    }

    for (mut sub, (_, qos, _)) in subscribe.iter_mut().zip(parsed.into_iter()) {
        sub.subscribe(qos);
    }

    let sink = subscribe.sink();
    state.emitter.register(client_id, sink.clone());

    Ok(subscribe.into_result())
}

/// Disconnect hook: append a `disconnect` event and clear the in-memory
/// secret (spec §4.6).
pub fn on_disconnect(mut session: Session, _had_error: bool, state: Arc<AdapterState>) {
    let thing_id = session.thing_id.clone();
    let instance = state.instance_id.clone();
    session.clear_secret();

    tokio::task::spawn_local(async move {
        let _ = state.persistence.remove_session(&session.client_id).await;
        state.emitter.unregister(&session.client_id);
        state.events.publish(ConnEvent {
            thing_id,
            timestamp: now_secs(),
            event_type: EventType::Disconnect,
            instance,
        }).await;
    });
}
