use crate::error::MqttError;
use crate::publish::Publish;
use crate::subs::{Subscribe, SubscribeResult, Unsubscribe};

/// Default publish hook: logs and drops the message. Registered automatically
/// when `MqttServer::finish` is never called with a custom publish hook... in
/// practice every server configures its own, this exists for tests and
/// examples.
pub async fn not_implemented<S, E>(_: Publish<S>) -> Result<bool, MqttError<E>> {
    log::warn!("MQTT Publish is not implemented");
    Ok(true)
}

/// Default subscribe hook: refuses every topic filter in the request.
pub async fn subs_not_implemented<S, E>(subs: Subscribe<S>) -> Result<SubscribeResult, MqttError<E>> {
    log::warn!("MQTT Subscribe is not implemented");
    Ok(subs.into_result())
}

/// Default unsubscribe hook: acknowledges without doing anything.
pub async fn unsubs_not_implemented<S, E>(_: Unsubscribe<S>) -> Result<(), MqttError<E>> {
    log::warn!("MQTT Unsubscribe is not implemented");
    Ok(())
}
