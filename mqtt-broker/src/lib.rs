#![allow(clippy::type_complexity, clippy::new_ret_no_self)]
//! MQTT v3.1.1 server framework

mod cell;
mod connect;
mod default;
mod dispatcher;
mod error;
mod publish;
mod server;
mod sink;
mod subs;

pub use self::connect::{Connect, ConnectAck};
pub use self::error::MqttError;
pub use self::publish::Publish;
pub use self::server::{MqttServer, MqttServerService};
pub use self::sink::MqttSink;
pub use self::subs::{Subscribe, SubscribeIter, SubscribeResult, Subscription, Unsubscribe};
