//! MQTT protocol adapter: bridges devices speaking MQTT 3.1.1 (over raw TCP
//! or WebSocket) to the internal message bus, translating topics and
//! envelopes and authorizing every packet against the things service
//! (spec §1-§4).

pub mod breaker;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod emitter;
pub mod envelope;
pub mod error;
pub mod events;
pub mod hooks;
pub mod persistence;
pub mod session;
pub mod supervisor;
pub mod tcp;
pub mod things;
pub mod topic;
pub mod ws;

pub use config::Config;
pub use error::AdapterError;
pub use hooks::AdapterState;
