use derive_more::Display;

/// Error taxonomy for the bridge (spec §7): each hot-path failure is recovered
/// locally at the packet boundary and mapped to one of these kinds before it
/// reaches the broker core.
#[derive(Debug, Display)]
pub enum AdapterError {
    /// Malformed MQTT topic/filter (C2).
    #[display(fmt = "invalid topic: {}", _0)]
    InvalidTopic(String),
    /// `Identify` rejected the presented key.
    #[display(fmt = "unauthenticated")]
    Unauthenticated,
    /// `CanAccess` rejected the (key, channel) pair.
    #[display(fmt = "unauthorized")]
    Unauthorized,
    /// Transport/RPC failure reaching an external collaborator (things
    /// service, Redis, NATS); always fail-closed.
    #[display(fmt = "unavailable: {}", _0)]
    Unavailable(String),
    /// Shared-store failure (session, retained, subscription index).
    #[display(fmt = "persistence error: {}", _0)]
    Persistence(String),
    /// Envelope failed to decode.
    #[display(fmt = "codec error: {}", _0)]
    Codec(String),
}

impl std::error::Error for AdapterError {}

impl From<prost::DecodeError> for AdapterError {
    fn from(err: prost::DecodeError) -> Self {
        AdapterError::Codec(err.to_string())
    }
}

impl From<tonic::Status> for AdapterError {
    fn from(status: tonic::Status) -> Self {
        use tonic::Code;
        match status.code() {
            Code::Unauthenticated => AdapterError::Unauthenticated,
            Code::PermissionDenied | Code::NotFound => AdapterError::Unauthorized,
            _ => AdapterError::Unavailable(status.message().to_string()),
        }
    }
}

impl From<redis::RedisError> for AdapterError {
    fn from(err: redis::RedisError) -> Self {
        AdapterError::Persistence(err.to_string())
    }
}

impl From<async_nats::Error> for AdapterError {
    fn from(err: async_nats::Error) -> Self {
        AdapterError::Unavailable(err.to_string())
    }
}
