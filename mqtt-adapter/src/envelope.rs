//! Wire codec for `RawMessage`, the platform-canonical envelope carried on
//! the internal bus (spec §3, §4.3). Thin wrapper over the `prost`-generated
//! type so `prost`'s error type does not leak across the crate boundary —
//! the same shape `actix-protobuf` uses to wrap `prost::DecodeError` in its
//! own payload error type.

use bytes::Bytes;
use prost::Message;

use crate::error::AdapterError;

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/mainflux.rs"));
}

pub use proto::RawMessage;

/// Encode a `RawMessage` to its length-prefixed binary wire form.
pub fn encode(msg: &RawMessage) -> Bytes {
    msg.encode_to_vec().into()
}

/// Decode a `RawMessage` from the wire. Unknown fields are silently
/// preserved-and-ignored by `prost`'s default decode behavior, satisfying
/// the forward-compat requirement in spec §4.3.
pub fn decode(bytes: &[u8]) -> Result<RawMessage, AdapterError> {
    RawMessage::decode(bytes).map_err(AdapterError::from)
}

/// Marker protocol tag this adapter stamps on every envelope it produces.
/// Used on the way back in to suppress publish loops (spec §3 invariant 3,
/// §4.8).
pub const PROTOCOL_MQTT: &str = "mqtt";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_wire_form() {
        let msg = RawMessage {
            channel: "ch-9".into(),
            subtopic: "temp.room-1".into(),
            publisher: "thing-1".into(),
            protocol: PROTOCOL_MQTT.into(),
            payload: b"{\"t\":22}".to_vec(),
        };

        let wire = encode(&msg);
        let decoded = decode(&wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(decode(&[0xff, 0x00, 0xff]).is_err());
    }
}
