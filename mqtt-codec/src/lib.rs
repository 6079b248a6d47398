//! MQTT v3.1.1 wire codec: packet types plus a `tokio_util::codec`
//! `Encoder`/`Decoder` pair.

mod codec;
mod error;
mod packet;
mod proto;

pub use self::codec::Codec;
pub use self::error::ParseError;
pub use self::packet::{Connect, ConnectCode, LastWill, Packet, Publish, SubscribeReturnCode};
pub use self::proto::{Protocol, QoS};

// http://www.iana.org/assignments/service-names-port-numbers/service-names-port-numbers.xhtml
pub const TCP_PORT: u16 = 1883;
pub const SSL_PORT: u16 = 8883;
