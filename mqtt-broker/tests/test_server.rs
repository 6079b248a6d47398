use std::num::NonZeroU16;

use bytestring::ByteString;
use futures_util::{SinkExt, StreamExt};
use mqtt_broker::{Connect, ConnectAck, MqttServer, Publish};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::LocalSet;
use tokio_util::codec::Framed;

#[derive(Clone)]
struct Session;

async fn connect(packet: Connect<()>) -> Result<ConnectAck<(), Session>, ()> {
    println!("CONNECT: {:?}", packet);
    Ok(packet.ack(Session, false))
}

#[tokio::test]
async fn test_simple() -> std::io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = MqttServer::new(connect).finish(|_t: Publish<Session>| async { Ok(true) });

    let local = LocalSet::new();
    local.spawn_local(async move {
        loop {
            let (io, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let server = server.clone();
            tokio::task::spawn_local(async move {
                let _ = server.run(io, ()).await;
            });
        }
    });

    local
        .run_until(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut framed = Framed::new(stream, mqtt_codec::Codec::new());

            framed
                .send(mqtt_codec::Packet::Connect(mqtt_codec::Connect {
                    protocol: mqtt_codec::Protocol::MQTT(4),
                    clean_session: true,
                    keep_alive: 30,
                    client_id: ByteString::from_static("test-client"),
                    last_will: None,
                    username: None,
                    password: None,
                }))
                .await
                .unwrap();

            let ack = framed.next().await.unwrap().unwrap();
            assert!(matches!(
                ack,
                mqtt_codec::Packet::ConnectAck {
                    return_code: mqtt_codec::ConnectCode::ConnectionAccepted,
                    ..
                }
            ));

            framed
                .send(mqtt_codec::Packet::Subscribe {
                    packet_id: NonZeroU16::new(1).unwrap(),
                    topic_filters: vec![(
                        ByteString::from_static("#"),
                        mqtt_codec::QoS::AtMostOnce,
                    )],
                })
                .await
                .unwrap();

            let suback = framed.next().await.unwrap().unwrap();
            assert!(matches!(
                suback,
                mqtt_codec::Packet::SubscribeAck { packet_id, .. } if packet_id.get() == 1
            ));

            framed.send(mqtt_codec::Packet::Disconnect).await.unwrap();
        })
        .await;

    Ok(())
}

/// A rejected PUBLISH (hook resolves `Ok(false)`) must not close the
/// connection and must not produce a PUBACK — the shape an authorization
/// failure needs so the client can keep publishing on other topics.
#[tokio::test]
async fn rejected_publish_does_not_close_connection() -> std::io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = MqttServer::new(connect).finish(|p: Publish<Session>| async move {
        Ok(p.publish_topic() != "forbidden")
    });

    let local = LocalSet::new();
    local.spawn_local(async move {
        loop {
            let (io, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let server = server.clone();
            tokio::task::spawn_local(async move {
                let _ = server.run(io, ()).await;
            });
        }
    });

    local
        .run_until(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut framed = Framed::new(stream, mqtt_codec::Codec::new());

            framed
                .send(mqtt_codec::Packet::Connect(mqtt_codec::Connect {
                    protocol: mqtt_codec::Protocol::MQTT(4),
                    clean_session: true,
                    keep_alive: 30,
                    client_id: ByteString::from_static("test-client"),
                    last_will: None,
                    username: None,
                    password: None,
                }))
                .await
                .unwrap();
            let _ack = framed.next().await.unwrap().unwrap();

            framed
                .send(mqtt_codec::Packet::Publish(mqtt_codec::Publish {
                    dup: false,
                    retain: false,
                    qos: mqtt_codec::QoS::AtLeastOnce,
                    topic: ByteString::from_static("forbidden"),
                    packet_id: NonZeroU16::new(7),
                    payload: bytes::Bytes::from_static(b"nope"),
                }))
                .await
                .unwrap();

            // Connection stays usable: a subsequent accepted PUBLISH still
            // gets acked, proving the rejected one didn't tear it down.
            framed
                .send(mqtt_codec::Packet::Publish(mqtt_codec::Publish {
                    dup: false,
                    retain: false,
                    qos: mqtt_codec::QoS::AtLeastOnce,
                    topic: ByteString::from_static("allowed"),
                    packet_id: NonZeroU16::new(8),
                    payload: bytes::Bytes::from_static(b"ok"),
                }))
                .await
                .unwrap();

            let ack = framed.next().await.unwrap().unwrap();
            assert!(matches!(
                ack,
                mqtt_codec::Packet::PublishAck { packet_id } if packet_id.get() == 8
            ));
        })
        .await;

    Ok(())
}

/// `keep_alive = 0` is a valid CONNECT value (MQTT-3.1.2-22: keep-alive
/// disabled). The session must stay up rather than panicking while building
/// its keep-alive ticker; it's only exercised here by surviving well past
/// what a 1.5x-of-zero timeout would have been, then closing cleanly on
/// DISCONNECT.
#[tokio::test]
async fn zero_keep_alive_disables_the_ticker() -> std::io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = MqttServer::new(connect).finish(|_t: Publish<Session>| async { Ok(true) });

    let local = LocalSet::new();
    local.spawn_local(async move {
        loop {
            let (io, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let server = server.clone();
            tokio::task::spawn_local(async move {
                let _ = server.run(io, ()).await;
            });
        }
    });

    local
        .run_until(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut framed = Framed::new(stream, mqtt_codec::Codec::new());

            framed
                .send(mqtt_codec::Packet::Connect(mqtt_codec::Connect {
                    protocol: mqtt_codec::Protocol::MQTT(4),
                    clean_session: true,
                    keep_alive: 0,
                    client_id: ByteString::from_static("no-keepalive"),
                    last_will: None,
                    username: None,
                    password: None,
                }))
                .await
                .unwrap();

            let ack = framed.next().await.unwrap().unwrap();
            assert!(matches!(
                ack,
                mqtt_codec::Packet::ConnectAck {
                    return_code: mqtt_codec::ConnectCode::ConnectionAccepted,
                    ..
                }
            ));

            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            framed.send(mqtt_codec::Packet::Disconnect).await.unwrap();
        })
        .await;

    Ok(())
}
