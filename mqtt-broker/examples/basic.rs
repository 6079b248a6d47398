use std::net::SocketAddr;

use mqtt_broker::{Connect, ConnectAck, MqttServer, Publish};
use tokio::net::TcpListener;
use tokio::task::LocalSet;

#[derive(Clone)]
struct Session;

async fn connect(connect: Connect<SocketAddr>) -> Result<ConnectAck<SocketAddr, Session>, ()> {
    log::info!("new connection from {:?}: {:?}", connect.get_ref(), connect);
    Ok(connect.ack(Session, false))
}

async fn publish(publish: Publish<Session>) -> Result<bool, ()> {
    log::info!(
        "incoming publish: {:?} -> {:?}",
        publish.id(),
        publish.publish_topic()
    );
    Ok(true)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    std::env::set_var("RUST_LOG", "mqtt_broker=trace,basic=trace");
    env_logger::init();

    let listener = TcpListener::bind("127.0.0.1:1883").await?;
    let server = MqttServer::new(connect).finish(publish);

    LocalSet::new()
        .run_until(async move {
            loop {
                let (io, peer_addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        log::error!("Failed to accept connection: {:?}", e);
                        continue;
                    }
                };
                let server = server.clone();
                tokio::task::spawn_local(async move {
                    if let Err(e) = server.run(io, peer_addr).await {
                        log::trace!("Connection closed: {:?}", e);
                    }
                });
            }
        })
        .await
}
