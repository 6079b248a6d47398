//! Binary entry point: load configuration, connect every collaborator
//! (things service, Redis, NATS) and hand off to the supervisor (spec §1,
//! §4.10, §6).
//!
//! Runs under `actix_web::main` rather than plain `tokio::main` because the
//! websocket transport (C7) needs an actix arbiter to host `actix-ws`
//! sessions; that arbiter already provides the `LocalSet`-style context
//! `mqtt-broker`'s `!Send` hooks need, so the supervisor spawns directly
//! into it instead of nesting a second `LocalSet`.

use std::sync::Arc;

use mqtt_adapter::bus::{BusPublisher, NatsBus};
use mqtt_adapter::emitter::{Emitter, RedisEmitter};
use mqtt_adapter::events::RedisEventPublisher;
use mqtt_adapter::persistence::RedisPersistence;
use mqtt_adapter::supervisor::{self, Ports};
use mqtt_adapter::things::GrpcThingsClient;
use mqtt_adapter::{AdapterState, Config};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // SAFETY: single-threaded at this point in startup, before any other
    // code reads the environment.
    unsafe {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    env_logger::init();

    log::info!("starting mqtt-adapter (instance {})", config.instance_id);

    let things = Arc::new(
        GrpcThingsClient::connect(&config.things_url, config.auth_deadline).await?,
    );

    let store_url = config.redis_url(&config.redis_host, config.redis_port, config.redis_pass.as_deref(), config.redis_db);
    let redis_client = redis::Client::open(store_url.as_str())?;
    let store_conn = redis_client.get_connection_manager().await?;
    let persistence = Arc::new(RedisPersistence::new(store_conn));

    let emitter = RedisEmitter::new(redis_client, persistence.clone());

    let es_url = config.redis_url(&config.es_host, config.es_port, config.es_pass.as_deref(), config.es_db);
    let es_client = redis::Client::open(es_url.as_str())?;
    let es_conn = es_client.get_connection_manager().await?;
    let events = Arc::new(RedisEventPublisher::new(es_conn, config.event_stream.clone()));

    let bus = async_nats::connect(&config.nats_url).await?;

    let state = Arc::new(AdapterState {
        things,
        persistence,
        emitter: emitter.clone() as Arc<dyn Emitter>,
        events,
        bus: Arc::new(NatsBus::new(bus.clone())) as Arc<dyn BusPublisher>,
        instance_id: config.instance_id.clone(),
        concurrency: Arc::new(tokio::sync::Semaphore::new(config.concurrency)),
    });

    supervisor::run(
        state,
        emitter,
        bus,
        Ports {
            mqtt: config.mqtt_port,
            ws: config.ws_port,
        },
        config.shutdown_grace,
    )
    .await?;

    Ok(())
}
