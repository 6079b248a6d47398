//! Typed configuration loaded once from the environment variables
//! enumerated in spec §6. Parse/validation failures are collected and
//! reported together — one process exit, one multi-line error message —
//! rather than failing on the first missing variable.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub instance_id: String,
    pub mqtt_port: u16,
    pub ws_port: u16,
    pub nats_url: String,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_pass: Option<String>,
    pub redis_db: i64,
    pub es_host: String,
    pub es_port: u16,
    pub es_pass: Option<String>,
    pub es_db: i64,
    pub client_tls: bool,
    pub ca_certs: Option<String>,
    pub concurrency: usize,
    pub things_url: String,
    pub event_stream: String,
    pub auth_deadline: Duration,
    pub shutdown_grace: Duration,
}

/// All parse/validation failures collected for a single, legible error
/// message (mirrors `actix-settings`'s own aggregated `ParseError` posture
/// in the teacher pack, adapted from TOML+env to env-only).
#[derive(Debug, Default)]
pub struct ConfigErrors(Vec<String>);

impl std::fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "invalid configuration:")?;
        for err in &self.0 {
            writeln!(f, "  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

struct Loader {
    errors: Vec<String>,
}

impl Loader {
    fn string(&mut self, name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    fn opt_string(&mut self, name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn port(&mut self, name: &str, default: u16) -> u16 {
        match env::var(name) {
            Err(_) => default,
            Ok(v) => match v.parse() {
                Ok(p) => p,
                Err(_) => {
                    self.errors.push(format!("{name}={v:?} is not a valid port"));
                    default
                }
            },
        }
    }

    fn int(&mut self, name: &str, default: i64) -> i64 {
        match env::var(name) {
            Err(_) => default,
            Ok(v) => match v.parse() {
                Ok(n) => n,
                Err(_) => {
                    self.errors.push(format!("{name}={v:?} is not an integer"));
                    default
                }
            },
        }
    }

    fn boolean(&mut self, name: &str, default: bool) -> bool {
        match env::var(name) {
            Err(_) => default,
            Ok(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    self.errors.push(format!("{name}={v:?} is not a boolean"));
                    default
                }
            },
        }
    }
}

impl Config {
    /// Parse every recognized environment variable (spec §6 table), falling
    /// back to documented defaults where the source is silent.
    pub fn from_env() -> Result<Self, ConfigErrors> {
        let mut loader = Loader { errors: Vec::new() };

        // SCHEMA_DIR (spec §6) selects the protobuf schema directory used
        // for envelope codec generation. Codegen here runs at build time
        // via `build.rs`/`tonic-build` against the fixed `proto/` directory,
        // not at process startup, so there is nothing for a running process
        // to load from it — the variable is acknowledged and ignored rather
        // than left unrecognized.
        let _ = env::var("SCHEMA_DIR");

        let config = Config {
            log_level: loader.string("LOG_LEVEL", "info"),
            instance_id: loader.string("INSTANCE_ID", "mqtt-adapter-1"),
            mqtt_port: loader.port("MQTT_PORT", 1883),
            ws_port: loader.port("WS_PORT", 8880),
            nats_url: loader.string("NATS_URL", "nats://localhost:4222"),
            redis_host: loader.string("REDIS_HOST", "localhost"),
            redis_port: loader.port("REDIS_PORT", 6379),
            redis_pass: loader.opt_string("REDIS_PASS"),
            redis_db: loader.int("REDIS_DB", 0),
            es_host: loader.string("ES_HOST", "localhost"),
            es_port: loader.port("ES_PORT", 6379),
            es_pass: loader.opt_string("ES_PASS"),
            es_db: loader.int("ES_DB", 0),
            client_tls: loader.boolean("CLIENT_TLS", false),
            ca_certs: loader.opt_string("CA_CERTS"),
            concurrency: loader.int("CONCURRENCY", 100).max(1) as usize,
            things_url: loader.string("THINGS_URL", "http://localhost:8183"),
            event_stream: loader.string("EVENT_STREAM", "mainflux.mqtt"),
            auth_deadline: Duration::from_secs(3),
            shutdown_grace: Duration::from_secs(30),
        };

        if loader.errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigErrors(loader.errors))
        }
    }

    pub fn redis_url(&self, host: &str, port: u16, pass: Option<&str>, db: i64) -> String {
        match pass {
            Some(pass) => format!("redis://:{pass}@{host}:{port}/{db}"),
            None => format!("redis://{host}:{port}/{db}"),
        }
    }
}
