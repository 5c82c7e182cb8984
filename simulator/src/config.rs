use crate::errors::{Error, Result};
use clap::Parser;
use rumqttc::QoS;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SERVER_URI: &str = "ssl://mqtt.example.com:8883";
pub const DEFAULT_CLIENT_ID: &str = "hr-sim-001";
pub const DEFAULT_TOPIC: &str = "devices/hr_sim/telemetry";
pub const DEFAULT_QOS: u8 = 1;
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
pub const DEFAULT_TRUST_STORE: &str = "ca.pem";
pub const DEFAULT_CLIENT_CERT: &str = "client.pem";
pub const DEFAULT_CLIENT_KEY: &str = "client.key";

const TLS_PORT: u16 = 8883;
const PLAIN_PORT: u16 = 1883;

/// Everything the publish loop needs to know about where and how to send.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub server_uri: String,
    pub client_id: String,
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub interval_ms: u64,
    pub publish_timeout_ms: u64,
    pub keep_alive_secs: u64,
    pub trust_store_path: PathBuf,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_uri: DEFAULT_SERVER_URI.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            qos: DEFAULT_QOS,
            retain: false,
            interval_ms: DEFAULT_INTERVAL_MS,
            publish_timeout_ms: DEFAULT_PUBLISH_TIMEOUT_MS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            trust_store_path: PathBuf::from(DEFAULT_TRUST_STORE),
            client_cert_path: Some(PathBuf::from(DEFAULT_CLIENT_CERT)),
            client_key_path: Some(PathBuf::from(DEFAULT_CLIENT_KEY)),
        }
    }
}

/// Broker endpoint parsed from `server_uri`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Config {
    pub fn broker(&self) -> Result<BrokerAddress> {
        parse_server_uri(&self.server_uri)
    }

    pub fn qos(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::Config(format!("QoS level {} out of range [0, 2]", other))),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Checks everything that can be checked without touching the network
    /// or the filesystem.
    pub fn validate(&self) -> Result<()> {
        self.broker()?;
        self.qos()?;

        if self.client_id.is_empty() {
            return Err(Error::Config("Client ID cannot be empty".to_string()));
        }

        if self.topic.is_empty() {
            return Err(Error::Config("Topic cannot be empty".to_string()));
        }

        if self.topic.contains('#') || self.topic.contains('+') {
            return Err(Error::Config(format!(
                "Topic {} must not contain wildcards",
                self.topic
            )));
        }

        if self.interval_ms == 0 {
            return Err(Error::Config("Publish interval must be positive".to_string()));
        }

        if self.publish_timeout_ms == 0 {
            return Err(Error::Config("Publish timeout must be positive".to_string()));
        }

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(_), None) => Err(Error::Config(
                "Client certificate given without a private key".to_string(),
            )),
            (None, Some(_)) => Err(Error::Config(
                "Private key given without a client certificate".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

fn parse_server_uri(uri: &str) -> Result<BrokerAddress> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or_else(|| Error::Config(format!("Server URI {} has no scheme", uri)))?;

    let tls = match scheme {
        "ssl" | "mqtts" => true,
        "tcp" | "mqtt" => false,
        other => {
            return Err(Error::Config(format!(
                "Unsupported scheme {} in server URI {}",
                other, uri
            )))
        }
    };

    let authority = rest.trim_end_matches('/');
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("Invalid port {} in server URI {}", port, uri)))?;
            (host, port)
        }
        None if tls => (authority, TLS_PORT),
        None => (authority, PLAIN_PORT),
    };

    if host.is_empty() || host.contains('/') {
        return Err(Error::Config(format!("Invalid host in server URI {}", uri)));
    }

    Ok(BrokerAddress {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Command line and environment overrides. Nothing set means the defaults.
#[derive(Debug, Parser)]
#[command(name = "hr-simulator", version, about = "Simulated heart-rate sensor publishing over MQTT")]
pub struct Args {
    /// Broker URI, e.g. ssl://host:8883
    #[arg(long, env = "HR_SIM_SERVER_URI", default_value = DEFAULT_SERVER_URI)]
    pub server_uri: String,

    #[arg(long, env = "HR_SIM_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    #[arg(long, env = "HR_SIM_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    #[arg(long, env = "HR_SIM_QOS", default_value_t = DEFAULT_QOS)]
    pub qos: u8,

    /// Delay between publishes, measured after each publish returns
    #[arg(long, env = "HR_SIM_INTERVAL_MS", default_value_t = DEFAULT_INTERVAL_MS)]
    pub interval_ms: u64,

    /// How long to wait for the broker to acknowledge a publish
    #[arg(long, env = "HR_SIM_PUBLISH_TIMEOUT_MS", default_value_t = DEFAULT_PUBLISH_TIMEOUT_MS)]
    pub publish_timeout_ms: u64,

    /// CA certificate used to verify the broker
    #[arg(long = "ca", env = "HR_SIM_CA", default_value = DEFAULT_TRUST_STORE)]
    pub trust_store_path: PathBuf,

    #[arg(long = "client-cert", env = "HR_SIM_CLIENT_CERT", default_value = DEFAULT_CLIENT_CERT)]
    pub client_cert_path: PathBuf,

    #[arg(long = "client-key", env = "HR_SIM_CLIENT_KEY", default_value = DEFAULT_CLIENT_KEY)]
    pub client_key_path: PathBuf,

    /// Connect without presenting a client certificate
    #[arg(long, env = "HR_SIM_NO_CLIENT_AUTH")]
    pub no_client_auth: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let (client_cert_path, client_key_path) = if args.no_client_auth {
            (None, None)
        } else {
            (Some(args.client_cert_path), Some(args.client_key_path))
        };

        Config {
            server_uri: args.server_uri,
            client_id: args.client_id,
            topic: args.topic,
            qos: args.qos,
            interval_ms: args.interval_ms,
            publish_timeout_ms: args.publish_timeout_ms,
            trust_store_path: args.trust_store_path,
            client_cert_path,
            client_key_path,
            ..Config::default()
        }
    }
}
