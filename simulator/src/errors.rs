use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read credentials from {}: {source}", path.display())]
    Credentials {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("MQTT connection error: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("Broker refused connection: {0:?}")]
    ConnectRefused(rumqttc::ConnectReturnCode),

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid heart rate distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Connection driver stopped unexpectedly")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, Error>;
