use clap::Parser;
use hr_simulator::config::{Args, Config};
use hr_simulator::errors::Result;
use hr_simulator::generator::{HeartRateModel, SystemClock};
use hr_simulator::mqtt::MqttPublisher;
use hr_simulator::runner::{self, RunSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from(Args::parse());

    // Initialize logging, warnings and errors go to stderr
    let writer = std::io::stderr
        .with_max_level(Level::WARN)
        .or_else(std::io::stdout);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(writer)
        .init();

    info!("Starting heart-rate simulator");
    info!(
        "Broker: {}, client: {}, topic: {}, interval: {}ms",
        config.server_uri, config.client_id, config.topic, config.interval_ms
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_token.cancel();
        }
    });

    let result = simulate(&config, shutdown).await;
    match &result {
        Ok(summary) => info!("Stopped after {} readings", summary.published),
        Err(e) => error!("MQTT error: {}", e),
    }

    ExitCode::from(exit_status(&result))
}

/// 0 after a requested shutdown, 1 on any fatal error.
fn exit_status(result: &Result<RunSummary>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}

async fn simulate(config: &Config, shutdown: CancellationToken) -> Result<RunSummary> {
    config.validate()?;

    let model = HeartRateModel::resting()?;
    let mut publisher = MqttPublisher::from_config(config)?;
    let mut rng = StdRng::from_entropy();

    runner::run(config, &mut publisher, &model, &SystemClock, &mut rng, shutdown).await
}
