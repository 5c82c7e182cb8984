use crate::config::Config;
use crate::errors::Result;
use crate::generator::{Clock, HeartRateModel};
use crate::publisher::{Delivery, Publisher};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported when the loop stops on request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub published: u64,
    pub acknowledged: u64,
    pub timed_out: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Disconnected,
    Connecting,
    Connected,
    Publishing,
    Stopped,
    Fatal,
}

fn transition(state: &mut LoopState, next: LoopState) {
    debug!("Publisher state {:?} -> {:?}", state, next);
    *state = next;
}

/// Connects once, then publishes one reading per interval until `shutdown`
/// is cancelled or the transport fails. The interval is slept after each
/// publish returns, so the cadence drifts by the publish latency.
pub async fn run<P, C, R>(
    config: &Config,
    publisher: &mut P,
    model: &HeartRateModel,
    clock: &C,
    rng: &mut R,
    shutdown: CancellationToken,
) -> Result<RunSummary>
where
    P: Publisher,
    C: Clock,
    R: Rng,
{
    let qos = config.qos()?;
    let interval = config.interval();
    let publish_timeout = config.publish_timeout();

    let mut summary = RunSummary::default();
    let mut state = LoopState::Disconnected;

    transition(&mut state, LoopState::Connecting);

    let connected = tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        result = publisher.connect() => Some(result),
    };

    match connected {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            transition(&mut state, LoopState::Fatal);
            return Err(e);
        }
        None => {
            info!("Shutdown requested before connecting");
            transition(&mut state, LoopState::Stopped);
            return Ok(summary);
        }
    }

    transition(&mut state, LoopState::Connected);
    info!("Connected.");

    while !shutdown.is_cancelled() {
        transition(&mut state, LoopState::Publishing);

        let telemetry = model.next_reading(clock, rng);
        let timestamp = telemetry.timestamp_string();
        let json = telemetry.to_json()?;

        let delivery = match publisher
            .publish(
                &config.topic,
                json.clone().into_bytes(),
                qos,
                config.retain,
                publish_timeout,
            )
            .await
        {
            Ok(delivery) => delivery,
            Err(e) => {
                transition(&mut state, LoopState::Fatal);
                return Err(e);
            }
        };

        summary.published += 1;
        match delivery {
            Delivery::Acknowledged => summary.acknowledged += 1,
            Delivery::Sent => {}
            Delivery::TimedOut => {
                summary.timed_out += 1;
                warn!(
                    "Reading {} not acknowledged within {:?}",
                    timestamp, publish_timeout
                );
            }
        }

        info!("[{}] published: {}", timestamp, json);
        transition(&mut state, LoopState::Connected);

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Shutdown requested, disconnecting");
    publisher.disconnect().await?;
    transition(&mut state, LoopState::Stopped);

    info!(
        "Published {} readings ({} acknowledged, {} timed out)",
        summary.published, summary.acknowledged, summary.timed_out
    );

    Ok(summary)
}
