use chrono::{NaiveDateTime, TimeZone, Utc};
use hr_simulator::config::Config;
use hr_simulator::errors::{Error, Result};
use hr_simulator::generator::{FixedClock, HeartRateModel, SystemClock};
use hr_simulator::publisher::{Delivery, Publisher};
use hr_simulator::runner::{run, RunSummary};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rumqttc::{ConnectionError, QoS};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct PublishCall {
    topic: String,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Behaviour {
    Acknowledge,
    TimeOut,
    FailConnect,
    FailPublishAfter(usize),
}

/// Records every call; cancels `shutdown` once `stop_after` publishes went out.
struct MockPublisher {
    behaviour: Behaviour,
    stop_after: usize,
    shutdown: CancellationToken,
    calls: Arc<Mutex<Vec<PublishCall>>>,
    connects: usize,
    disconnects: usize,
}

impl MockPublisher {
    fn new(behaviour: Behaviour, stop_after: usize, shutdown: CancellationToken) -> Self {
        Self {
            behaviour,
            stop_after,
            shutdown,
            calls: Arc::new(Mutex::new(Vec::new())),
            connects: 0,
            disconnects: 0,
        }
    }

    fn calls(&self) -> Vec<PublishCall> {
        self.calls.lock().unwrap().clone()
    }
}

fn transport_failure() -> Error {
    Error::Connection(ConnectionError::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    )))
}

impl Publisher for MockPublisher {
    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        if self.behaviour == Behaviour::FailConnect {
            return Err(transport_failure());
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        timeout: Duration,
    ) -> Result<Delivery> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(PublishCall {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
                timeout,
            });
            calls.len()
        };

        if count >= self.stop_after {
            self.shutdown.cancel();
        }

        match self.behaviour {
            Behaviour::Acknowledge => Ok(Delivery::Acknowledged),
            Behaviour::TimeOut => Ok(Delivery::TimedOut),
            Behaviour::FailPublishAfter(n) if count > n => Err(transport_failure()),
            Behaviour::FailPublishAfter(_) => Ok(Delivery::Acknowledged),
            Behaviour::FailConnect => unreachable!("publish after failed connect"),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnects += 1;
        Ok(())
    }
}

fn fast_config() -> Config {
    Config {
        interval_ms: 5,
        ..Config::default()
    }
}

fn is_iso_seconds(timestamp: &str) -> bool {
    timestamp.len() == 20
        && timestamp.ends_with('Z')
        && NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%SZ").is_ok()
}

async fn run_with(publisher: &mut MockPublisher, shutdown: CancellationToken) -> Result<RunSummary> {
    let model = HeartRateModel::resting().unwrap();
    let mut rng = StdRng::seed_from_u64(72);
    run(&fast_config(), publisher, &model, &SystemClock, &mut rng, shutdown).await
}

#[tokio::test]
async fn test_single_iteration_publishes_one_reading() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::Acknowledge, 1, shutdown.clone());

    let summary = run_with(&mut publisher, shutdown).await.unwrap();

    let calls = publisher.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        summary,
        RunSummary {
            published: 1,
            acknowledged: 1,
            timed_out: 0,
        }
    );

    let call = &calls[0];
    assert_eq!(call.topic, "devices/hr_sim/telemetry");
    assert_eq!(call.qos, QoS::AtLeastOnce);
    assert!(!call.retain);
    assert_eq!(call.timeout, Duration::from_secs(2));

    let value: serde_json::Value = serde_json::from_slice(&call.payload).unwrap();
    let fields = value.as_object().unwrap();
    assert_eq!(fields.len(), 2);

    let bpm = fields["simulated_hr_bpm"].as_u64().expect("integer heart rate");
    assert!((40..=180).contains(&bpm));

    let timestamp = fields["timestamp"].as_str().expect("string timestamp");
    assert!(is_iso_seconds(timestamp), "bad timestamp {}", timestamp);

    assert_eq!(publisher.connects, 1);
    assert_eq!(publisher.disconnects, 1);
}

#[tokio::test]
async fn test_connect_failure_publishes_nothing() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::FailConnect, 1, shutdown.clone());

    let result = run_with(&mut publisher, shutdown).await;

    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(publisher.calls().is_empty());
    assert_eq!(publisher.disconnects, 0);
}

#[tokio::test]
async fn test_publish_failure_is_fatal() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::FailPublishAfter(2), 10, shutdown.clone());

    let result = run_with(&mut publisher, shutdown).await;

    assert!(matches!(result, Err(Error::Connection(_))));
    assert_eq!(publisher.calls().len(), 3);
    assert_eq!(publisher.disconnects, 0);
}

#[tokio::test]
async fn test_timeouts_are_counted_not_fatal() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::TimeOut, 3, shutdown.clone());

    let summary = run_with(&mut publisher, shutdown).await.unwrap();

    assert_eq!(
        summary,
        RunSummary {
            published: 3,
            acknowledged: 0,
            timed_out: 3,
        }
    );
    assert_eq!(publisher.disconnects, 1);
}

#[tokio::test]
async fn test_every_reading_in_range() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::Acknowledge, 20, shutdown.clone());

    run_with(&mut publisher, shutdown).await.unwrap();

    let calls = publisher.calls();
    assert_eq!(calls.len(), 20);
    for call in calls {
        let value: serde_json::Value = serde_json::from_slice(&call.payload).unwrap();
        let bpm = value["simulated_hr_bpm"].as_u64().unwrap();
        assert!((40..=180).contains(&bpm));
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let mut publisher = MockPublisher::new(Behaviour::Acknowledge, 1, shutdown.clone());

    let summary = run_with(&mut publisher, shutdown).await.unwrap();

    assert_eq!(summary, RunSummary::default());
    assert_eq!(publisher.connects, 0);
    assert!(publisher.calls().is_empty());
}

#[tokio::test]
async fn test_fixed_clock_timestamp_in_payload() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::Acknowledge, 1, shutdown.clone());
    let clock = FixedClock(Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap());
    let model = HeartRateModel::resting().unwrap();
    let mut rng = StdRng::seed_from_u64(5);

    run(&fast_config(), &mut publisher, &model, &clock, &mut rng, shutdown)
        .await
        .unwrap();

    let value: serde_json::Value = serde_json::from_slice(&publisher.calls()[0].payload).unwrap();
    assert_eq!(value["timestamp"], "2023-12-31T23:59:59Z");
}

#[tokio::test]
async fn test_invalid_qos_rejected_before_connect() {
    let shutdown = CancellationToken::new();
    let mut publisher = MockPublisher::new(Behaviour::Acknowledge, 1, shutdown.clone());
    let config = Config {
        qos: 7,
        ..fast_config()
    };
    let model = HeartRateModel::resting().unwrap();
    let mut rng = StdRng::seed_from_u64(5);

    let result = run(&config, &mut publisher, &model, &SystemClock, &mut rng, shutdown).await;

    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(publisher.connects, 0);
}
