use crate::errors::Result;
use rumqttc::QoS;
use std::future::Future;
use std::time::Duration;

/// Outcome of a publish that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Broker acknowledged the message (PUBACK, or PUBCOMP for QoS 2).
    Acknowledged,
    /// QoS 0: handed to the connection, nothing to wait for.
    Sent,
    /// No acknowledgment arrived within the publish timeout.
    TimedOut,
}

/// Transport the publish loop talks to. Implemented over MQTT by
/// [`crate::mqtt::MqttPublisher`]; tests substitute a recording mock.
pub trait Publisher {
    /// Waits until the broker has accepted the session.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Sends one message and waits at most `timeout` for its acknowledgment.
    /// Transport failures are errors; a missing acknowledgment is not.
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
        timeout: Duration,
    ) -> impl Future<Output = Result<Delivery>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;
}
