use crate::config::Config;
use crate::errors::{Error, Result};
use crate::publisher::{Delivery, Publisher};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, TlsConfiguration, Transport,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const EVENT_CHANNEL_CAPACITY: usize = 64;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// What the connection driver reports back to the publisher.
#[derive(Debug)]
enum DriverEvent {
    Sent(u16),
    Acked(u16),
    Failed(ConnectionError),
}

struct Session {
    events: mpsc::Receiver<DriverEvent>,
    driver: JoinHandle<()>,
    acks: AckTracker,
}

/// Pairs outgoing packet ids with acknowledgments across publishes.
/// `unclaimed_sends` counts publishes that returned before the driver
/// reported their packet id; that many `Sent` events belong to nobody.
#[derive(Debug, Default)]
struct AckTracker {
    pending: Option<u16>,
    unclaimed_sends: usize,
}

impl AckTracker {
    /// Returns true once the pending publish is acknowledged.
    fn observe(&mut self, event: DriverEvent) -> Result<bool> {
        match event {
            DriverEvent::Sent(pkid) if self.unclaimed_sends > 0 => {
                self.unclaimed_sends -= 1;
                debug!("Skipping packet {} of an abandoned publish", pkid);
                Ok(false)
            }
            DriverEvent::Sent(pkid) => {
                self.pending = Some(pkid);
                Ok(false)
            }
            DriverEvent::Acked(pkid) if self.pending == Some(pkid) => {
                self.pending = None;
                Ok(true)
            }
            DriverEvent::Acked(pkid) => {
                debug!("Ignoring stale acknowledgment for packet {}", pkid);
                Ok(false)
            }
            DriverEvent::Failed(e) => Err(Error::Connection(e)),
        }
    }

    /// The current publish stopped waiting.
    fn abandon(&mut self) {
        if self.pending.take().is_none() {
            self.unclaimed_sends += 1;
        }
    }
}

/// [`Publisher`] backed by a rumqttc client. One connection per instance,
/// never re-established.
pub struct MqttPublisher {
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    session: Option<Session>,
    endpoint: String,
}

impl MqttPublisher {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mqtt_options = mqtt_options(config)?;
        let (host, port) = mqtt_options.broker_address();
        let endpoint = format!("{}:{}", host, port);
        let (client, eventloop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            eventloop: Some(eventloop),
            session: None,
            endpoint,
        })
    }
}

fn mqtt_options(config: &Config) -> Result<MqttOptions> {
    let broker = config.broker()?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, &broker.host, broker.port);
    mqtt_options.set_keep_alive(config.keep_alive());
    mqtt_options.set_clean_session(true);

    if broker.tls {
        mqtt_options.set_transport(Transport::Tls(tls_configuration(config)?));
    }

    Ok(mqtt_options)
}

fn tls_configuration(config: &Config) -> Result<TlsConfiguration> {
    let ca = read_pem(&config.trust_store_path)?;

    let client_auth = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert), Some(key)) => Some((read_pem(cert)?, read_pem(key)?)),
        (None, None) => None,
        _ => {
            return Err(Error::Config(
                "Client certificate and private key must be given together".to_string(),
            ))
        }
    };

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth,
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| Error::Credentials {
        path: path.to_path_buf(),
        source,
    })
}

impl Publisher for MqttPublisher {
    async fn connect(&mut self) -> Result<()> {
        let mut eventloop = self
            .eventloop
            .take()
            .ok_or_else(|| Error::Config("MQTT publisher can only connect once".to_string()))?;

        info!("Connecting to MQTT broker at {}", self.endpoint);

        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(connack)) => {
                    if connack.code != ConnectReturnCode::Success {
                        return Err(Error::ConnectRefused(connack.code));
                    }
                    debug!("CONNACK received, session present: {}", connack.session_present);
                    break;
                }
                event => debug!("MQTT event before CONNACK: {:?}", event),
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let driver = tokio::spawn(drive(eventloop, tx));
        self.session = Some(Session {
            events: rx,
            driver,
            acks: AckTracker::default(),
        });

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
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        drain_pending(&mut session.events, &mut session.acks)?;

        self.client.publish(topic, qos, retain, payload).await?;

        if qos == QoS::AtMostOnce {
            session.acks.abandon();
            return Ok(Delivery::Sent);
        }

        let wait = await_ack(&mut session.events, &mut session.acks);
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map(|()| Delivery::Acknowledged),
            Err(_) => {
                session.acks.abandon();
                Ok(Delivery::TimedOut)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut session = self.session.take().ok_or(Error::NotConnected)?;
        drain_pending(&mut session.events, &mut session.acks)?;

        self.client.disconnect().await?;

        match tokio::time::timeout(DISCONNECT_TIMEOUT, &mut session.driver).await {
            Ok(Ok(())) => info!("Disconnected from MQTT broker"),
            Ok(Err(e)) => warn!("Connection driver ended abnormally: {}", e),
            Err(_) => {
                warn!("DISCONNECT not flushed within {:?}, dropping connection", DISCONNECT_TIMEOUT);
                session.driver.abort();
            }
        }

        Ok(())
    }
}

/// Polls the eventloop for the lifetime of the connection. The first
/// eventloop error ends it; there is no reconnect.
async fn drive(mut eventloop: EventLoop, events: mpsc::Sender<DriverEvent>) {
    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => DriverEvent::Sent(pkid),
            Ok(Event::Incoming(Packet::PubAck(puback))) => DriverEvent::Acked(puback.pkid),
            Ok(Event::Incoming(Packet::PubComp(pubcomp))) => DriverEvent::Acked(pubcomp.pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent, stopping connection driver");
                return;
            }
            Ok(event) => {
                debug!("MQTT event: {:?}", event);
                continue;
            }
            Err(e) => {
                error!("MQTT eventloop error: {}", e);
                let _ = events.send(DriverEvent::Failed(e)).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            debug!("Publisher dropped, stopping connection driver");
            return;
        }
    }
}

/// Consumes events left over from earlier publishes, surfacing a transport
/// failure if the driver reported one.
fn drain_pending(events: &mut mpsc::Receiver<DriverEvent>, acks: &mut AckTracker) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(event) => {
                acks.observe(event)?;
            }
            Err(mpsc::error::TryRecvError::Empty) => {
                acks.pending = None;
                return Ok(());
            }
            Err(mpsc::error::TryRecvError::Disconnected) => return Err(Error::Disconnected),
        }
    }
}

/// Waits for the acknowledgment of the next outgoing publish.
async fn await_ack(events: &mut mpsc::Receiver<DriverEvent>, acks: &mut AckTracker) -> Result<()> {
    while let Some(event) = events.recv().await {
        if acks.observe(event)? {
            return Ok(());
        }
    }

    Err(Error::Disconnected)
}
