use core::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::sync::{Arc, Mutex, PoisonError};

use eufy_mqtt_common::STATUS_OFFLINE;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use tokio::{
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{Result, config::BrokerOptions};

/// How long [`Broker::disconnect`] waits for queued packets to go out
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Connected,
    Closed,
    Message { topic: String, payload: Vec<u8> },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishOpts {
    pub qos: QoS,
    pub retain: bool,
}

impl PublishOpts {
    /// Config, state and availability all go out the same way
    pub const fn entity_data(retain: bool) -> Self {
        Self { qos: QoS::AtLeastOnce, retain }
    }
}

pub trait Broker: Send + Sync + 'static {
    fn subscribe(&self, filter: &str) -> impl Future<Output = Result<()>> + Send;

    fn unsubscribe(&self, filter: &str) -> impl Future<Output = Result<()>> + Send;

    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        opts: PublishOpts,
    ) -> impl Future<Output = Result<()>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
}

/// MQTT broker link backed by rumqttc.
///
/// The event loop runs on its own task and reconnects by itself; the gateway
/// only observes [`BrokerEvent::Connected`] and [`BrokerEvent::Closed`].
pub struct MqttBroker {
    client: AsyncClient,
    closed: Arc<AtomicBool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    /// Starts connecting in the background. The last will marks `will_topic`
    /// offline if the link drops without a clean disconnect.
    pub fn connect(
        options: &BrokerOptions,
        will_topic: impl Into<String>,
    ) -> Result<(Self, UnboundedReceiver<BrokerEvent>)> {
        let (host, port) = options.address()?;

        let mut mqtt = MqttOptions::new(options.client_id(), host, port);
        mqtt.set_keep_alive(Duration::from_secs(30));
        mqtt.set_last_will(LastWill::new(
            will_topic,
            STATUS_OFFLINE,
            QoS::AtLeastOnce,
            options.retain,
        ));

        if let Some(username) = &options.username {
            mqtt.set_credentials(username, options.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(mqtt, 64);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let driver =
            tokio::spawn(drive(eventloop, tx, closed.clone(), options.reconnect_period()));

        Ok((Self { client, closed, driver: Mutex::new(Some(driver)) }, rx))
    }
}

async fn drive(
    mut eventloop: EventLoop,
    tx: UnboundedSender<BrokerEvent>,
    closed: Arc<AtomicBool>,
    reconnect_period: Duration,
) {
    let mut connected = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!("Received CONNACK: {connack:?}");
                connected = true;
                BrokerEvent::Connected
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => BrokerEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            },
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                let _ = tx.send(BrokerEvent::Closed);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                if closed.load(Ordering::Relaxed) {
                    let _ = tx.send(BrokerEvent::Closed);
                    break;
                }

                if connected {
                    connected = false;
                    if tx.send(BrokerEvent::Closed).is_err() {
                        break;
                    }
                }

                if tx.send(BrokerEvent::Error(e.to_string())).is_err() {
                    break;
                }

                tokio::time::sleep(reconnect_period).await;
                continue;
            }
        };

        if tx.send(event).is_err() {
            tracing::debug!("Broker event receiver dropped, stopping event loop");
            break;
        }
    }
}

impl Broker for MqttBroker {
    async fn subscribe(&self, filter: &str) -> Result<()> {
        tracing::info!("Subscribing to topic '{filter}'");
        self.client.subscribe(filter, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client.unsubscribe(filter).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, opts: PublishOpts) -> Result<()> {
        self.client
            .publish(topic, opts.qos, opts.retain, payload)
            .await?;
        Ok(())
    }

    /// Queues a DISCONNECT behind everything already published, then waits
    /// for the event loop to flush it and stop
    async fn disconnect(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        self.client.disconnect().await?;

        let driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(driver) = driver
            && tokio::time::timeout(DISCONNECT_TIMEOUT, driver).await.is_err()
        {
            tracing::warn!("MQTT event loop still running after {DISCONNECT_TIMEOUT:?}");
        }

        Ok(())
    }
}
