//! Synchronization engine
//!
//! The gateway consumes two event streams, one from the upstream session and
//! one from the broker, and keeps the broker's view of every registered
//! component in line with the session.
//!
//! Registration is two-phase: all discovery configs for a device are
//! published before any of its states, with a settle delay in between so
//! the discovery consumer has created its entities by the time states arrive.
//! Registration, deregistration and property updates for one device are
//! serialized; different devices proceed independently.

use core::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use eufy_mqtt_common::{
    ComponentId, DeviceRef, GuardMode, PropertyKey, STATUS_OFFLINE, STATUS_ONLINE, Topic,
    TopicRoots,
};
use futures::future::join_all;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use crate::{
    Broker, BrokerEvent, DeviceInfo, DeviceSession, Error, GatewayOptions, PublishOpts, Result,
    SessionEvent, classifier::GUARD_MODE_KEY, components::Component,
    discovery::DescriptorBuilder, registry::Registry,
};

const CAMERA_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// What the gateway last told the broker about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Unknown,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpstreamLink {
    Disconnected,
    Connecting,
    Connected,
}

pub struct Gateway<S, B> {
    inner: Arc<Inner<S, B>>,
}

impl<S, B> Clone for Gateway<S, B> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

struct Inner<S, B> {
    session: S,
    broker: B,
    descriptors: DescriptorBuilder,
    publish_opts: PublishOpts,
    settle_delay: Duration,
    reconnect_period: Duration,
    http: reqwest::Client,
    registry: Mutex<Registry>,
    device_locks: Mutex<HashMap<DeviceRef, Arc<tokio::sync::Mutex<()>>>>,
    upstream: Mutex<UpstreamLink>,
    availability: Mutex<Availability>,
    closed: AtomicBool,
    reconnect: Mutex<Option<JoinHandle<()>>>,
}

/// None of the guarded state can be left half-updated, so a poisoned lock is
/// still usable
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn log_failures(what: &str, components: &[Arc<Component>], results: Vec<Result<()>>) {
    for (component, result) in components.iter().zip(results) {
        if let Err(e) = result {
            tracing::warn!("Failed to publish {what} for {}: {e}", component.id);
        }
    }
}

impl<S: DeviceSession, B: Broker> Gateway<S, B> {
    pub fn new(session: S, broker: B, options: &GatewayOptions) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(CAMERA_FETCH_TIMEOUT).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                session,
                broker,
                descriptors: options.descriptor_builder(),
                publish_opts: PublishOpts::entity_data(options.mqtt.retain),
                settle_delay: options.settle_delay(),
                reconnect_period: options.mqtt.reconnect_period(),
                http,
                registry: Mutex::new(Registry::new(options.classifier(), options.experimental)),
                device_locks: Mutex::new(HashMap::new()),
                upstream: Mutex::new(UpstreamLink::Disconnected),
                availability: Mutex::new(Availability::Unknown),
                closed: AtomicBool::new(false),
                reconnect: Mutex::new(None),
            }),
        })
    }

    pub fn roots(&self) -> &TopicRoots {
        self.inner.descriptors.roots()
    }

    pub fn availability(&self) -> Availability {
        *lock(&self.inner.availability)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn component(&self, id: &ComponentId) -> Option<Arc<Component>> {
        lock(&self.inner.registry).get(id)
    }

    /// Dispatches events until `shutdown` resolves, then shuts down.
    ///
    /// Link state events are handled in place so they apply in arrival
    /// order. Device work and the upstream connect run in their own tasks.
    pub async fn run(
        self,
        mut session_events: UnboundedReceiver<SessionEvent>,
        mut broker_events: UnboundedReceiver<BrokerEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(event) = session_events.recv() => match event {
                    // Link state is applied in arrival order
                    SessionEvent::Connected | SessionEvent::Closed => {
                        self.handle_session_event(event).await;
                    }
                    event => {
                        let this = self.clone();
                        tokio::spawn(async move { this.handle_session_event(event).await });
                    }
                },
                Some(event) = broker_events.recv() => match event {
                    BrokerEvent::Connected => {
                        tracing::info!("Connected to MQTT broker");
                        self.subscribe().await;

                        let this = self.clone();
                        tokio::spawn(async move { this.connect().await });
                    }
                    event => {
                        let this = self.clone();
                        tokio::spawn(async move { this.handle_broker_event(event).await });
                    }
                },
            }
        }

        self.shutdown().await;
    }

    pub async fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected => {
                tracing::info!("Connected to Eufy Security");
                *lock(&self.inner.upstream) = UpstreamLink::Connected;
                self.publish_availability(true).await;
            }
            SessionEvent::Closed => {
                tracing::info!("Disconnected from Eufy Security");
                *lock(&self.inner.upstream) = UpstreamLink::Disconnected;
                self.publish_availability(false).await;
                self.schedule_reconnect();
            }
            SessionEvent::Added(device) => {
                tracing::info!("{device} - registered");
                self.register_device(&device).await;
            }
            SessionEvent::Removed(device) => {
                tracing::info!("{device} - deregistered");
                self.deregister_device(&device).await;
            }
            SessionEvent::PropertyChanged { device, name, value } => {
                tracing::debug!("{device} - property {name} changed to {value}");
                self.update_property(&device, &name).await;
            }
            SessionEvent::GuardModeChanged { station, guard_mode } => {
                match GuardMode::from_code(guard_mode) {
                    Some(mode) => tracing::info!("{station} - guard mode changed to {mode}"),
                    None => tracing::info!("{station} - guard mode changed to {guard_mode}"),
                }

                let guard_key = PropertyKey::Number(GUARD_MODE_KEY);
                let component = lock(&self.inner.registry)
                    .for_device(&station)
                    .into_iter()
                    .find(|c| c.property.key == guard_key);

                if let Some(component) = component {
                    self.update(&component).await;
                }
            }
        }
    }

    pub async fn handle_broker_event(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected => {
                tracing::info!("Connected to MQTT broker");
                self.subscribe().await;
                self.connect().await;
            }
            BrokerEvent::Closed => tracing::info!("Disconnected from MQTT broker"),
            BrokerEvent::Message { topic, payload } => self.handle_message(&topic, &payload).await,
            BrokerEvent::Error(e) => tracing::error!("MQTT error: {e}"),
        }
    }

    async fn subscribe(&self) {
        for topic in [Topic::DiscoveryStatus, Topic::COMMAND_WILDCARD] {
            let filter = self.roots().render(&topic);
            if let Err(e) = self.inner.broker.subscribe(&filter).await {
                tracing::warn!("Failed to subscribe to {filter}: {e}");
            }
        }
    }

    /// Brings the upstream session up, then marks the gateway online. On
    /// failure the session is closed and another attempt scheduled.
    pub async fn connect(&self) {
        if self.is_closed() {
            return;
        }

        if self.inner.session.is_connected() {
            *lock(&self.inner.upstream) = UpstreamLink::Connected;
            self.publish_availability(true).await;
            return;
        }

        {
            let mut upstream = lock(&self.inner.upstream);
            if *upstream == UpstreamLink::Connecting {
                tracing::debug!("Already connecting to Eufy Security");
                return;
            }
            *upstream = UpstreamLink::Connecting;
        }

        tracing::info!("Connecting to Eufy Security...");
        let connected = match self.inner.session.connect().await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::error!("{e}");
                false
            }
        };

        if connected {
            *lock(&self.inner.upstream) = UpstreamLink::Connected;
            self.publish_availability(true).await;
            return;
        }

        tracing::error!("Could not connect to Eufy Security");
        *lock(&self.inner.upstream) = UpstreamLink::Disconnected;
        self.inner.session.close().await;
        self.publish_availability(false).await;
        self.schedule_reconnect();
    }

    /// At most one attempt is pending at a time
    fn schedule_reconnect(&self) {
        if self.is_closed() {
            return;
        }

        let mut pending = lock(&self.inner.reconnect);
        if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
            tracing::debug!("Reconnect already scheduled");
            return;
        }

        let period = self.inner.reconnect_period;
        tracing::info!("Reconnecting to Eufy Security in {period:?}");

        let this = self.clone();
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(period).await;
            lock(&this.inner.reconnect).take();
            this.connect().await;
        }));
    }

    /// Closes both links for good. Pending reconnects are cancelled and no
    /// new ones are scheduled.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Shutting down");

        let pending = lock(&self.inner.reconnect).take();
        if let Some(handle) = pending {
            handle.abort();
        }

        self.inner.session.close().await;
        *lock(&self.inner.upstream) = UpstreamLink::Disconnected;
        self.publish_availability(false).await;

        if let Err(e) = self.inner.broker.disconnect().await {
            tracing::warn!("Failed to disconnect from MQTT broker: {e}");
        }
    }

    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<()> {
        let topic = self.roots().render(topic);
        let len = payload.len();

        match self.inner.broker.publish(&topic, payload, self.inner.publish_opts).await {
            Ok(()) => {
                tracing::debug!("Published message - {topic} ({len} bytes)");
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Publish failed - {topic} ({len} bytes)");
                Err(e)
            }
        }
    }

    async fn publish_availability(&self, online: bool) {
        let (availability, payload) = match online {
            true => (Availability::Online, STATUS_ONLINE),
            false => (Availability::Offline, STATUS_OFFLINE),
        };
        *lock(&self.inner.availability) = availability;

        if let Err(e) = self.publish(&Topic::Availability, payload.into()).await {
            tracing::warn!("Failed to publish availability: {e}");
        }
    }

    fn device_lock(&self, device: &DeviceRef) -> Arc<tokio::sync::Mutex<()>> {
        lock(&self.inner.device_locks).entry(device.clone()).or_default().clone()
    }

    fn device_info(&self, device: &DeviceRef) -> DeviceInfo {
        self.inner.session.device_info(device).unwrap_or_else(|| DeviceInfo::bare(device))
    }

    async fn publish_config(&self, component: &Component, info: DeviceInfo) -> Result<()> {
        let descriptor = self.inner.descriptors.build(component, info);
        let payload = serde_json::to_vec(&descriptor)?;

        self.publish(&Topic::Config { kind: component.kind, id: component.id.clone() }, payload)
            .await
    }

    async fn clear_config(&self, component: &Component) -> Result<()> {
        self.publish(
            &Topic::Config { kind: component.kind, id: component.id.clone() },
            b"{}".to_vec(),
        )
        .await
    }

    /// Publishes the component's current state. Failures are logged and end here.
    pub async fn update(&self, component: &Component) {
        let state = match component.state(&self.inner.session, &self.inner.http).await {
            Ok(Some(state)) => state,
            Ok(None) => return,
            Err(Error::PropertyUnavailable(id)) => {
                tracing::debug!("{id} has no current value, skipping");
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}", component.id);
                return;
            }
        };

        if let Err(e) = self.publish(&Topic::State(component.id.clone()), state.into_bytes()).await {
            tracing::warn!("Failed to publish state for {}: {e}", component.id);
        }
    }

    /// Creates and announces components for every exposed property of
    /// `device`. Re-registering is safe: existing components are reused and
    /// ones whose property disappeared are deregistered first.
    pub async fn register_device(&self, device: &DeviceRef) {
        let device_lock = self.device_lock(device);
        let _guard = device_lock.lock().await;

        let Some(metadata) = self.inner.session.properties_metadata(device) else {
            tracing::warn!("{device} has no property metadata, not registering");
            return;
        };

        let stale = lock(&self.inner.registry)
            .for_device(device)
            .into_iter()
            .filter(|c| {
                !metadata.values().any(|property| ComponentId::new(device, property) == c.id)
            })
            .collect::<Vec<_>>();

        if !stale.is_empty() {
            let results = join_all(stale.iter().map(|c| self.clear_config(c))).await;
            log_failures("empty config", &stale, results);

            let mut registry = lock(&self.inner.registry);
            for component in &stale {
                tracing::debug!("Dropped {} {}", component.kind, component.id);
                registry.remove(device, &component.property);
            }
        }

        let components = {
            let mut registry = lock(&self.inner.registry);
            metadata
                .values()
                .filter_map(|property| registry.get_or_create(device, property))
                .collect::<Vec<_>>()
        };

        let info = self.device_info(device);
        let results =
            join_all(components.iter().map(|c| self.publish_config(c, info.clone()))).await;
        log_failures("config", &components, results);

        tokio::time::sleep(self.inner.settle_delay).await;

        join_all(components.iter().map(|c| self.update(c))).await;

        self.publish_availability(true).await;
    }

    /// Retracts every component of `device`. Safe to call for unknown devices.
    pub async fn deregister_device(&self, device: &DeviceRef) {
        let device_lock = self.device_lock(device);
        let _guard = device_lock.lock().await;

        let components = lock(&self.inner.registry).for_device(device);
        if components.is_empty() {
            tracing::debug!("{device} has no registered components");
            return;
        }

        let results = join_all(components.iter().map(|c| self.clear_config(c))).await;
        log_failures("empty config", &components, results);

        let mut registry = lock(&self.inner.registry);
        for component in &components {
            registry.remove(device, &component.property);
        }
    }

    pub async fn update_property(&self, device: &DeviceRef, name: &str) {
        let device_lock = self.device_lock(device);
        let _guard = device_lock.lock().await;

        let component = lock(&self.inner.registry).find(device, name);
        match component {
            Some(component) => self.update(&component).await,
            None => tracing::trace!("{device} - no component for property {name}"),
        }
    }

    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let payload = String::from_utf8_lossy(payload);
        tracing::debug!("Received message from MQTT broker - {topic} - {payload}");

        match self.roots().parse(topic) {
            Ok(Topic::DiscoveryStatus) => self.handle_liveness(&payload).await,
            Ok(Topic::Command(id)) => self.handle_command(&id, &payload).await,
            Ok(_) => tracing::debug!("Ignoring message on {topic}"),
            Err(expected) => tracing::debug!("Ignoring message on {topic}, expected {expected}"),
        }
    }

    async fn handle_liveness(&self, payload: &str) {
        match payload {
            STATUS_ONLINE => {
                tracing::info!("Home Assistant is back online");
                self.republish_all().await;
            }
            STATUS_OFFLINE => tracing::info!("Home Assistant has gone offline"),
            other => tracing::warn!("Home Assistant is in an unknown state: {other}"),
        }
    }

    async fn handle_command(&self, id: &ComponentId, payload: &str) {
        let Some(component) = self.component(id) else {
            tracing::debug!("No component {id}, ignoring command");
            return;
        };

        tracing::info!("Updating {} {}: {payload}", component.kind, component.id);

        match component.write(&self.inner.session, payload).await {
            Ok(()) => {}
            Err(e @ Error::InvalidCommand { .. }) => tracing::warn!("{e}"),
            Err(e) => tracing::error!("Failed to update {}: {e}", component.id),
        }
    }

    /// Announces every component again, for a discovery consumer that lost
    /// its state
    pub async fn republish_all(&self) {
        let components = lock(&self.inner.registry).all();

        let results = join_all(
            components
                .iter()
                .map(|c| self.publish_config(c, self.device_info(&c.device))),
        )
        .await;
        log_failures("config", &components, results);

        tokio::time::sleep(self.inner.settle_delay).await;

        join_all(components.iter().map(|c| self.update(c))).await;

        match self.availability() {
            Availability::Online => self.publish_availability(true).await,
            Availability::Offline => self.publish_availability(false).await,
            Availability::Unknown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use eufy_mqtt_common::{Parameter, PropertyDescriptor, PropertyType};
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::testing::{
        FakeSession, Published, RecordingBroker, descriptor, named_descriptor,
    };

    type TestGateway = Gateway<FakeSession, RecordingBroker>;

    const MOTION_CONFIG: &str =
        "homeassistant/binary_sensor/device_T8113P1021_motionDetected/config";
    const BATTERY_CONFIG: &str = "homeassistant/sensor/device_T8113P1021_battery/config";
    const MOTION_STATE: &str = "eufysecurity/state/device_T8113P1021_motionDetected";
    const BATTERY_STATE: &str = "eufysecurity/state/device_T8113P1021_battery";
    const AVAILABILITY: &str = "eufysecurity/status";

    fn setup(options: GatewayOptions) -> (TestGateway, FakeSession, RecordingBroker) {
        let session = FakeSession::default();
        let broker = RecordingBroker::default();
        let gateway = Gateway::new(session.clone(), broker.clone(), &options).unwrap();
        (gateway, session, broker)
    }

    /// Read-only motion flag, battery level and the device name
    fn camera(session: &FakeSession) -> DeviceRef {
        let device = DeviceRef::device("T8113P1021");
        let motion = PropertyDescriptor {
            key: PropertyKey::from("custom_motionDetected"),
            ..named_descriptor("motionDetected", PropertyType::Boolean, false)
        };
        let name = PropertyDescriptor {
            key: PropertyKey::from("device_name"),
            ..named_descriptor("name", PropertyType::String, false)
        };

        session.add_device(&device, [
            motion,
            descriptor("battery", 1101, PropertyType::Number, false),
            name,
        ]);
        session.set_value(&device, "motionDetected", json!(true));
        session.set_value(&device, "battery", json!(87));
        session.set_value(&device, "name", json!("Front Door"));

        device
    }

    fn sorted(published: &[Published]) -> Vec<&str> {
        let mut topics = published.iter().map(|p| p.topic.as_str()).collect::<Vec<_>>();
        topics.sort_unstable();
        topics
    }

    fn payload<'a>(published: &'a [Published], topic: &str) -> &'a str {
        published.iter().find(|p| p.topic == topic).unwrap().text()
    }

    #[tokio::test(start_paused = true)]
    async fn registration_publishes_configs_before_states() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);

        gateway.register_device(&device).await;

        let published = broker.take();
        assert_eq!(published.len(), 5);
        assert_eq!(sorted(&published[..2]), [MOTION_CONFIG, BATTERY_CONFIG]);
        assert_eq!(sorted(&published[2..4]), [BATTERY_STATE, MOTION_STATE]);
        assert_eq!(published[4].topic, AVAILABILITY);
        assert!(published.iter().all(|p| p.retain));

        assert_eq!(payload(&published, MOTION_STATE), "on");
        assert_eq!(payload(&published, BATTERY_STATE), "87");
        assert_eq!(payload(&published, AVAILABILITY), "online");

        let config = published.iter().find(|p| p.topic == BATTERY_CONFIG).unwrap().json();
        assert_eq!(config["unique_id"], json!("device_T8113P1021_battery"));
        assert_eq!(config["state_topic"], json!(BATTERY_STATE));
        assert_eq!(config["device"]["name"], json!("Device T8113P1021"));
        assert_eq!(gateway.availability(), Availability::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_separates_configs_from_states() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);

        let task = tokio::spawn({
            let gateway = gateway.clone();
            let device = device.clone();
            async move { gateway.register_device(&device).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sorted(&broker.take()), [MOTION_CONFIG, BATTERY_CONFIG]);

        task.await.unwrap();
        assert_eq!(broker.take().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn omitted_properties_are_never_published() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);

        gateway.register_device(&device).await;
        gateway.handle_message("homeassistant/status", b"online").await;

        assert!(broker.topics().iter().all(|topic| !topic.contains("device_T8113P1021_name")));
        assert!(gateway.component(&ComponentId::from("device_T8113P1021_name")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_online_republishes_everything_once() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);
        gateway.register_device(&device).await;
        broker.take();

        gateway.handle_message("homeassistant/status", b"online").await;

        let published = broker.take();
        assert_eq!(sorted(&published[..2]), [MOTION_CONFIG, BATTERY_CONFIG]);
        assert_eq!(sorted(&published[2..4]), [BATTERY_STATE, MOTION_STATE]);
        assert_eq!(published[4].topic, AVAILABILITY);
        assert_eq!(published.len(), 5);

        gateway.handle_message("homeassistant/status", b"offline").await;
        gateway.handle_message("homeassistant/status", b"rebooting").await;
        assert!(broker.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deregistering_twice_publishes_once() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);
        gateway.register_device(&device).await;
        broker.take();

        gateway.handle_session_event(SessionEvent::Removed(device.clone())).await;
        let published = broker.take();
        assert_eq!(sorted(&published), [MOTION_CONFIG, BATTERY_CONFIG]);
        assert!(published.iter().all(|p| p.text() == "{}"));

        gateway.deregister_device(&device).await;
        assert!(broker.take().is_empty());

        gateway
            .handle_session_event(SessionEvent::PropertyChanged {
                device: device.clone(),
                name: "battery".into(),
                value: json!(86),
            })
            .await;
        assert!(broker.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deregistration_waits_for_a_running_registration() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);

        let register = tokio::spawn({
            let gateway = gateway.clone();
            let device = device.clone();
            async move { gateway.register_device(&device).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;

        let deregister = tokio::spawn({
            let gateway = gateway.clone();
            let device = device.clone();
            async move { gateway.deregister_device(&device).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sorted(&broker.take()), [MOTION_CONFIG, BATTERY_CONFIG]);

        register.await.unwrap();
        deregister.await.unwrap();

        let published = broker.take();
        assert_eq!(published.len(), 5);
        assert_eq!(sorted(&published[..2]), [BATTERY_STATE, MOTION_STATE]);
        assert_eq!(published[2].topic, AVAILABILITY);
        assert_eq!(sorted(&published[3..]), [MOTION_CONFIG, BATTERY_CONFIG]);
        assert!(published[3..].iter().all(|p| p.text() == "{}"));
        assert!(gateway.component(&ComponentId::from("device_T8113P1021_battery")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_camera_fetch_publishes_no_state() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = DeviceRef::device("T8113P1021");
        session.add_device(&device, [named_descriptor("cover_path", PropertyType::String, false)]);
        session.set_value(&device, "cover_path", json!("http://127.0.0.1:9/cover.jpg"));

        gateway.register_device(&device).await;

        assert_eq!(broker.topics(), [
            "homeassistant/camera/device_T8113P1021_cover_path/config",
            AVAILABILITY,
        ]);
        assert_eq!(gateway.availability(), Availability::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn property_changes_publish_state() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);
        gateway.register_device(&device).await;
        broker.take();

        session.set_value(&device, "motionDetected", json!(false));
        gateway
            .handle_session_event(SessionEvent::PropertyChanged {
                device: device.clone(),
                name: "motionDetected".into(),
                value: json!(false),
            })
            .await;

        let published = broker.take();
        assert_eq!(sorted(&published), [MOTION_STATE]);
        assert_eq!(published[0].text(), "off");

        gateway.update_property(&device, "wifiRssi").await;
        gateway.update_property(&DeviceRef::device("T0000"), "battery").await;
        assert!(broker.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn re_registration_prunes_stale_components() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);
        gateway.register_device(&device).await;
        broker.take();

        session.add_device(&device, [descriptor("battery", 1101, PropertyType::Number, false)]);
        gateway.register_device(&device).await;

        let published = broker.take();
        assert_eq!(published[0].topic, MOTION_CONFIG);
        assert_eq!(published[0].text(), "{}");
        assert_eq!(
            published[1..].iter().map(|p| p.topic.as_str()).collect::<Vec<_>>(),
            [BATTERY_CONFIG, BATTERY_STATE, AVAILABILITY]
        );
        assert!(
            gateway.component(&ComponentId::from("device_T8113P1021_motionDetected")).is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publishes_do_not_abort_the_batch() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);
        broker.fail_topic(MOTION_CONFIG);
        broker.fail_topic(BATTERY_STATE);

        gateway.register_device(&device).await;

        assert_eq!(broker.topics(), [BATTERY_CONFIG, MOTION_STATE, AVAILABILITY]);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_commands_round_trip() {
        let options = GatewayOptions { experimental: true, ..Default::default() };
        let (gateway, session, broker) = setup(options);
        let device = DeviceRef::device("T8113P1021");
        session.add_device(&device, [descriptor("enabled", 1013, PropertyType::Boolean, true)]);
        session.set_value(&device, "enabled", json!(false));

        gateway.register_device(&device).await;
        let published = broker.take();
        let config = published[0].json();
        assert_eq!(published[0].topic, "homeassistant/switch/device_T8113P1021_enabled/config");
        assert_eq!(config["command_topic"], json!("eufysecurity/command/device_T8113P1021_enabled"));
        assert_eq!(payload(&published, "eufysecurity/state/device_T8113P1021_enabled"), "off");

        gateway
            .handle_message("eufysecurity/command/device_T8113P1021_enabled", b"on")
            .await;
        assert_eq!(session.parameter_writes(), [(device.clone(), vec![Parameter {
            param_type: 1013,
            param_value: json!(1),
        }])]);

        gateway.update_property(&device, "enabled").await;
        assert_eq!(broker.take()[0].text(), "on");

        gateway
            .handle_message("eufysecurity/command/device_T8113P1021_enabled", b"toggle")
            .await;
        gateway.handle_message("eufysecurity/command/device_T0000_enabled", b"on").await;
        assert_eq!(session.parameter_writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn alarm_panel_commands() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let station = DeviceRef::station("T8010P0000000001");
        session.add_device(&station, [descriptor(
            "guardMode",
            GUARD_MODE_KEY,
            PropertyType::Number,
            true,
        )]);
        session.set_value(&station, "guardMode", json!(GuardMode::Disarmed.code()));

        gateway.register_device(&station).await;
        let published = broker.take();
        assert_eq!(
            published[0].topic,
            "homeassistant/alarm_control_panel/station_T8010P0000000001_guardMode/config"
        );
        assert_eq!(
            payload(&published, "eufysecurity/state/station_T8010P0000000001_guardMode"),
            "disarmed"
        );

        let command = "eufysecurity/command/station_T8010P0000000001_guardMode";
        gateway.handle_message(command, b"armed_home").await;
        gateway.handle_message(command, b"armed_night").await;
        assert_eq!(session.guard_mode_writes(), [(station.clone(), GuardMode::Home)]);

        gateway
            .handle_session_event(SessionEvent::GuardModeChanged {
                station: station.clone(),
                guard_mode: GuardMode::Home.code(),
            })
            .await;
        assert_eq!(broker.take()[0].text(), "armed_home");
    }

    #[tokio::test(start_paused = true)]
    async fn broker_connect_subscribes_then_connects_upstream() {
        let (gateway, session, broker) = setup(GatewayOptions::default());

        gateway.handle_broker_event(BrokerEvent::Connected).await;

        assert_eq!(broker.subscriptions(), ["homeassistant/status", "eufysecurity/command/+"]);
        assert_eq!(session.connects(), 1);
        let published = broker.take();
        assert_eq!(published.len(), 1);
        assert_eq!(payload(&published, AVAILABILITY), "online");

        // A broker reconnect with the session still up only republishes availability
        gateway.handle_broker_event(BrokerEvent::Connected).await;
        assert_eq!(session.connects(), 1);
        assert_eq!(payload(&broker.take(), AVAILABILITY), "online");
    }

    #[tokio::test(start_paused = true)]
    async fn session_loss_schedules_a_reconnect() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        gateway.handle_broker_event(BrokerEvent::Connected).await;
        broker.take();

        session.drop_connection();
        gateway.handle_session_event(SessionEvent::Closed).await;
        assert_eq!(payload(&broker.take(), AVAILABILITY), "offline");
        assert_eq!(gateway.availability(), Availability::Offline);

        // A second close before the timer fires does not schedule another attempt
        gateway.handle_session_event(SessionEvent::Closed).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(session.connects(), 2);
        assert_eq!(gateway.availability(), Availability::Online);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_a_pending_reconnect() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        gateway.handle_broker_event(BrokerEvent::Connected).await;

        session.drop_connection();
        gateway.handle_session_event(SessionEvent::Closed).await;
        gateway.shutdown().await;
        broker.take();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.connects(), 1);
        assert_eq!(session.closes(), 1);
        assert_eq!(broker.disconnects(), 1);

        // Late events cannot revive it
        gateway.handle_session_event(SessionEvent::Closed).await;
        gateway.connect().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.connects(), 1);
        assert!(broker.take().iter().all(|p| p.text() == "offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_closes_and_retries() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        session.set_connect_result(false);

        gateway.handle_broker_event(BrokerEvent::Connected).await;
        assert_eq!(session.connects(), 1);
        assert_eq!(session.closes(), 1);
        assert_eq!(payload(&broker.take(), AVAILABILITY), "offline");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(session.connects(), 2);
        assert_eq!(session.closes(), 2);

        session.set_connect_result(true);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(session.connects(), 3);
        assert_eq!(gateway.availability(), Availability::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn run_dispatches_until_shutdown() {
        let (gateway, session, broker) = setup(GatewayOptions::default());
        let device = camera(&session);

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (broker_tx, broker_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(gateway.clone().run(session_rx, broker_rx, async {
            let _ = stop_rx.await;
        }));

        broker_tx.send(BrokerEvent::Connected).unwrap();
        session_tx.send(SessionEvent::Added(device)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(session.connects(), 1);
        assert!(broker.topics().iter().any(|topic| topic == BATTERY_STATE));

        stop_tx.send(()).unwrap();
        task.await.unwrap();

        assert!(gateway.is_closed());
        assert_eq!(session.closes(), 1);
        assert_eq!(broker.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_applies_link_changes_in_order() {
        let (gateway, _session, broker) = setup(GatewayOptions::default());

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (_broker_tx, broker_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(gateway.clone().run(session_rx, broker_rx, async {
            let _ = stop_rx.await;
        }));

        session_tx.send(SessionEvent::Closed).unwrap();
        session_tx.send(SessionEvent::Connected).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let availability = broker
            .take()
            .into_iter()
            .filter(|p| p.topic == AVAILABILITY)
            .map(|p| p.text().to_owned())
            .collect::<Vec<_>>();
        assert_eq!(availability, ["offline", "online"]);
        assert_eq!(gateway.availability(), Availability::Online);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
