use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use compact_str::CompactString;
use eufy_mqtt::{DeviceInfo, DeviceSession, SessionEvent, session::PropertiesMetadata};
use eufy_mqtt_common::{DeviceRef, GuardMode, Parameter, PropertyKey, PropertyType, StateChannel};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    oneshot,
};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    Error, EufyWsOptions, Result,
    messages::{
        Command, Event, EventSource, PropertiesMetadataResult, PropertiesResult, Request,
        ResultMessage, ServerMessage, StartListeningResult,
    },
};

/// Client of an eufy-security-ws server
pub struct EufyWs {
    shared: Arc<Shared>,
}

struct Shared {
    options: EufyWsOptions,
    events: UnboundedSender<SessionEvent>,
    link: Mutex<Option<UnboundedSender<Message>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<ResultMessage>>>,
    devices: Mutex<BTreeMap<DeviceRef, CachedDevice>>,
    next_id: AtomicU32,
    /// Bumped whenever a connection is replaced, so the reader of an old one
    /// can tell it no longer matters
    generation: AtomicU64,
    connected: AtomicBool,
}

#[derive(Debug, Clone, Default)]
struct CachedDevice {
    metadata: PropertiesMetadata,
    values: HashMap<CompactString, Value>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EufyWs {
    pub fn new(options: EufyWsOptions) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            options,
            events,
            link: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            devices: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(1),
            generation: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        });

        (Self { shared }, rx)
    }
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("Session event receiver dropped");
        }
    }

    /// Drops the current connection without reporting it as lost
    fn teardown(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(false, Ordering::SeqCst);
        lock(&self.link).take();
        lock(&self.pending).clear();
        generation
    }

    fn connection_lost(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        tracing::warn!("Lost connection to eufy-security-ws");
        self.teardown();
        self.emit(SessionEvent::Closed);
    }

    async fn open(self: &Arc<Self>) -> Result<bool> {
        let generation = self.teardown();

        let (socket, response) = tokio_tungstenite::connect_async(self.options.url.as_str()).await?;
        tracing::debug!("WebSocket response: {response:?}");

        let (mut sink, mut stream) = socket.split();
        let (link_tx, mut link_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(msg) = link_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::error!("Error sending message to eufy-security-ws: {e}");
                    break;
                }
            }

            let _ = sink.close().await;
        });

        let shared = self.clone();
        tokio::spawn(async move {
            loop {
                let text = match stream.next().await {
                    Some(Ok(Message::Text(txt))) => txt,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {e}");
                        break;
                    }
                };

                tracing::trace!("<- {}", text.as_str());

                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => shared.dispatch(message),
                    Err(e) => tracing::warn!("Unrecognized message from eufy-security-ws: {e}"),
                }
            }

            shared.connection_lost(generation);
        });

        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(Error::Protocol("superseded by another connection".to_owned()));
        }
        *lock(&self.link) = Some(link_tx);

        self.request(Command::SetApiSchema { schema_version: self.options.schema_version })
            .await?;

        let listening: StartListeningResult =
            serde_json::from_value(self.request(Command::StartListening).await?)?;

        if !listening.state.driver.connected {
            tracing::warn!("eufy-security-ws is not connected to the cloud, asking it to connect");
            self.request(Command::DriverConnect).await?;
            return Ok(false);
        }

        let devices = listening
            .state
            .stations
            .iter()
            .map(DeviceRef::station)
            .chain(listening.state.devices.iter().map(DeviceRef::device))
            .collect::<Vec<_>>();

        let mut loaded = Vec::with_capacity(devices.len());
        for device in devices {
            match self.load(&device).await {
                Ok(()) => loaded.push(device),
                Err(e) => tracing::warn!("Failed to load {device}: {e}"),
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Listening to {} stations and devices", loaded.len());

        for device in loaded {
            self.emit(SessionEvent::Added(device));
        }

        Ok(true)
    }

    async fn request(&self, command: Command) -> Result<Value> {
        let name = command.name();
        let link = lock(&self.link).clone().ok_or(Error::NotConnected)?;

        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let text = serde_json::to_string(&Request { message_id: message_id.clone(), command })?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(message_id.clone(), tx);

        tracing::trace!("-> {text}");
        if link.send(Message::text(text)).is_err() {
            lock(&self.pending).remove(&message_id);
            return Err(Error::NotConnected);
        }

        let result = match tokio::time::timeout(self.options.request_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => return Err(Error::NotConnected),
            Err(_) => {
                lock(&self.pending).remove(&message_id);
                return Err(Error::Timeout(name));
            }
        };

        if !result.success {
            return Err(Error::Command {
                command: name,
                code: result.error_code.unwrap_or_else(|| "unknown error".to_owned()),
            });
        }

        Ok(result.result)
    }

    /// Fetches metadata and values of `device` into the cache
    async fn load(&self, device: &DeviceRef) -> Result<()> {
        let metadata: PropertiesMetadataResult =
            serde_json::from_value(self.request(Command::properties_metadata(device)).await?)?;
        let values: PropertiesResult =
            serde_json::from_value(self.request(Command::properties(device)).await?)?;

        tracing::debug!("{device} has {} properties", metadata.properties.len());

        lock(&self.devices).insert(device.clone(), CachedDevice {
            metadata: metadata.properties,
            values: values.properties,
        });

        Ok(())
    }

    fn dispatch(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::Version {
                driver_version,
                server_version,
                min_schema_version,
                max_schema_version,
            } => {
                tracing::info!(
                    "Connected to eufy-security-ws {server_version} (driver {driver_version})"
                );

                if !(min_schema_version..=max_schema_version).contains(&self.options.schema_version)
                {
                    tracing::warn!(
                        "Schema {} is outside the supported range {min_schema_version}..={max_schema_version}",
                        self.options.schema_version,
                    );
                }
            }
            ServerMessage::Result(result) => {
                let pending = lock(&self.pending).remove(&result.message_id);
                match pending {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => tracing::debug!("Result for unknown request {}", result.message_id),
                }
            }
            ServerMessage::Event { event } => self.handle_event(event),
        }
    }

    fn handle_event(self: &Arc<Self>, event: Event) {
        if event.source == EventSource::Driver {
            match event.event.as_str() {
                "connected" => {
                    self.connected.store(true, Ordering::SeqCst);
                    self.emit(SessionEvent::Connected);
                }
                "disconnected" => {
                    self.connected.store(false, Ordering::SeqCst);
                    self.emit(SessionEvent::Closed);
                }
                other => tracing::trace!("Ignoring driver event {other}"),
            }
            return;
        }

        let Some(device) = event.subject() else {
            tracing::trace!("Ignoring {:?} event {}", event.source, event.event);
            return;
        };

        match event.event.as_str() {
            "property changed" => {
                let Some(name) = event.name else {
                    return;
                };

                if let Some(at) = event.timestamp {
                    tracing::trace!("{device} - {name} changed at {at}");
                }

                if let Some(cached) = lock(&self.devices).get_mut(&device) {
                    cached.values.insert(name.clone(), event.value.clone());
                }

                self.emit(SessionEvent::PropertyChanged { device, name, value: event.value });
            }
            "guard mode changed" => {
                if let Some(guard_mode) = event.guard_mode {
                    self.emit(SessionEvent::GuardModeChanged { station: device, guard_mode });
                }
            }
            "station added" | "device added" => {
                let this = self.clone();
                tokio::spawn(async move {
                    match this.load(&device).await {
                        Ok(()) => this.emit(SessionEvent::Added(device)),
                        Err(e) => tracing::warn!("Failed to load {device}: {e}"),
                    }
                });
            }
            "station removed" | "device removed" => {
                lock(&self.devices).remove(&device);
                self.emit(SessionEvent::Removed(device));
            }
            other => tracing::trace!("{device} - ignoring event {other}"),
        }
    }

    /// Property name and wire value for a parameter write
    fn resolve(
        &self,
        device: &DeviceRef,
        param: Parameter,
    ) -> eufy_mqtt::Result<(CompactString, Value)> {
        let devices = lock(&self.devices);
        let cached =
            devices.get(device).ok_or_else(|| eufy_mqtt::Error::UnknownDevice(device.clone()))?;

        let key = PropertyKey::Number(param.param_type);
        let property = cached.metadata.values().find(|p| p.key == key).ok_or_else(|| {
            eufy_mqtt::Error::Session(format!("{device} has no property with key {key}"))
        })?;

        // The server wants booleans for boolean properties, parameters use 1/0
        let value = match property.ty {
            PropertyType::Boolean => match param.param_value.as_i64() {
                Some(n) => Value::Bool(n != 0),
                None => param.param_value,
            },
            _ => param.param_value,
        };

        Ok((property.name.clone(), value))
    }
}

fn device_info(device: &DeviceRef, values: &HashMap<CompactString, Value>) -> DeviceInfo {
    let text = |name: &str| {
        values
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(CompactString::from)
    };

    DeviceInfo {
        name: text("name"),
        model: text("model"),
        software_version: text("softwareVersion"),
        mac_address: text("macAddress"),
        station_serial: match device.channel {
            StateChannel::Device => text("stationSerialNumber"),
            StateChannel::Station => None,
        },
        ..DeviceInfo::bare(device)
    }
}

impl DeviceSession for EufyWs {
    async fn connect(&self) -> eufy_mqtt::Result<bool> {
        tracing::info!("Connecting to eufy-security-ws at {}", self.shared.options.url);
        Ok(self.shared.open().await?)
    }

    async fn close(&self) {
        self.shared.teardown();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn device_info(&self, device: &DeviceRef) -> Option<DeviceInfo> {
        lock(&self.shared.devices).get(device).map(|cached| device_info(device, &cached.values))
    }

    fn properties_metadata(&self, device: &DeviceRef) -> Option<PropertiesMetadata> {
        lock(&self.shared.devices).get(device).map(|cached| cached.metadata.clone())
    }

    fn property_value(&self, device: &DeviceRef, name: &str) -> Option<Value> {
        lock(&self.shared.devices).get(device)?.values.get(name).cloned()
    }

    async fn set_parameters(
        &self,
        device: &DeviceRef,
        params: Vec<Parameter>,
    ) -> eufy_mqtt::Result<()> {
        for param in params {
            let (name, value) = self.shared.resolve(device, param)?;
            tracing::info!("Setting {device} {name} to {value}");
            self.shared.request(Command::set_property(device, name, value)).await?;
        }

        Ok(())
    }

    async fn set_guard_mode(&self, station: &DeviceRef, mode: GuardMode) -> eufy_mqtt::Result<()> {
        tracing::info!("Setting {station} guard mode to {mode}");
        self.shared
            .request(Command::StationSetGuardMode {
                serial_number: station.serial.clone(),
                mode: mode.code(),
            })
            .await?;

        Ok(())
    }
}
