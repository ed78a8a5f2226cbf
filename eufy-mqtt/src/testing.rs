//! In-memory session and broker for driving the gateway in tests

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use compact_str::CompactString;
use eufy_mqtt_common::{
    DeviceRef, GuardMode, Parameter, PropertyDescriptor, PropertyKey, PropertyType,
};
use serde_json::Value;

use crate::{
    Broker, DeviceInfo, DeviceSession, Error, PublishOpts, Result, classifier::GUARD_MODE_KEY,
    session::PropertiesMetadata,
};

pub fn descriptor(name: &str, key: i64, ty: PropertyType, writeable: bool) -> PropertyDescriptor {
    PropertyDescriptor {
        name: name.into(),
        key: PropertyKey::Number(key),
        ty,
        label: name.into(),
        unit: None,
        writeable,
        states: None,
    }
}

/// A property keyed by its own name, like the ones upstream synthesizes
pub fn named_descriptor(name: &str, ty: PropertyType, writeable: bool) -> PropertyDescriptor {
    PropertyDescriptor { key: PropertyKey::from(name), ..descriptor(name, 0, ty, writeable) }
}

struct FakeDevice {
    info: DeviceInfo,
    metadata: PropertiesMetadata,
    values: HashMap<CompactString, Value>,
}

struct FakeState {
    devices: BTreeMap<DeviceRef, FakeDevice>,
    connected: bool,
    connect_result: bool,
    connects: usize,
    closes: usize,
    parameter_writes: Vec<(DeviceRef, Vec<Parameter>)>,
    guard_mode_writes: Vec<(DeviceRef, GuardMode)>,
}

#[derive(Clone)]
pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                devices: BTreeMap::new(),
                connected: false,
                connect_result: true,
                connects: 0,
                closes: 0,
                parameter_writes: Vec::new(),
                guard_mode_writes: Vec::new(),
            })),
        }
    }
}

impl FakeSession {
    /// Adds the device, or replaces its metadata keeping known values
    pub fn add_device(
        &self,
        device: &DeviceRef,
        properties: impl IntoIterator<Item = PropertyDescriptor>,
    ) {
        let metadata = properties.into_iter().map(|p| (p.name.clone(), p)).collect();

        let mut state = self.state.lock().unwrap();
        let entry = state.devices.entry(device.clone()).or_insert_with(|| FakeDevice {
            info: DeviceInfo {
                name: Some(format!("Device {}", device.serial).into()),
                model: Some("T8113".into()),
                ..DeviceInfo::bare(device)
            },
            metadata: PropertiesMetadata::new(),
            values: HashMap::new(),
        });
        entry.metadata = metadata;
    }

    pub fn remove_device(&self, device: &DeviceRef) {
        self.state.lock().unwrap().devices.remove(device);
    }

    pub fn set_value(&self, device: &DeviceRef, name: &str, value: Value) {
        let mut state = self.state.lock().unwrap();
        let device = state.devices.get_mut(device).unwrap();
        device.values.insert(name.into(), value);
    }

    pub fn set_connect_result(&self, connected: bool) {
        self.state.lock().unwrap().connect_result = connected;
    }

    /// Simulates the session dropping on its own
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().connected = false;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn parameter_writes(&self) -> Vec<(DeviceRef, Vec<Parameter>)> {
        self.state.lock().unwrap().parameter_writes.clone()
    }

    pub fn guard_mode_writes(&self) -> Vec<(DeviceRef, GuardMode)> {
        self.state.lock().unwrap().guard_mode_writes.clone()
    }

    fn store(&self, device: &DeviceRef, key: &PropertyKey, value: Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let device_state =
            state.devices.get_mut(device).ok_or_else(|| Error::UnknownDevice(device.clone()))?;

        let name = device_state
            .metadata
            .values()
            .find(|p| &p.key == key)
            .map(|p| p.name.clone())
            .ok_or_else(|| Error::Session(format!("{device} has no property {key}")))?;

        device_state.values.insert(name, value);
        Ok(())
    }
}

impl DeviceSession for FakeSession {
    async fn connect(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        state.connected = state.connect_result;
        Ok(state.connected)
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn device_info(&self, device: &DeviceRef) -> Option<DeviceInfo> {
        self.state.lock().unwrap().devices.get(device).map(|d| d.info.clone())
    }

    fn properties_metadata(&self, device: &DeviceRef) -> Option<PropertiesMetadata> {
        self.state.lock().unwrap().devices.get(device).map(|d| d.metadata.clone())
    }

    fn property_value(&self, device: &DeviceRef, name: &str) -> Option<Value> {
        self.state.lock().unwrap().devices.get(device)?.values.get(name).cloned()
    }

    async fn set_parameters(&self, device: &DeviceRef, params: Vec<Parameter>) -> Result<()> {
        for param in &params {
            self.store(device, &PropertyKey::Number(param.param_type), param.param_value.clone())?;
        }

        self.state.lock().unwrap().parameter_writes.push((device.clone(), params));
        Ok(())
    }

    async fn set_guard_mode(&self, station: &DeviceRef, mode: GuardMode) -> Result<()> {
        self.store(station, &PropertyKey::Number(GUARD_MODE_KEY), mode.code().into())?;
        self.state.lock().unwrap().guard_mode_writes.push((station.clone(), mode));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl Published {
    pub fn text(&self) -> &str {
        core::str::from_utf8(&self.payload).unwrap()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Default)]
struct BrokerLog {
    published: Vec<Published>,
    subscriptions: Vec<String>,
    failing: HashSet<String>,
    disconnects: usize,
}

#[derive(Clone, Default)]
pub struct RecordingBroker {
    log: Arc<Mutex<BrokerLog>>,
}

impl RecordingBroker {
    /// Everything published since the last call
    pub fn take(&self) -> Vec<Published> {
        core::mem::take(&mut self.log.lock().unwrap().published)
    }

    pub fn topics(&self) -> Vec<String> {
        self.take().into_iter().map(|p| p.topic).collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.log.lock().unwrap().subscriptions.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().unwrap().disconnects
    }

    /// Publishing to `topic` fails from now on
    pub fn fail_topic(&self, topic: &str) {
        self.log.lock().unwrap().failing.insert(topic.to_owned());
    }
}

impl Broker for RecordingBroker {
    async fn subscribe(&self, filter: &str) -> Result<()> {
        self.log.lock().unwrap().subscriptions.push(filter.to_owned());
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.log.lock().unwrap().subscriptions.retain(|s| s != filter);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, opts: PublishOpts) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        if log.failing.contains(topic) {
            return Err(Error::Session(format!("refusing to publish to {topic}")));
        }

        log.published.push(Published { topic: topic.to_owned(), payload, retain: opts.retain });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.log.lock().unwrap().disconnects += 1;
        Ok(())
    }
}
