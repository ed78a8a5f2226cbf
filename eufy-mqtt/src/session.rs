//! Boundary to the upstream device session
//!
//! The session owns the cloud connection and a live view of every station and
//! device. The gateway only ever holds [`DeviceRef`]s and asks the session for
//! current metadata and values each time it needs them.

use core::future::Future;
use std::collections::BTreeMap;

use compact_str::CompactString;
use eufy_mqtt_common::{DeviceRef, GuardMode, Parameter, PropertyDescriptor};

use crate::Result;

/// Property metadata of one device, by property name
pub type PropertiesMetadata = BTreeMap<CompactString, PropertyDescriptor>;

/// Descriptive details used for the discovery `device` block
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub device: DeviceRef,
    pub name: Option<CompactString>,
    pub model: Option<CompactString>,
    pub software_version: Option<CompactString>,
    pub mac_address: Option<CompactString>,
    /// Station a device is paired with
    pub station_serial: Option<CompactString>,
}

impl DeviceInfo {
    /// Info for a device the session has no details about
    pub fn bare(device: &DeviceRef) -> Self {
        Self {
            device: device.clone(),
            name: None,
            model: None,
            software_version: None,
            mac_address: None,
            station_serial: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Closed,
    Added(DeviceRef),
    Removed(DeviceRef),
    PropertyChanged {
        device: DeviceRef,
        name: CompactString,
        value: serde_json::Value,
    },
    GuardModeChanged {
        station: DeviceRef,
        guard_mode: i64,
    },
}

pub trait DeviceSession: Send + Sync + 'static {
    /// Resolves to whether the session came up
    fn connect(&self) -> impl Future<Output = Result<bool>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    fn device_info(&self, device: &DeviceRef) -> Option<DeviceInfo>;

    fn properties_metadata(&self, device: &DeviceRef) -> Option<PropertiesMetadata>;

    /// Current value, `None` when the device has not reported one
    fn property_value(&self, device: &DeviceRef, name: &str) -> Option<serde_json::Value>;

    fn set_parameters(
        &self,
        device: &DeviceRef,
        params: Vec<Parameter>,
    ) -> impl Future<Output = Result<()>> + Send;

    fn set_guard_mode(
        &self,
        station: &DeviceRef,
        mode: GuardMode,
    ) -> impl Future<Output = Result<()>> + Send;
}
