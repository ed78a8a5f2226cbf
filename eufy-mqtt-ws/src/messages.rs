use std::collections::HashMap;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use eufy_mqtt::session::PropertiesMetadata;
use eufy_mqtt_common::{DeviceRef, StateChannel};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Request {
    pub(crate) message_id: String,
    #[serde(flatten)]
    pub(crate) command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command")]
pub(crate) enum Command {
    #[serde(rename = "set_api_schema", rename_all = "camelCase")]
    SetApiSchema { schema_version: u32 },
    #[serde(rename = "start_listening")]
    StartListening,
    #[serde(rename = "driver.connect")]
    DriverConnect,
    #[serde(rename = "station.get_properties_metadata", rename_all = "camelCase")]
    StationPropertiesMetadata { serial_number: CompactString },
    #[serde(rename = "device.get_properties_metadata", rename_all = "camelCase")]
    DevicePropertiesMetadata { serial_number: CompactString },
    #[serde(rename = "station.get_properties", rename_all = "camelCase")]
    StationProperties { serial_number: CompactString },
    #[serde(rename = "device.get_properties", rename_all = "camelCase")]
    DeviceProperties { serial_number: CompactString },
    #[serde(rename = "station.set_property", rename_all = "camelCase")]
    StationSetProperty {
        serial_number: CompactString,
        name: CompactString,
        value: Value,
    },
    #[serde(rename = "device.set_property", rename_all = "camelCase")]
    DeviceSetProperty {
        serial_number: CompactString,
        name: CompactString,
        value: Value,
    },
    #[serde(rename = "station.set_guard_mode", rename_all = "camelCase")]
    StationSetGuardMode { serial_number: CompactString, mode: i64 },
}

impl Command {
    pub(crate) fn properties_metadata(device: &DeviceRef) -> Self {
        let serial_number = device.serial.clone();
        match device.channel {
            StateChannel::Station => Command::StationPropertiesMetadata { serial_number },
            StateChannel::Device => Command::DevicePropertiesMetadata { serial_number },
        }
    }

    pub(crate) fn properties(device: &DeviceRef) -> Self {
        let serial_number = device.serial.clone();
        match device.channel {
            StateChannel::Station => Command::StationProperties { serial_number },
            StateChannel::Device => Command::DeviceProperties { serial_number },
        }
    }

    pub(crate) fn set_property(device: &DeviceRef, name: CompactString, value: Value) -> Self {
        let serial_number = device.serial.clone();
        match device.channel {
            StateChannel::Station => Command::StationSetProperty { serial_number, name, value },
            StateChannel::Device => Command::DeviceSetProperty { serial_number, name, value },
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Command::SetApiSchema { .. } => "set_api_schema",
            Command::StartListening => "start_listening",
            Command::DriverConnect => "driver.connect",
            Command::StationPropertiesMetadata { .. } => "station.get_properties_metadata",
            Command::DevicePropertiesMetadata { .. } => "device.get_properties_metadata",
            Command::StationProperties { .. } => "station.get_properties",
            Command::DeviceProperties { .. } => "device.get_properties",
            Command::StationSetProperty { .. } => "station.set_property",
            Command::DeviceSetProperty { .. } => "device.set_property",
            Command::StationSetGuardMode { .. } => "station.set_guard_mode",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Version {
        driver_version: String,
        server_version: String,
        min_schema_version: u32,
        max_schema_version: u32,
    },
    Result(ResultMessage),
    Event {
        event: Event,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResultMessage {
    pub(crate) message_id: String,
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) result: Value,
    #[serde(default)]
    pub(crate) error_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EventSource {
    Driver,
    Station,
    Device,
    #[serde(other)]
    Other,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Event {
    pub(crate) source: EventSource,
    pub(crate) event: String,
    #[serde(default)]
    pub(crate) serial_number: Option<CompactString>,
    #[serde(default)]
    pub(crate) name: Option<CompactString>,
    #[serde(default)]
    pub(crate) value: Value,
    #[serde(default)]
    pub(crate) guard_mode: Option<i64>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub(crate) timestamp: Option<DateTime<Utc>>,
    /// Payload of `device added`/`device removed`
    #[serde(default)]
    pub(crate) device: Option<Serial>,
    /// Payload of `station added`/`station removed`
    #[serde(default)]
    pub(crate) station: Option<Serial>,
}

#[derive(Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Serial {
    pub(crate) serial_number: CompactString,
}

impl Event {
    /// The station or device the event is about
    pub(crate) fn subject(&self) -> Option<DeviceRef> {
        let channel = match self.source {
            EventSource::Station => StateChannel::Station,
            EventSource::Device => StateChannel::Device,
            EventSource::Driver | EventSource::Other => return None,
        };

        let serial = self
            .serial_number
            .as_ref()
            .or(self.device.as_ref().map(|d| &d.serial_number))
            .or(self.station.as_ref().map(|s| &s.serial_number))?;

        Some(DeviceRef { channel, serial: serial.clone() })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartListeningResult {
    pub(crate) state: ListeningState,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListeningState {
    pub(crate) driver: DriverState,
    #[serde(default)]
    pub(crate) stations: Vec<CompactString>,
    #[serde(default)]
    pub(crate) devices: Vec<CompactString>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DriverState {
    pub(crate) connected: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PropertiesMetadataResult {
    pub(crate) properties: PropertiesMetadata,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PropertiesResult {
    pub(crate) properties: HashMap<CompactString, Value>,
}
