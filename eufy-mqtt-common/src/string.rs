use core::{fmt::Display, ops::Deref, str::FromStr};

use compact_str::{CompactString, ToCompactString};
use serde::{Deserialize, Serialize};

use crate::PropertyDescriptor;

/// Which side of the upstream session an entity lives on.
///
/// Stations (hubs, base stations) and standalone devices share a serial
/// namespace upstream, so the channel is part of every identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateChannel {
    Station,
    Device,
}

impl StateChannel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StateChannel::Station => "station",
            StateChannel::Device => "device",
        }
    }
}

impl Display for StateChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateChannel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "station" => Ok(StateChannel::Station),
            "device" => Ok(StateChannel::Device),
            _ => Err("state channel must be station or device"),
        }
    }
}

/// Identity of an upstream station or device. Never owns the device itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub channel: StateChannel,
    pub serial: CompactString,
}

impl DeviceRef {
    pub fn station(serial: impl AsRef<str>) -> Self {
        Self { channel: StateChannel::Station, serial: serial.as_ref().into() }
    }

    pub fn device(serial: impl AsRef<str>) -> Self {
        Self { channel: StateChannel::Device, serial: serial.as_ref().into() }
    }
}

impl Display for DeviceRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.channel, self.serial)
    }
}

/// Stable token naming one (device, property) pair.
///
/// Built from `{channel}_{serial}_{property}` with empty parts skipped. The
/// topic separator never appears in it as long as serials and property names
/// don't contain one, which upstream guarantees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(CompactString);

impl ComponentId {
    pub const WILDCARD: Self = ComponentId(CompactString::const_new("+"));

    pub fn new(device: &DeviceRef, property: &PropertyDescriptor) -> Self {
        let property = match property.name.is_empty() {
            false => property.name.to_compact_string(),
            true => property.key.to_compact_string(),
        };

        let id = [device.channel.as_str(), device.serial.as_str(), property.as_str()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");

        ComponentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl<T: AsRef<str>> From<T> for ComponentId {
    fn from(value: T) -> Self {
        ComponentId(value.as_ref().to_compact_string())
    }
}

impl Deref for ComponentId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl Display for ComponentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
