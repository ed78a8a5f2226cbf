//! Home Assistant MQTT discovery payloads
//!
//! Descriptors are rebuilt from the component and the session's device info
//! every time they are published, so they never go stale.

use std::collections::HashMap;

use compact_str::CompactString;
use eufy_mqtt_common::{
    ComponentId, ComponentKind, PanelState, PropertyKey, STATUS_OFFLINE, STATUS_ONLINE, Topic,
    TopicRoots,
};
use serde::Serialize;

use crate::{DeviceInfo, components::Component};

pub const MANUFACTURER: &str = "Eufy Security";

const STATE_CLASS_MEASUREMENT: &str = "measurement";

/// Built-in device classes by property key
pub fn default_device_classes() -> HashMap<PropertyKey, CompactString> {
    const NAMED: &[(&str, &str)] = &[
        ("charing_total", "power_factor"),
        ("charging_reserve", "power_factor"),
        ("battery_usage_last_week", "power_factor"),
        ("custom_locked", "lock"),
        ("custom_motionDetected", "motion"),
        ("custom_personDetected", "motion"),
        ("custom_petDetected", "motion"),
        ("custom_soundDetected", "sound"),
        ("custom_cryingDetected", "sound"),
        ("custom_ringing", "sound"),
    ];

    const NUMBERED: &[(i64, &str)] = &[
        (1026, "light"),
        (1045, "light"),
        (1101, "battery"),
        (1138, "temperature"),
        (1141, "signal_strength"),
        (1142, "signal_strength"),
        (1550, "opening"),
        (1552, "battery"),
        (1642, "battery"),
        (1653, "battery"),
        (6014, "light"),
        (7005, "light"),
    ];

    NAMED
        .iter()
        .map(|(key, class)| (PropertyKey::from(*key), CompactString::from(*class)))
        .chain(
            NUMBERED
                .iter()
                .map(|(key, class)| (PropertyKey::Number(*key), CompactString::from(*class))),
        )
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDescriptor {
    pub name: CompactString,
    pub unique_id: ComponentId,
    pub availability_topic: String,
    pub payload_available: &'static str,
    pub payload_not_available: &'static str,
    pub enabled_by_default: bool,
    pub device: DeviceBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<CompactString>,
    #[serde(flatten)]
    pub fields: KindFields,
}

/// Fields only some component kinds carry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KindFields {
    OnOff {
        payload_on: &'static str,
        payload_off: &'static str,
    },
    Sensor {
        #[serde(skip_serializing_if = "Option::is_none")]
        unit_of_measurement: Option<CompactString>,
        #[serde(skip_serializing_if = "Option::is_none")]
        state_class: Option<&'static str>,
    },
    Select {
        options: Vec<String>,
    },
    AlarmControlPanel {
        code_arm_required: bool,
        code_disarm_required: bool,
        payload_arm_away: &'static str,
        payload_arm_home: &'static str,
        payload_disarm: &'static str,
    },
    Camera {
        topic: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBlock {
    pub identifiers: Vec<CompactString>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<(&'static str, CompactString)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_device: Option<CompactString>,
    pub manufacturer: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<CompactString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<CompactString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<CompactString>,
}

impl From<DeviceInfo> for DeviceBlock {
    fn from(info: DeviceInfo) -> Self {
        Self {
            identifiers: vec![info.device.serial],
            connections: info.mac_address.map(|mac| ("mac", mac)).into_iter().collect(),
            via_device: info.station_serial,
            manufacturer: MANUFACTURER,
            model: info.model,
            name: info.name,
            sw_version: info.software_version,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    roots: TopicRoots,
    device_classes: HashMap<PropertyKey, CompactString>,
}

impl DescriptorBuilder {
    pub fn new(roots: TopicRoots, device_classes: HashMap<PropertyKey, CompactString>) -> Self {
        Self { roots, device_classes }
    }

    pub fn roots(&self) -> &TopicRoots {
        &self.roots
    }

    pub fn build(&self, component: &Component, info: DeviceInfo) -> DiscoveryDescriptor {
        let kind = component.kind;
        let property = &component.property;
        let state_topic = self.roots.render(&Topic::State(component.id.clone()));

        let device_class = match kind {
            ComponentKind::BinarySensor | ComponentKind::Sensor => {
                self.device_classes.get(&property.key).cloned()
            }
            _ => None,
        };

        let fields = match kind {
            ComponentKind::BinarySensor | ComponentKind::Switch => {
                KindFields::OnOff { payload_on: "on", payload_off: "off" }
            }
            ComponentKind::Sensor => KindFields::Sensor {
                unit_of_measurement: property.unit.clone(),
                state_class: property.is_numeric_measurement().then_some(STATE_CLASS_MEASUREMENT),
            },
            ComponentKind::Select => KindFields::Select {
                options: property.state_labels().into_iter().map(str::to_owned).collect(),
            },
            ComponentKind::AlarmControlPanel => KindFields::AlarmControlPanel {
                code_arm_required: false,
                code_disarm_required: false,
                payload_arm_away: PanelState::ArmedAway.as_str(),
                payload_arm_home: PanelState::ArmedHome.as_str(),
                payload_disarm: PanelState::Disarmed.as_str(),
            },
            ComponentKind::Camera => KindFields::Camera { topic: state_topic.clone() },
        };

        DiscoveryDescriptor {
            name: property.label.clone(),
            unique_id: component.id.clone(),
            availability_topic: self.roots.render(&Topic::Availability),
            payload_available: STATUS_ONLINE,
            payload_not_available: STATUS_OFFLINE,
            enabled_by_default: true,
            device: info.into(),
            state_topic: kind.has_state().then_some(state_topic),
            command_topic: kind
                .has_command()
                .then(|| self.roots.render(&Topic::Command(component.id.clone()))),
            device_class,
            fields,
        }
    }
}
