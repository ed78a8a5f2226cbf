//! Property to component mapping
//!
//! Overrides are consulted first and always win. Everything else falls back
//! on the property type: booleans become binary sensors (or switches, when
//! writeable and experimental features are on), the rest plain sensors.

use std::collections::HashMap;

use eufy_mqtt_common::{ComponentKind, ComponentOverride, PropertyDescriptor, PropertyKey, PropertyType};

/// Parameter key of a station's guard mode
pub const GUARD_MODE_KEY: i64 = 1224;

/// Property keys that only carry identification or firmware metadata.
/// These already end up in the discovery `device` block.
const METADATA_KEYS: &[&str] = &[
    "device_name",
    "device_model",
    "device_sn",
    "device_type",
    "device_station_sn",
    "station_name",
    "station_model",
    "station_sn",
    "station_type",
    "station_mac",
    "station_lan_ip_address",
    "main_hw_version",
    "main_sw_version",
    "sec_hw_version",
    "sec_sw_version",
];

pub fn default_overrides() -> HashMap<PropertyKey, ComponentOverride> {
    let mut overrides = METADATA_KEYS
        .iter()
        .map(|key| (PropertyKey::from(*key), ComponentOverride::Omit))
        .collect::<HashMap<_, _>>();

    overrides.insert(
        PropertyKey::Number(GUARD_MODE_KEY),
        ComponentOverride::Kind(ComponentKind::AlarmControlPanel),
    );
    overrides.insert(PropertyKey::from("cover_path"), ComponentOverride::Kind(ComponentKind::Camera));

    overrides
}

#[derive(Debug, Clone)]
pub struct Classifier {
    overrides: HashMap<PropertyKey, ComponentOverride>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self { overrides: default_overrides() }
    }
}

impl Classifier {
    /// Built-in table with `overrides` layered on top
    pub fn with_overrides(
        overrides: impl IntoIterator<Item = (PropertyKey, ComponentOverride)>,
    ) -> Self {
        let mut table = default_overrides();
        table.extend(overrides);
        Self { overrides: table }
    }

    /// `Some(None)` for an explicit omission, `None` when there is no entry
    pub fn override_for(&self, key: &PropertyKey) -> Option<Option<ComponentKind>> {
        self.overrides.get(key).map(|o| o.kind())
    }

    /// Kind of component to expose `property` as, or `None` to leave it out
    pub fn classify(
        &self,
        property: &PropertyDescriptor,
        experimental: bool,
    ) -> Option<ComponentKind> {
        if let Some(kind) = self.override_for(&property.key) {
            return kind;
        }

        match property.ty {
            PropertyType::Boolean if property.writeable && experimental => {
                Some(ComponentKind::Switch)
            }
            PropertyType::Boolean => Some(ComponentKind::BinarySensor),
            _ => Some(ComponentKind::Sensor),
        }
    }
}
