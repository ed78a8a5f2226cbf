use core::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Home Assistant entity platform a property is exposed as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Sensor,
    BinarySensor,
    Switch,
    Select,
    AlarmControlPanel,
    Camera,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        ComponentKind::Sensor,
        ComponentKind::BinarySensor,
        ComponentKind::Switch,
        ComponentKind::Select,
        ComponentKind::AlarmControlPanel,
        ComponentKind::Camera,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Sensor => "sensor",
            ComponentKind::BinarySensor => "binary_sensor",
            ComponentKind::Switch => "switch",
            ComponentKind::Select => "select",
            ComponentKind::AlarmControlPanel => "alarm_control_panel",
            ComponentKind::Camera => "camera",
        }
    }

    /// Publishes to a state topic
    pub const fn has_state(&self) -> bool {
        !matches!(self, ComponentKind::Camera)
    }

    /// Accepts writes on a command topic
    pub const fn has_command(&self) -> bool {
        matches!(
            self,
            ComponentKind::Switch | ComponentKind::Select | ComponentKind::AlarmControlPanel
        )
    }
}

impl Display for ComponentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or("unknown component kind")
    }
}

/// Entry of the classifier override table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComponentOverride {
    /// Never expose this property
    Omit,
    Kind(ComponentKind),
}

impl ComponentOverride {
    pub fn kind(self) -> Option<ComponentKind> {
        match self {
            ComponentOverride::Omit => None,
            ComponentOverride::Kind(kind) => Some(kind),
        }
    }
}

impl TryFrom<String> for ComponentOverride {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "omit" | "none" => Ok(ComponentOverride::Omit),
            other => other.parse().map(ComponentOverride::Kind),
        }
    }
}

impl From<ComponentOverride> for String {
    fn from(value: ComponentOverride) -> Self {
        match value {
            ComponentOverride::Omit => "omit".to_owned(),
            ComponentOverride::Kind(kind) => kind.as_str().to_owned(),
        }
    }
}
