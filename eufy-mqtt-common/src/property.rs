use core::{fmt::Display, str::FromStr};
use std::collections::BTreeMap;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Value type advertised in a property's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Boolean,
    Number,
    String,
    Enum,
    #[serde(other)]
    Other,
}

/// Protocol-level identifier of a property.
///
/// Numeric keys are parameter types the upstream accepts in parameter writes;
/// string keys are synthesized by the upstream client and can only be read.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyKey {
    Number(i64),
    Name(CompactString),
}

impl PropertyKey {
    /// Parameter type for writes, `None` for read-only synthesized keys
    pub fn param_type(&self) -> Option<i64> {
        match self {
            PropertyKey::Number(n) => Some(*n),
            PropertyKey::Name(_) => None,
        }
    }
}

impl Display for PropertyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PropertyKey::Number(n) => write!(f, "{n}"),
            PropertyKey::Name(s) => f.write_str(s),
        }
    }
}

impl FromStr for PropertyKey {
    type Err = core::convert::Infallible;

    /// Numeric strings become parameter keys, anything else a named key
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(n) => PropertyKey::Number(n),
            Err(_) => PropertyKey::Name(s.into()),
        })
    }
}

impl From<i64> for PropertyKey {
    fn from(value: i64) -> Self {
        PropertyKey::Number(value)
    }
}

impl From<&str> for PropertyKey {
    fn from(value: &str) -> Self {
        PropertyKey::Name(value.into())
    }
}

/// Metadata for one property of a station or device, as reported upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    pub name: CompactString,
    pub key: PropertyKey,
    #[serde(rename = "type")]
    pub ty: PropertyType,
    #[serde(default)]
    pub label: CompactString,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<CompactString>,
    #[serde(default)]
    pub writeable: bool,
    /// Raw value (stringified) to display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<BTreeMap<String, String>>,
}

impl PropertyDescriptor {
    /// Display label for a raw value, if this property enumerates its states
    pub fn state_label(&self, raw: &serde_json::Value) -> Option<&str> {
        let states = self.states.as_ref()?;
        states.get(&state_key(raw)?).map(String::as_str)
    }

    /// Reverse of [`state_label`](Self::state_label): the raw value whose label
    /// (or raw key) matches `label`
    pub fn state_value(&self, label: &str) -> Option<serde_json::Value> {
        let states = self.states.as_ref()?;
        let raw = states
            .iter()
            .find(|(_, l)| l.as_str() == label)
            .map(|(raw, _)| raw)
            .or_else(|| states.keys().find(|raw| raw.as_str() == label))?;

        Some(match raw.parse::<i64>() {
            Ok(n) => serde_json::Value::from(n),
            Err(_) => serde_json::Value::from(raw.as_str()),
        })
    }

    /// Every state label, numeric raw values in numeric order first
    pub fn state_labels(&self) -> Vec<&str> {
        let Some(states) = &self.states else {
            return Vec::new();
        };

        let mut entries = states.iter().collect::<Vec<_>>();
        entries.sort_by(|(a, _), (b, _)| state_order(a).cmp(&state_order(b)));
        entries.into_iter().map(|(_, label)| label.as_str()).collect()
    }

    pub fn is_numeric_measurement(&self) -> bool {
        self.ty == PropertyType::Number && self.states.is_none()
    }
}

fn state_order(raw: &str) -> Result<i64, &str> {
    raw.parse().map_err(|_| raw)
}

fn state_key(raw: &serde_json::Value) -> Option<String> {
    match raw {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// One entry of a parameter write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub param_type: i64,
    pub param_value: serde_json::Value,
}
