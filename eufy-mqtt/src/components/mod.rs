//! One addressable unit per (device, property) pair
//!
//! Components carry no values of their own. Every read goes back to the
//! session, so a component is only ever as stale as the session's cache.

use eufy_mqtt_common::{ComponentId, ComponentKind, DeviceRef, PropertyDescriptor};
use serde_json::Value;

use crate::{DeviceSession, Error, Result};

mod alarm;
mod binary_sensor;
mod camera;
mod select;
mod sensor;
mod switch;

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: ComponentId,
    pub kind: ComponentKind,
    pub device: DeviceRef,
    pub property: PropertyDescriptor,
}

/// What ends up on a component's state topic
#[derive(Debug, Clone, PartialEq)]
pub enum StatePayload {
    Text(String),
    Bytes(Vec<u8>),
}

impl StatePayload {
    pub fn text(s: impl Into<String>) -> Self {
        StatePayload::Text(s.into())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            StatePayload::Text(s) => s.into_bytes(),
            StatePayload::Bytes(b) => b,
        }
    }
}

impl Component {
    pub fn new(device: &DeviceRef, property: PropertyDescriptor, kind: ComponentKind) -> Self {
        Self {
            id: ComponentId::new(device, &property),
            kind,
            device: device.clone(),
            property,
        }
    }

    /// Current value as the session reports it
    pub fn raw(&self, session: &impl DeviceSession) -> Result<Value> {
        session
            .property_value(&self.device, &self.property.name)
            .filter(|value| !value.is_null())
            .ok_or_else(|| Error::PropertyUnavailable(self.id.clone()))
    }

    /// Current value with the property's state labels applied
    pub fn read(&self, session: &impl DeviceSession) -> Result<Value> {
        let raw = self.raw(session)?;

        Ok(match self.property.state_label(&raw) {
            Some(label) => Value::from(label),
            None => raw,
        })
    }

    /// Payload for the state topic, or `None` when there is nothing to publish
    pub async fn state(
        &self,
        session: &impl DeviceSession,
        http: &reqwest::Client,
    ) -> Result<Option<StatePayload>> {
        match self.kind {
            ComponentKind::Sensor => sensor::state(self, session).map(Some),
            ComponentKind::BinarySensor => binary_sensor::state(self, session).map(Some),
            ComponentKind::Switch => switch::state(self, session).map(Some),
            ComponentKind::Select => select::state(self, session).map(Some),
            ComponentKind::AlarmControlPanel => alarm::state(self, session),
            ComponentKind::Camera => camera::state(self, session, http).await.map(Some),
        }
    }

    /// Applies a command payload received on the component's command topic
    pub async fn write(&self, session: &impl DeviceSession, payload: &str) -> Result<()> {
        match self.kind {
            ComponentKind::Switch => switch::write(self, session, payload).await,
            ComponentKind::Select => select::write(self, session, payload).await,
            ComponentKind::AlarmControlPanel => alarm::write(self, session, payload).await,
            ComponentKind::Sensor | ComponentKind::BinarySensor | ComponentKind::Camera => {
                Err(Error::invalid_command(&self.id, format!("{} takes no commands", self.kind)))
            }
        }
    }
}

/// How a value looks on the wire: strings unquoted, everything else as JSON
pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) const fn on_off(on: bool) -> &'static str {
    match on {
        true => "on",
        false => "off",
    }
}
