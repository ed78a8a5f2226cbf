use eufy_mqtt_common::Parameter;

use super::{Component, StatePayload, render};
use crate::{DeviceSession, Error, Result};

/// The state label, so it matches one of the advertised options
pub(super) fn state(component: &Component, session: &impl DeviceSession) -> Result<StatePayload> {
    component.read(session).map(|value| StatePayload::Text(render(&value)))
}

/// Maps the chosen option back to its raw state value before writing
pub(super) async fn write(
    component: &Component,
    session: &impl DeviceSession,
    payload: &str,
) -> Result<()> {
    let Some(value) = component.property.state_value(payload) else {
        return Err(Error::invalid_command(&component.id, format!("{payload:?} is not an option")));
    };

    let Some(param_type) = component.property.key.param_type() else {
        tracing::debug!("{} has no parameter key, ignoring write", component.id);
        return Ok(());
    };

    if !component.property.writeable {
        tracing::debug!("{} is read-only, ignoring write", component.id);
        return Ok(());
    }

    session
        .set_parameters(&component.device, vec![Parameter { param_type, param_value: value }])
        .await
}
