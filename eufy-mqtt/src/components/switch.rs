use eufy_mqtt_common::Parameter;

use super::{Component, StatePayload, binary_sensor};
use crate::{DeviceSession, Error, Result};

pub(super) fn state(component: &Component, session: &impl DeviceSession) -> Result<StatePayload> {
    binary_sensor::state(component, session)
}

pub(super) async fn write(
    component: &Component,
    session: &impl DeviceSession,
    payload: &str,
) -> Result<()> {
    let value = match payload {
        "on" => 1,
        "off" => 0,
        other => {
            return Err(Error::invalid_command(
                &component.id,
                format!("expected \"on\" or \"off\", got {other:?}"),
            ));
        }
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
        .set_parameters(&component.device, vec![Parameter {
            param_type,
            param_value: value.into(),
        }])
        .await
}
