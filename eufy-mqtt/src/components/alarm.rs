use eufy_mqtt_common::{GuardMode, PanelState};

use super::{Component, StatePayload};
use crate::{DeviceSession, Error, Result};

/// Only away, home and disarmed have a panel state; other guard modes
/// publish nothing
pub(super) fn state(
    component: &Component,
    session: &impl DeviceSession,
) -> Result<Option<StatePayload>> {
    let raw = component.raw(session)?;
    let Some(code) = raw.as_i64() else {
        return Err(Error::UnknownGuardMode(raw));
    };

    match GuardMode::from_code(code).and_then(GuardMode::panel_state) {
        Some(state) => Ok(Some(StatePayload::text(state.as_str()))),
        None => {
            tracing::info!("{}: guard mode {code} has no panel state, not publishing", component.id);
            Ok(None)
        }
    }
}

pub(super) async fn write(
    component: &Component,
    session: &impl DeviceSession,
    payload: &str,
) -> Result<()> {
    let state = payload
        .parse::<PanelState>()
        .map_err(|e| Error::invalid_command(&component.id, e))?;

    session.set_guard_mode(&component.device, state.guard_mode()).await
}
