use super::{Component, StatePayload, on_off, truthy};
use crate::{DeviceSession, Result};

/// Truthiness of the raw value. Labels are display text and any non-empty
/// one would read as "on", so the states table is skipped here.
pub(super) fn state(component: &Component, session: &impl DeviceSession) -> Result<StatePayload> {
    let raw = component.raw(session)?;
    Ok(StatePayload::text(on_off(truthy(&raw))))
}
