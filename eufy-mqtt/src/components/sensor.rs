use super::{Component, StatePayload, render};
use crate::{DeviceSession, Result};

pub(super) fn state(component: &Component, session: &impl DeviceSession) -> Result<StatePayload> {
    component.read(session).map(|value| StatePayload::Text(render(&value)))
}
