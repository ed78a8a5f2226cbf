use super::{Component, StatePayload};
use crate::{DeviceSession, Error, Result};

/// Fetches the picture the property points at
pub(super) async fn state(
    component: &Component,
    session: &impl DeviceSession,
    http: &reqwest::Client,
) -> Result<StatePayload> {
    let raw = component.raw(session)?;
    let Some(url) = raw.as_str().filter(|url| !url.is_empty()) else {
        return Err(Error::PropertyUnavailable(component.id.clone()));
    };

    let bytes = http.get(url).send().await?.error_for_status()?.bytes().await?;
    tracing::debug!("{}: fetched {} bytes from {url}", component.id, bytes.len());

    Ok(StatePayload::Bytes(bytes.to_vec()))
}
