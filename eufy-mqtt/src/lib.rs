use eufy_mqtt_common::{ComponentId, DeviceRef};

pub mod broker;
pub mod classifier;
pub mod components;
pub mod config;
pub mod discovery;
pub mod gateway;
pub mod log;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use eufy_mqtt_common as common;

pub use self::{
    broker::{Broker, BrokerEvent, MqttBroker, PublishOpts},
    config::GatewayOptions,
    gateway::Gateway,
    session::{DeviceInfo, DeviceSession, SessionEvent},
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} has no current value")]
    PropertyUnavailable(ComponentId),
    #[error("invalid command for {id}: {reason}")]
    InvalidCommand { id: ComponentId, reason: String },
    #[error("unknown guard mode: {0}")]
    UnknownGuardMode(serde_json::Value),
    #[error("unknown {0}")]
    UnknownDevice(DeviceRef),
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("upstream session error: {0}")]
    Session(String),
    #[error("bad configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn invalid_command(id: &ComponentId, reason: impl ToString) -> Self {
        Error::InvalidCommand { id: id.clone(), reason: reason.to_string() }
    }
}
