use core::time::Duration;
use std::collections::BTreeMap;

use compact_str::CompactString;
use eufy_mqtt_common::{ComponentOverride, PropertyKey, TopicRoots};
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    classifier::Classifier,
    discovery::{DescriptorBuilder, default_device_classes},
};

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Everything the gateway consumes, apart from the upstream session itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct GatewayOptions {
    pub mqtt: BrokerOptions,
    /// Home Assistant discovery prefix
    pub hass_topic_root: String,
    /// Prefix of this gateway's own state/command/status topics
    pub self_topic_root: String,
    /// Pause between publishing discovery configs and the first states
    pub settle_delay_ms: u64,
    /// Expose writeable boolean properties as switches
    pub experimental: bool,
    pub log_level: String,
    /// Classifier overrides by property key, merged over the built-in table
    pub overrides: BTreeMap<String, ComponentOverride>,
    /// Home Assistant device classes by property key, merged over the built-in table
    pub device_classes: BTreeMap<String, String>,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            mqtt: BrokerOptions::default(),
            hass_topic_root: "homeassistant".to_owned(),
            self_topic_root: "eufysecurity".to_owned(),
            settle_delay_ms: 1000,
            experimental: false,
            log_level: "info".to_owned(),
            overrides: BTreeMap::new(),
            device_classes: BTreeMap::new(),
        }
    }
}

impl GatewayOptions {
    pub fn topic_roots(&self) -> TopicRoots {
        TopicRoots::new(&self.self_topic_root, &self.hass_topic_root)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::with_overrides(
            self.overrides
                .iter()
                .map(|(key, kind)| (parse_key(key), *kind)),
        )
    }

    pub fn descriptor_builder(&self) -> DescriptorBuilder {
        let mut classes = default_device_classes();
        classes.extend(
            self.device_classes
                .iter()
                .map(|(key, class)| (parse_key(key), CompactString::from(class))),
        );

        DescriptorBuilder::new(self.topic_roots(), classes)
    }
}

fn parse_key(key: &str) -> PropertyKey {
    match key.parse() {
        Ok(key) => key,
        Err(infallible) => match infallible {},
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BrokerOptions {
    /// `mqtt://host:port`; mutually exclusive with `host`/`port`
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    /// Retain config, state and availability messages
    pub retain: bool,
    /// Delay between reconnect attempts, for both the broker and the upstream session
    pub reconnect_period_ms: u64,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            username: None,
            password: None,
            client_id: None,
            retain: true,
            reconnect_period_ms: 1000,
        }
    }
}

impl BrokerOptions {
    pub fn reconnect_period(&self) -> Duration {
        Duration::from_millis(self.reconnect_period_ms)
    }

    pub fn client_id(&self) -> String {
        match &self.client_id {
            Some(id) => id.clone(),
            None => format!("eufy-security-mqtt_{:08x}", rand::random::<u32>()),
        }
    }

    /// Host and port to connect to
    pub fn address(&self) -> Result<(String, u16)> {
        let Some(url) = &self.url else {
            return Ok((
                self.host.clone().unwrap_or_else(|| "localhost".to_owned()),
                self.port.unwrap_or(DEFAULT_MQTT_PORT),
            ));
        };

        if self.host.is_some() || self.port.is_some() {
            return Err(Error::Config("mqtt url conflicts with mqtt host/port".to_owned()));
        }

        let stripped = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .unwrap_or(url)
            .trim_end_matches('/');

        if stripped.contains("://") {
            return Err(Error::Config(format!("unsupported mqtt url scheme: {url}")));
        }

        match stripped.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid mqtt port in {url}")))?;
                Ok((host.to_owned(), port))
            }
            None => Ok((stripped.to_owned(), DEFAULT_MQTT_PORT)),
        }
    }
}
