use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::Parser;
use eufy_mqtt::{Gateway, GatewayOptions, MqttBroker, common::Topic};
use eufy_mqtt_ws::{EufyWs, EufyWsOptions};
use serde::Deserialize;

#[derive(Parser)]
#[command(about = "Publishes eufy security stations and devices to Home Assistant over MQTT")]
struct Args {
    /// JSON or TOML configuration file, flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// MQTT broker, e.g. mqtt://localhost:1883
    #[arg(long, conflicts_with_all = ["mqtt_host", "mqtt_port"])]
    mqtt_url: Option<String>,

    #[arg(long)]
    mqtt_host: Option<String>,

    #[arg(long)]
    mqtt_port: Option<u16>,

    #[arg(long)]
    mqtt_username: Option<String>,

    #[arg(long)]
    mqtt_password: Option<String>,

    /// Home Assistant discovery prefix
    #[arg(long)]
    hass_topic_root: Option<String>,

    #[arg(long)]
    self_topic_root: Option<String>,

    /// Expose writeable boolean properties as switches
    #[arg(long)]
    experimental: bool,

    #[arg(long)]
    log_level: Option<String>,

    /// eufy-security-ws server, e.g. ws://localhost:3000
    #[arg(long)]
    eufy_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    #[serde(flatten)]
    gateway: GatewayOptions,
    eufy: EufyWsOptions,
}

impl Args {
    fn apply(self, mut config: Config) -> Config {
        let mqtt = &mut config.gateway.mqtt;

        if let Some(url) = self.mqtt_url {
            mqtt.url = Some(url);
            mqtt.host = None;
            mqtt.port = None;
        }

        if self.mqtt_host.is_some() || self.mqtt_port.is_some() {
            mqtt.url = None;
            mqtt.host = self.mqtt_host.or(mqtt.host.take());
            mqtt.port = self.mqtt_port.or(mqtt.port);
        }

        mqtt.username = self.mqtt_username.or(mqtt.username.take());
        mqtt.password = self.mqtt_password.or(mqtt.password.take());

        if let Some(root) = self.hass_topic_root {
            config.gateway.hass_topic_root = root;
        }
        if let Some(root) = self.self_topic_root {
            config.gateway.self_topic_root = root;
        }
        if let Some(level) = self.log_level {
            config.gateway.log_level = level;
        }
        if let Some(url) = self.eufy_url {
            config.eufy.url = url;
        }

        config.gateway.experimental |= self.experimental;

        config
    }
}

fn parse_config(text: &str) -> anyhow::Result<Config> {
    match serde_json::from_str(text) {
        Ok(config) => Ok(config),
        Err(json) => toml::from_str(text)
            .with_context(|| format!("neither valid JSON ({json}) nor valid TOML")),
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    parse_config(&text).with_context(|| format!("failed to parse {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    let config = args.apply(config);

    eufy_mqtt::log::init(&config.gateway.log_level);

    let roots = config.gateway.topic_roots();
    let (broker, broker_events) =
        MqttBroker::connect(&config.gateway.mqtt, roots.render(&Topic::Availability))
            .context("failed to set up mqtt client")?;

    let (session, session_events) = EufyWs::new(config.eufy);

    let gateway =
        Gateway::new(session, broker, &config.gateway).context("failed to set up gateway")?;

    tracing::info!("Publishing to {}/ and {}/", roots.self_root, roots.discovery_root);

    gateway.run(session_events, broker_events, shutdown_signal()).await;

    Ok(())
}

/// Resolves on the first ctrl-c or SIGTERM; a second ctrl-c exits right away
async fn shutdown_signal() {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        }
        () = terminate() => {}
    }

    tracing::info!("Shutting down, interrupt again to exit immediately");

    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Exiting without a clean shutdown");
            std::process::exit(130);
        }
    });
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to listen for SIGTERM: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
