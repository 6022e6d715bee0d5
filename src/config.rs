//! Environment-sourced settings.
//!
//! All options come from the process environment (a `.env` file is loaded in
//! `main`). `DATABASE_URL` overrides the individual `MYSQL_*` parts.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub database_url: String,
    /// Length of one aggregation window.
    pub window: Duration,
    /// Per-sensor cadence of the simulated publisher.
    pub publish_interval: Duration,
    /// Whether a graceful shutdown runs one final aggregation cycle over
    /// buffered readings. `false` accepts losing them, as the original
    /// deployment did.
    pub flush_on_shutdown: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let mqtt = MqttSettings {
            host: require("MQTT_HOST")?,
            port: require("MQTT_PORT")?
                .parse()
                .context("MQTT_PORT must be a port number")?,
            topic: require("MQTT_TOPIC")?,
        };

        let database_url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => format!(
                "mysql://{}:{}@{}/{}",
                require("MYSQL_USER")?,
                require("MYSQL_PASSWORD")?,
                require("MYSQL_HOST")?,
                require("MYSQL_DATABASE")?,
            ),
        };

        Ok(Settings {
            mqtt,
            database_url,
            window: Duration::from_secs(env_or("WINDOW_SECS", 60)?),
            publish_interval: Duration::from_millis(env_or("INTERVAL_MS", 1000)?),
            flush_on_shutdown: env_or("FLUSH_ON_SHUTDOWN", true)?,
        })
    }
}

fn require(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} must be set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} has an invalid value")),
        Err(_) => Ok(default),
    }
}
