//! Simulated sensor publisher.
//!
//! A pure data producer with no coordination logic: one task per catalog
//! entry, each publishing a randomized reading at the configured cadence.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Deserialize;
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info};

use crate::config::Settings;

/// One entry in the sensor catalog JSON, keyed by sensor id:
/// ```json
/// {
///   "1": { "lat": 52.37, "lng": 4.89, "unit": "C", "type": "temperature",
///          "range": [15, 35], "description": "rooftop probe" }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct SensorSpec {
    pub lat: f64,
    pub lng: f64,
    pub unit: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    /// Inclusive `[low, high]` bounds for the randomized value.
    pub range: (i64, i64),
    pub description: String,
}

/// Loads the sensor catalog from a JSON file at `path`.
pub fn load_catalog(path: &str) -> Result<HashMap<String, SensorSpec>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read sensor catalog {path}"))?;
    let catalog = serde_json::from_str(&content)
        .with_context(|| format!("sensor catalog {path} is not valid JSON"))?;
    Ok(catalog)
}

/// Spawns one publishing task per catalog sensor and runs until aborted.
pub async fn run_publisher(settings: &Settings, catalog_path: &str) -> Result<()> {
    let catalog = load_catalog(catalog_path)?;

    let mut options =
        MqttOptions::new("sensor-pipeline-publish", &settings.mqtt.host, settings.mqtt.port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 64);

    // The event loop must keep being polled for queued publishes to go out
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!(error = %e, "publisher transport error, reconnecting");
                sleep(Duration::from_secs(5)).await;
            }
        }
    });

    info!(
        sensors = catalog.len(),
        topic = %settings.mqtt.topic,
        interval_ms = settings.publish_interval.as_millis() as u64,
        "starting simulated sensors"
    );

    let mut tasks = vec![];
    for (id, spec) in catalog {
        let client = client.clone();
        let topic = settings.mqtt.topic.clone();
        let interval = settings.publish_interval;

        tasks.push(tokio::spawn(async move {
            loop {
                let payload = sample_payload(&id, &spec);
                if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                    error!(sensor_id = %id, error = %e, "publish failed");
                }
                sleep(interval).await;
            }
        }));
    }

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Builds one randomized wire payload for a sensor.
///
/// Timestamps are naive UTC with microsecond precision, matching what the
/// ingest side expects from field sensors.
fn sample_payload(id: &str, spec: &SensorSpec) -> Vec<u8> {
    let value = rand::thread_rng().gen_range(spec.range.0..=spec.range.1);

    json!({
        "sensor_id": id,
        "timestamp": Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
        "value": value,
        "metadata": {
            "location": { "lat": spec.lat, "lng": spec.lng },
            "unit": spec.unit,
            "type": spec.sensor_type,
            "description": spec.description,
        }
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Reading;
    use std::env;
    use std::fs;

    fn spec() -> SensorSpec {
        SensorSpec {
            lat: 52.37,
            lng: 4.89,
            unit: "C".to_string(),
            sensor_type: "temperature".to_string(),
            range: (15, 35),
            description: "rooftop probe".to_string(),
        }
    }

    #[test]
    fn test_sample_payload_round_trips_through_decode() {
        let payload = sample_payload("7", &spec());

        let reading = Reading::decode(&payload).unwrap();

        assert_eq!(reading.sensor_id, 7);
        assert!((15.0..=35.0).contains(&reading.value));
        assert_eq!(reading.unit, "C");
        assert_eq!(reading.sensor_type, "temperature");
        assert_eq!(reading.description, "rooftop probe");
    }

    #[test]
    fn test_load_catalog() {
        let path = format!("{}/sensor_pipeline_test_catalog.json", env::temp_dir().display());
        fs::write(
            &path,
            r#"{
                "1": { "lat": 1.0, "lng": 2.0, "unit": "C", "type": "temperature",
                       "range": [0, 10], "description": "a" },
                "2": { "lat": 3.0, "lng": 4.0, "unit": "%", "type": "humidity",
                       "range": [20, 90], "description": "b" }
            }"#,
        )
        .unwrap();

        let catalog = load_catalog(&path).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog["2"].sensor_type, "humidity");
        assert_eq!(catalog["2"].range, (20, 90));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_catalog_missing_file() {
        assert!(load_catalog("/does/not/exist.json").is_err());
    }
}
