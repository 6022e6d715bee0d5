//! Wire decoding and domain types for sensor telemetry.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// One timestamped sensor measurement with location/unit/type metadata.
///
/// Immutable once decoded: consumed by the store, the buffer, and the
/// aggregator, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub sensor_id: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub lat: f64,
    pub lng: f64,
    pub unit: String,
    pub sensor_type: String,
    pub description: String,
}

/// Per-sensor, per-window mean value plus carried-forward descriptive
/// metadata. Created only by the aggregator; immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateSummary {
    pub sensor_id: i64,
    pub computed_at: DateTime<Utc>,
    pub average_value: f64,
    pub lat: f64,
    pub lng: f64,
    pub unit: String,
    pub sensor_type: String,
    pub description: String,
}

/// Inbound MQTT payload, mirrored 1:1 before coercion into [`Reading`].
#[derive(Debug, Deserialize)]
struct InboundMessage {
    sensor_id: SensorId,
    timestamp: String,
    value: f64,
    metadata: Metadata,
}

/// Publishers send sensor ids either as JSON strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SensorId {
    Int(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct Metadata {
    location: Location,
    unit: String,
    #[serde(rename = "type")]
    sensor_type: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

impl Reading {
    /// Decodes a raw JSON payload into a [`Reading`].
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload is not well-formed JSON, is
    /// missing a required field, or carries a sensor id or timestamp that
    /// cannot be coerced.
    pub fn decode(payload: &[u8]) -> Result<Reading, DecodeError> {
        let msg: InboundMessage = serde_json::from_slice(payload)?;

        let sensor_id = match msg.sensor_id {
            SensorId::Int(id) => id,
            SensorId::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| DecodeError::SensorId(raw))?,
        };

        Ok(Reading {
            sensor_id,
            timestamp: parse_timestamp(&msg.timestamp)?,
            value: msg.value,
            lat: msg.metadata.location.lat,
            lng: msg.metadata.location.lng,
            unit: msg.metadata.unit,
            sensor_type: msg.metadata.sensor_type,
            description: msg.metadata.description,
        })
    }
}

/// Parses an ISO-8601 instant. Publishers emit naive UTC timestamps with
/// microsecond precision and no offset suffix; an explicit offset is also
/// accepted and normalized to UTC.
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(|_| DecodeError::Timestamp(raw.to_string()))
}

impl AggregateSummary {
    /// Builds the summary for one sensor's window: `average_value` is the
    /// arithmetic mean of all readings, descriptive fields are copied from
    /// the last reading in delivery order. Returns `None` for an empty
    /// window, which produces no summary.
    pub fn from_window(
        sensor_id: i64,
        readings: &[Reading],
        computed_at: DateTime<Utc>,
    ) -> Option<AggregateSummary> {
        let last = readings.last()?;

        let average_value =
            readings.iter().map(|r| r.value).sum::<f64>() / readings.len() as f64;

        Some(AggregateSummary {
            sensor_id,
            computed_at,
            average_value,
            lat: last.lat,
            lng: last.lng,
            unit: last.unit.clone(),
            sensor_type: last.sensor_type.clone(),
            description: last.description.clone(),
        })
    }
}
