//! MySQL-backed [`Store`] implementation.
//!
//! The connection pool is internally synchronized, so concurrent inserts
//! from the delivery and timer contexts need no serialization here.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::info;

use super::Store;
use crate::error::StoreError;
use crate::model::{AggregateSummary, Reading};

pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connects a bounded pool to the configured MySQL database.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    /// Creates the raw and aggregated tables if they do not exist.
    /// Idempotent; run once at startup.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sensor_data (
                id          INT AUTO_INCREMENT PRIMARY KEY,
                sensor_id   INT,
                timestamp   DATETIME(6),
                value       FLOAT,
                lat         FLOAT,
                lng         FLOAT,
                unit        VARCHAR(255),
                type        VARCHAR(255),
                description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregated_sensor_data (
                id          INT AUTO_INCREMENT PRIMARY KEY,
                sensor_id   INT,
                timestamp   DATETIME(6),
                value       FLOAT,
                lat         FLOAT,
                lng         FLOAT,
                unit        VARCHAR(255),
                type        VARCHAR(255),
                description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("storage schema verified");
        Ok(())
    }
}

#[async_trait]
impl Store for MySqlStore {
    async fn insert_reading(&self, reading: &Reading) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sensor_data (sensor_id, timestamp, value, lat, lng, unit, type, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(reading.sensor_id)
        .bind(reading.timestamp)
        .bind(reading.value)
        .bind(reading.lat)
        .bind(reading.lng)
        .bind(&reading.unit)
        .bind(&reading.sensor_type)
        .bind(&reading.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_aggregate(&self, summary: &AggregateSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO aggregated_sensor_data (sensor_id, timestamp, value, lat, lng, unit, type, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(summary.sensor_id)
        .bind(summary.computed_at)
        .bind(summary.average_value)
        .bind(summary.lat)
        .bind(summary.lng)
        .bind(&summary.unit)
        .bind(&summary.sensor_type)
        .bind(&summary.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
