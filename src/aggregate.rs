//! Timer-driven windowed aggregation.
//!
//! Once per window the aggregator drains the shared buffer, computes one
//! summary per sensor, and persists each summary independently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::buffer::ReadingBuffer;
use crate::model::AggregateSummary;
use crate::store::{self, Store};

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BACKOFF: Duration = Duration::from_millis(250);

pub struct Aggregator {
    buffer: Arc<ReadingBuffer>,
    store: Arc<dyn Store>,
    window: Duration,
    flush_on_shutdown: bool,
}

impl Aggregator {
    pub fn new(
        buffer: Arc<ReadingBuffer>,
        store: Arc<dyn Store>,
        window: Duration,
        flush_on_shutdown: bool,
    ) -> Self {
        Self {
            buffer,
            store,
            window,
            flush_on_shutdown,
        }
    }

    /// Runs aggregation cycles until `shutdown` flips.
    ///
    /// Cycles are strictly serialized: the next tick is not awaited until
    /// the previous cycle's persistence has finished, and a tick missed
    /// while persisting is deferred rather than fired concurrently. On
    /// shutdown, one final cycle flushes buffered readings if configured.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.window);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval completes immediately
        interval.tick().await;

        info!(window_secs = self.window.as_secs(), "aggregator started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.changed() => {
                    if self.flush_on_shutdown {
                        info!("flushing buffered readings before exit");
                        self.run_cycle().await;
                    }
                    info!("aggregator stopped");
                    return;
                }
            }
        }
    }

    /// One drain-compute-persist cycle.
    ///
    /// The drain is the only contended step; everything after it works on
    /// data this cycle exclusively owns. A persistence failure for one
    /// sensor's summary is logged and does not abort the remaining sensors.
    pub async fn run_cycle(&self) {
        let drained = self.buffer.drain_all();
        if drained.is_empty() {
            debug!("window closed with no readings");
            return;
        }

        let computed_at = Utc::now();
        let sensors = drained.len();
        let mut persisted = 0usize;

        for (sensor_id, readings) in drained {
            let Some(summary) = AggregateSummary::from_window(sensor_id, &readings, computed_at)
            else {
                continue;
            };

            debug!(
                sensor_id,
                readings = readings.len(),
                average_value = summary.average_value,
                "window summary computed"
            );

            let result = store::with_retries("insert_aggregate", PERSIST_ATTEMPTS, PERSIST_BACKOFF, || {
                self.store.insert_aggregate(&summary)
            })
            .await;

            match result {
                Ok(()) => persisted += 1,
                Err(e) => {
                    error!(sensor_id, error = %e, "aggregate summary lost, continuing with remaining sensors");
                }
            }
        }

        info!(sensors, persisted, "aggregation cycle complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::Reading;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Instant;

    fn reading(sensor_id: i64, value: f64, description: &str) -> Reading {
        Reading {
            sensor_id,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            value,
            lat: 52.37,
            lng: 4.89,
            unit: "C".to_string(),
            sensor_type: "temperature".to_string(),
            description: description.to_string(),
        }
    }

    /// Store double that records inserts and can fail selected sensors.
    #[derive(Default)]
    struct RecordingStore {
        aggregates: Mutex<Vec<AggregateSummary>>,
        fail_sensors: Vec<i64>,
    }

    #[async_trait]
    impl Store for RecordingStore {
        async fn insert_reading(&self, _reading: &Reading) -> Result<(), StoreError> {
            Ok(())
        }

        async fn insert_aggregate(&self, summary: &AggregateSummary) -> Result<(), StoreError> {
            if self.fail_sensors.contains(&summary.sensor_id) {
                return Err(StoreError::Constraint("injected failure".to_string()));
            }
            self.aggregates.lock().unwrap().push(summary.clone());
            Ok(())
        }
    }

    fn aggregator(store: Arc<RecordingStore>, buffer: Arc<ReadingBuffer>) -> Aggregator {
        Aggregator::new(buffer, store, Duration::from_secs(60), true)
    }

    #[tokio::test]
    async fn test_cycle_computes_mean_and_last_writer_fields() {
        let buffer = Arc::new(ReadingBuffer::new());
        let store = Arc::new(RecordingStore::default());

        buffer.append(reading(7, 10.0, "first"));
        buffer.append(reading(7, 20.0, "second"));
        buffer.append(reading(7, 30.0, "third"));

        aggregator(store.clone(), buffer.clone()).run_cycle().await;

        let aggregates = store.aggregates.lock().unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].sensor_id, 7);
        assert_eq!(aggregates[0].average_value, 20.0);
        assert_eq!(aggregates[0].description, "third");

        // The cycle drained the buffer
        assert!(buffer.drain_all().is_empty());
    }

    #[tokio::test]
    async fn test_empty_window_persists_nothing() {
        let buffer = Arc::new(ReadingBuffer::new());
        let store = Arc::new(RecordingStore::default());

        aggregator(store.clone(), buffer).run_cycle().await;

        assert!(store.aggregates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_sensors_failure_does_not_block_others() {
        let buffer = Arc::new(ReadingBuffer::new());
        let store = Arc::new(RecordingStore {
            fail_sensors: vec![1],
            ..Default::default()
        });

        buffer.append(reading(1, 10.0, "a"));
        buffer.append(reading(2, 20.0, "b"));
        buffer.append(reading(3, 30.0, "c"));

        aggregator(store.clone(), buffer).run_cycle().await;

        let mut persisted: Vec<i64> = store
            .aggregates
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.sensor_id)
            .collect();
        persisted.sort();
        assert_eq!(persisted, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_shutdown_flush_persists_buffered_readings() {
        let buffer = Arc::new(ReadingBuffer::new());
        let store = Arc::new(RecordingStore::default());
        // Window far longer than the test, so only the flush can persist
        let agg = Aggregator::new(buffer.clone(), store.clone(), Duration::from_secs(3600), true);

        buffer.append(reading(7, 42.0, "pending"));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { agg.run(shutdown_rx).await });

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let aggregates = store.aggregates.lock().unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].average_value, 42.0);
    }

    #[tokio::test]
    async fn test_shutdown_without_flush_drops_buffered_readings() {
        let buffer = Arc::new(ReadingBuffer::new());
        let store = Arc::new(RecordingStore::default());
        let agg = Aggregator::new(buffer.clone(), store.clone(), Duration::from_secs(3600), false);

        buffer.append(reading(7, 42.0, "pending"));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { agg.run(shutdown_rx).await });

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.aggregates.lock().unwrap().is_empty());
    }

    /// Store double whose inserts outlast the window, recording the span of
    /// each call so the test can prove cycles never overlap.
    #[derive(Default)]
    struct SlowStore {
        spans: Mutex<Vec<(Instant, Instant)>>,
    }

    #[async_trait]
    impl Store for SlowStore {
        async fn insert_reading(&self, _reading: &Reading) -> Result<(), StoreError> {
            Ok(())
        }

        async fn insert_aggregate(&self, _summary: &AggregateSummary) -> Result<(), StoreError> {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.spans.lock().unwrap().push((start, Instant::now()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cycles_never_overlap_when_persistence_outlasts_window() {
        let buffer = Arc::new(ReadingBuffer::new());
        let store = Arc::new(SlowStore::default());
        // Window much shorter than the 50ms insert above
        let agg = Aggregator::new(buffer.clone(), store.clone(), Duration::from_millis(10), false);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { agg.run(shutdown_rx).await });

        // Keep one sensor's readings flowing so every cycle has work
        let feeder_buffer = buffer.clone();
        let feeder = tokio::spawn(async move {
            for i in 0..30 {
                feeder_buffer.append(reading(7, i as f64, "load"));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        feeder.await.unwrap();
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        let spans = store.spans.lock().unwrap();
        assert!(spans.len() >= 2, "expected multiple cycles, got {}", spans.len());
        for pair in spans.windows(2) {
            assert!(
                pair[1].0 >= pair[0].1,
                "persistence spans overlap across cycles"
            );
        }
    }
}
