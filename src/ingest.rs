//! MQTT subscriber and the delivery-to-processing bridge.
//!
//! The transport event loop only decodes and enqueues; a dedicated
//! processing task appends to the buffer and issues raw inserts, so a slow
//! store never backs up message delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::buffer::ReadingBuffer;
use crate::config::MqttSettings;
use crate::model::Reading;
use crate::store::{self, Store};

/// Backpressure bound between the delivery context and the processing task.
const CHANNEL_CAPACITY: usize = 1024;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const INSERT_ATTEMPTS: u32 = 3;
const INSERT_BACKOFF: Duration = Duration::from_millis(250);

pub fn channel() -> (mpsc::Sender<Reading>, mpsc::Receiver<Reading>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Runs the MQTT subscription loop until `shutdown` flips.
///
/// Each decoded reading is handed to the processing channel; malformed
/// messages are dropped and logged, never retried. Connection failures are
/// logged and the session is re-established after a delay; the `ConnAck`
/// handler resubscribes, so the subscriber carries no state across
/// reconnects.
pub async fn run_subscriber(
    settings: MqttSettings,
    tx: mpsc::Sender<Reading>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut options = MqttOptions::new("sensor-pipeline-ingest", &settings.host, settings.port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(options, 64);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("shutdown requested, stopping subscriber");
                return Ok(());
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(host = %settings.host, topic = %settings.topic, "connected, subscribing");
                    client.subscribe(&settings.topic, QoS::AtLeastOnce).await?;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match Reading::decode(&publish.payload) {
                        Ok(reading) => {
                            debug!(
                                sensor_id = reading.sensor_id,
                                value = reading.value,
                                "reading received"
                            );
                            if tx.send(reading).await.is_err() {
                                // Processing task is gone; nothing left to feed
                                return Ok(());
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping malformed message"),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "transport connection lost, reconnecting");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }
}

/// Consumes decoded readings until the channel closes.
///
/// Each reading is appended to the buffer and its raw insert is spawned
/// fire-and-continue: a stalled store degrades durability of individual
/// rows, never ingestion throughput. Per-sensor append order matches
/// delivery order because this is the channel's single consumer.
pub async fn run_processor(
    mut rx: mpsc::Receiver<Reading>,
    buffer: Arc<ReadingBuffer>,
    store: Arc<dyn Store>,
) {
    while let Some(reading) = rx.recv().await {
        buffer.append(reading.clone());

        let store = store.clone();
        tokio::spawn(async move {
            let result = store::with_retries("insert_reading", INSERT_ATTEMPTS, INSERT_BACKOFF, || {
                store.insert_reading(&reading)
            })
            .await;

            if let Err(e) = result {
                error!(
                    sensor_id = reading.sensor_id,
                    error = %e,
                    "raw reading lost, could not persist"
                );
            }
        });
    }

    debug!("reading channel closed, processor exiting");
}
