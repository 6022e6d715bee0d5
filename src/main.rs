//! CLI entry point for the sensor telemetry pipeline.
//!
//! Provides subcommands for running the ingestion/aggregation pipeline,
//! publishing simulated sensor readings, and provisioning the storage schema.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sensor_pipeline::aggregate::Aggregator;
use sensor_pipeline::buffer::ReadingBuffer;
use sensor_pipeline::config::Settings;
use sensor_pipeline::ingest;
use sensor_pipeline::publish::run_publisher;
use sensor_pipeline::store::{MySqlStore, Store};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "sensor_pipeline")]
#[command(about = "MQTT sensor telemetry ingestion and windowed aggregation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion and aggregation pipeline until Ctrl-C
    Run,
    /// Publish simulated sensor readings to the configured topic
    Publish {
        /// Path to the sensor catalog JSON
        #[arg(short, long, default_value = "sensors.json")]
        catalog: String,
    },
    /// Create the storage tables if they do not exist
    InitSchema,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/sensor_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("sensor_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Run => run_pipeline(settings).await?,
        Commands::Publish { catalog } => run_publisher(&settings, &catalog).await?,
        Commands::InitSchema => {
            let store = MySqlStore::connect(&settings.database_url).await?;
            store.ensure_schema().await?;
        }
    }

    Ok(())
}

/// Wires up the pipeline and runs it until a graceful-shutdown signal.
///
/// Shutdown ordering matters: the subscriber stops first, then the processor
/// drains whatever the channel still holds, and only then is the aggregator
/// told to stop so its final flush sees every ingested reading.
async fn run_pipeline(settings: Settings) -> Result<()> {
    let mysql = MySqlStore::connect(&settings.database_url).await?;
    mysql.ensure_schema().await?;
    let store: Arc<dyn Store> = Arc::new(mysql);

    let buffer = Arc::new(ReadingBuffer::new());
    let (tx, rx) = ingest::channel();
    let (ingest_shutdown_tx, ingest_shutdown_rx) = watch::channel(false);
    let (agg_shutdown_tx, agg_shutdown_rx) = watch::channel(false);

    let subscriber = tokio::spawn(ingest::run_subscriber(
        settings.mqtt.clone(),
        tx,
        ingest_shutdown_rx,
    ));

    let processor = tokio::spawn(ingest::run_processor(rx, buffer.clone(), store.clone()));

    let aggregator = Aggregator::new(buffer, store, settings.window, settings.flush_on_shutdown);
    let aggregation = tokio::spawn(async move { aggregator.run(agg_shutdown_rx).await });

    info!(
        topic = %settings.mqtt.topic,
        window_secs = settings.window.as_secs(),
        flush_on_shutdown = settings.flush_on_shutdown,
        "pipeline running, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal observed");

    // Stop delivery; the subscriber returning drops the channel sender
    ingest_shutdown_tx.send(true).ok();
    subscriber.await??;

    // Let the processor finish the readings already queued
    processor.await?;

    // Final aggregation flush (if configured) now sees a settled buffer
    agg_shutdown_tx.send(true).ok();
    aggregation.await?;

    info!("pipeline stopped");
    Ok(())
}
