//! Persistence contract for raw readings and aggregate summaries.

mod mysql;

pub use mysql::MySqlStore;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StoreError;
use crate::model::{AggregateSummary, Reading};

/// Insert contract consumed by the ingestion and aggregation paths.
///
/// Both operations must be safe under concurrent invocation from multiple
/// callers; any serialization the backend needs lives behind this trait.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_reading(&self, reading: &Reading) -> Result<(), StoreError>;

    async fn insert_aggregate(&self, summary: &AggregateSummary) -> Result<(), StoreError>;
}

/// Retries `call` on transient store failures with a fixed backoff.
///
/// Constraint violations are permanent and returned immediately; connection
/// failures and timeouts are re-attempted up to `attempts` times in total.
pub async fn with_retries<F, Fut>(
    op: &str,
    attempts: u32,
    backoff: Duration,
    mut call: F,
) -> Result<(), StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(op, attempt, error = %e, "transient store failure, retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
