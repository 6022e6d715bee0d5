//! Error taxonomy for the ingestion and persistence paths.
//!
//! Nothing here is fatal to the process: decode failures drop the one
//! message, store failures abandon the one row, and transport failures are
//! retried inside the subscriber loop.

use thiserror::Error;

/// A malformed inbound message. The message is dropped and logged; there is
/// no redelivery mechanism at this layer.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not well-formed or is missing a required field: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("sensor_id {0:?} is not coercible to an integer identity")]
    SensorId(String),

    #[error("timestamp {0:?} is not an ISO-8601 instant")]
    Timestamp(String),
}

/// A persistence failure. All variants are non-fatal-but-reportable; the
/// transient ones are eligible for the retry wrapper in [`crate::store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database connection failure: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("database operation timed out: {0}")]
    Timeout(String),
}

impl StoreError {
    /// Connection failures and timeouts may succeed on a later attempt;
    /// constraint violations never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &e {
            sqlx::Error::Database(db) => match db.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => StoreError::Constraint(e.to_string()),
                _ => StoreError::Connection(e.to_string()),
            },
            sqlx::Error::PoolTimedOut => StoreError::Timeout(e.to_string()),
            _ => StoreError::Connection(e.to_string()),
        }
    }
}
