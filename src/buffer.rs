//! Shared accumulator of not-yet-aggregated readings.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::Reading;

/// Lock-protected map from sensor id to the readings accumulated since the
/// last drain, in delivery order.
///
/// This is the only shared mutable state between the message-delivery path
/// and the timer path. Both operations are pure data moves; the lock is
/// never held across I/O.
#[derive(Debug, Default)]
pub struct ReadingBuffer {
    inner: Mutex<HashMap<i64, Vec<Reading>>>,
}

impl ReadingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a reading to its sensor's sequence, creating the entry if
    /// absent. Safe to call concurrently from the delivery context.
    pub fn append(&self, reading: Reading) {
        self.lock().entry(reading.sensor_id).or_default().push(reading);
    }

    /// Atomically takes the full contents and resets the buffer to empty.
    ///
    /// A reading appended before the drain is in the returned map; a reading
    /// appended after it lands in the next window. No reading is ever seen
    /// by both.
    pub fn drain_all(&self) -> HashMap<i64, Vec<Reading>> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<i64, Vec<Reading>>> {
        // Neither operation can panic while holding the lock, but a poisoned
        // map is still coherent data, so recover it rather than unwinding.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
