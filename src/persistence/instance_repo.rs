//! Instance record repository: store keys and the JSON record codec.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::models::instance::InstanceRecord;
use crate::{AppError, Result};

use super::RecordStore;

/// Namespace prepended to every normalized instance path.
pub const KEY_PREFIX: &str = "instancecontrol:";

/// Store key for a normalized instance path.
#[must_use]
pub fn instance_key(normalized: &Path) -> String {
    format!("{KEY_PREFIX}{}", normalized.to_string_lossy())
}

/// Serialize a record into the store's value representation.
///
/// # Errors
///
/// Returns `AppError::Persistence` if the record cannot be encoded.
pub fn encode_record(record: &InstanceRecord) -> Result<String> {
    serde_json::to_string(record)
        .map_err(|err| AppError::Persistence(format!("failed to encode record: {err}")))
}

/// Deserialize a record from the store's value representation.
///
/// # Errors
///
/// Returns `AppError::Persistence` if the value is not a valid record.
pub fn decode_record(value: &str) -> Result<InstanceRecord> {
    serde_json::from_str(value)
        .map_err(|err| AppError::Persistence(format!("failed to decode record: {err}")))
}

/// Repository wrapper around a [`RecordStore`] for instance records.
///
/// Owns the `updated_at` clock: stamps never go backwards within a process,
/// and never fall below a stamp this repository has already loaded.
#[derive(Clone)]
pub struct InstanceRepo {
    store: Arc<dyn RecordStore>,
    last_stamp: Arc<Mutex<DateTime<Utc>>>,
}

impl InstanceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            last_stamp: Arc::new(Mutex::new(DateTime::<Utc>::MIN_UTC)),
        }
    }

    /// Load the record under `key`.
    ///
    /// A missing key, a backend failure, or an undecodable value all yield a
    /// synthetic `unknown` record, so querying an instance never fails here.
    pub async fn load(&self, key: &str) -> InstanceRecord {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw,
            Err(StoreError::NotFound(_)) => {
                debug!(key, "no record stored, reporting unknown");
                return InstanceRecord::unknown();
            }
            Err(err) => {
                warn!(key, %err, "record lookup failed, reporting unknown");
                return InstanceRecord::unknown();
            }
        };

        match decode_record(&raw) {
            Ok(record) => {
                self.observe(record.updated_at);
                record
            }
            Err(err) => {
                warn!(key, %err, "stored record is unreadable, reporting unknown");
                InstanceRecord::unknown()
            }
        }
    }

    /// Stamp `updated_at` and write the complete record under `key`.
    ///
    /// Returns the record exactly as written.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Persistence` if encoding or the store write fails.
    pub async fn save(&self, key: &str, mut record: InstanceRecord) -> Result<InstanceRecord> {
        record.updated_at = self.next_stamp();
        let value = encode_record(&record)?;
        self.store.set(key, value).await?;
        debug!(key, state = %record.state, pid = record.pid, "record saved");
        Ok(record)
    }

    fn next_stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let stamp = Utc::now().max(*last);
        *last = stamp;
        stamp
    }

    fn observe(&self, stamp: DateTime<Utc>) {
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        if stamp > *last {
            *last = stamp;
        }
    }
}
