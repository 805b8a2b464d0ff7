//! Durable bookkeeping for the daily nudge batch.
//!
//! The batch is kept as two key-value pairs: the local calendar day it was
//! scheduled on and the JSON list of platform handles. The store is the single
//! source of truth; nothing is cached in memory.
use crate::db::{self, Pool};
use crate::model::{NotificationHandle, ScheduledBatch};
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

pub const BATCH_DATE_KEY: &str = "nudge_batch_date";
pub const BATCH_HANDLES_KEY: &str = "nudge_batch_handles";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Durable string key-value persistence that outlives the process.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// `kv_store` table in the application database.
#[derive(Debug, Clone)]
pub struct SqliteKvStore {
    pool: Pool,
}

impl SqliteKvStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        db::kv_get(&self.pool, key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        db::kv_set(&self.pool, key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        db::kv_remove(&self.pool, key).await
    }
}

/// Process-local map, for tests and ephemeral runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persisted nudge batch is corrupt: {0}")]
    Corrupt(String),
    #[error("key-value backend failed: {0:#}")]
    Backend(anyhow::Error),
}

#[derive(Clone)]
pub struct HandleStore {
    kv: Arc<dyn KeyValueStore>,
}

impl HandleStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Read the persisted batch. Missing, unreadable or half-written state is
    /// reported as absent so callers proceed as if nothing was scheduled.
    #[instrument(skip_all)]
    pub async fn load(&self) -> Option<ScheduledBatch> {
        match self.try_load().await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(%err, "treating persisted nudge batch as absent");
                None
            }
        }
    }

    pub async fn try_load(&self) -> Result<Option<ScheduledBatch>, StoreError> {
        let date = self
            .kv
            .get(BATCH_DATE_KEY)
            .await
            .map_err(StoreError::Backend)?;
        let handles = self
            .kv
            .get(BATCH_HANDLES_KEY)
            .await
            .map_err(StoreError::Backend)?;

        let (date, handles) = match (date, handles) {
            (None, None) => return Ok(None),
            (Some(date), Some(handles)) => (date, handles),
            (Some(_), None) => return Err(StoreError::Corrupt("handles missing".into())),
            (None, Some(_)) => return Err(StoreError::Corrupt("date marker missing".into())),
        };

        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("bad date marker {:?}: {}", date, e)))?;
        let handles: Vec<NotificationHandle> = serde_json::from_str(&handles)
            .map_err(|e| StoreError::Corrupt(format!("bad handle list: {}", e)))?;
        Ok(Some(ScheduledBatch { date, handles }))
    }

    #[instrument(skip_all)]
    pub async fn save(&self, batch: &ScheduledBatch) -> Result<()> {
        let handles = serde_json::to_string(&batch.handles)?;
        // Handles first: a crash between the two writes leaves the batch
        // without a date marker, which loads as absent.
        self.kv.remove(BATCH_DATE_KEY).await?;
        self.kv.set(BATCH_HANDLES_KEY, &handles).await?;
        self.kv
            .set(BATCH_DATE_KEY, &batch.date.format(DATE_FORMAT).to_string())
            .await?;
        debug!(date = %batch.date, count = batch.handles.len(), "saved nudge batch");
        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<()> {
        self.kv.remove(BATCH_DATE_KEY).await?;
        self.kv.remove(BATCH_HANDLES_KEY).await?;
        Ok(())
    }
}
