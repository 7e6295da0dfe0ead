//! Persisted records of filled orders.
//!
//! Each filled order a job answered is written once, grouped by day and job:
//! `<root>/<YYYY-MM-DD>/<job_id>/<order_id>.json`. Daily summaries read the
//! records back.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::ledger::Order;

/// Order store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage for filled-order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist one record under the day of its `placed_at` timestamp.
    async fn append(&self, job_id: &str, order: &Order) -> StoreResult<()>;

    /// All records of `job_id` for `date`; empty when there are none.
    async fn load_day(&self, job_id: &str, date: NaiveDate) -> StoreResult<Vec<Order>>;
}

/// JSON files on the local filesystem, one per order.
#[derive(Debug, Clone)]
pub struct FileOrderStore {
    root: PathBuf,
}

impl FileOrderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the records of `job_id` for `date`.
    pub fn day_dir(&self, job_id: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(date.format("%Y-%m-%d").to_string())
            .join(job_id)
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl OrderStore for FileOrderStore {
    async fn append(&self, job_id: &str, order: &Order) -> StoreResult<()> {
        let dir = self.day_dir(job_id, order.placed_at.date_naive());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(io_error(&dir))?;

        let path = dir.join(format!("{}.json", order.id));
        let body = serde_json::to_vec_pretty(order)?;
        tokio::fs::write(&path, body)
            .await
            .map_err(io_error(&path))?;

        tracing::debug!(order_id = order.id, path = %path.display(), "Order record saved");
        Ok(())
    }

    async fn load_day(&self, job_id: &str, date: NaiveDate) -> StoreResult<Vec<Order>> {
        let dir = self.day_dir(job_id, date);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir)(e)),
        };

        let mut orders = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let body = tokio::fs::read(&path).await.map_err(io_error(&path))?;
            match serde_json::from_slice::<Order>(&body) {
                Ok(order) => orders.push(order),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable order record");
                }
            }
        }

        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }
}
