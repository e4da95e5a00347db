//! Out-of-band log sink for absorbed leaf failures.
//!
//! Media downloads may fail per asset without failing the run; those
//! failures are recorded here so they stay visible. The sink is
//! fire-and-forget: its own failures are swallowed.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::warn;

use crate::db;

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn record(&self, message: &str, category: &str, context: &str);
}

/// Sink writing to the `sync_log` table.
#[derive(Debug, Clone)]
pub struct DbLogSink {
    pool: SqlitePool,
}

impl DbLogSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogSink for DbLogSink {
    async fn record(&self, message: &str, category: &str, context: &str) {
        if let Err(err) = db::insert_log(&self.pool, message, category, Some(context)).await {
            warn!(?err, category, "failed to record sync log entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_log_rows() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        let sink = DbLogSink::new(pool.clone());
        sink.record("download failed", "MediaServiceError", "file: a.jpg")
            .await;

        let (message, category): (String, String) =
            sqlx::query_as("SELECT message, category FROM sync_log LIMIT 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(message, "download failed");
        assert_eq!(category, "MediaServiceError");
    }
}
