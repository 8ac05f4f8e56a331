//! Durable dispatch queue.
//!
//! Carries one run descriptor per delivery with at-least-once semantics:
//! claims are atomic (UPDATE ... WHERE status = 'queued'), every claim takes
//! a lease, and expired leases are released back to the queue until the
//! attempt budget is spent. Idempotency lives in the run ledger, not here.

use crate::error::StoreError;
use crate::models::{QueueStats, QueuedRun};
use boardwatch_protocol::RunDescriptor;
use chrono::{Duration, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

#[derive(Clone)]
pub struct DispatchQueue {
    pool: Pool<Sqlite>,
}

impl DispatchQueue {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Append a run to the queue.
    pub async fn enqueue(
        &self,
        descriptor: &RunDescriptor,
        max_attempts: i64,
    ) -> Result<i64, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO dispatch_queue
                (tenant_id, run_id, run_type, status, attempts, max_attempts,
                 available_at, created_at, updated_at)
            VALUES (?, ?, ?, 'queued', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(descriptor.tenant_id.as_str())
        .bind(descriptor.run_id.as_str())
        .bind(descriptor.run_type)
        .bind(max_attempts.max(1))
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Whether the tenant already has an undelivered run buffered.
    pub async fn has_queued(&self, tenant_id: &str) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dispatch_queue WHERE tenant_id = ? AND status = 'queued'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Atomically claim the oldest available run and take a lease on it.
    pub async fn claim(&self, lease: Duration) -> Result<Option<QueuedRun>, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM dispatch_queue
            WHERE status = 'queued' AND available_at <= ?
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = id else {
            tx.commit().await?;
            return Ok(None);
        };

        let rows_affected = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET status = 'running',
                attempts = attempts + 1,
                lease_expires_at = ?,
                updated_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(now + lease)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Another dispatcher won the claim.
            tx.commit().await?;
            return Ok(None);
        }

        let claimed: QueuedRun = sqlx::query_as("SELECT * FROM dispatch_queue WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            tenant = %claimed.tenant_id,
            run = %claimed.run_id,
            attempt = claimed.attempts,
            "claimed run"
        );
        Ok(Some(claimed))
    }

    /// Mark a delivery as fully processed.
    pub async fn complete(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE dispatch_queue SET status = 'done', lease_expires_at = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a delivery as failed for good.
    pub async fn fail(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE dispatch_queue SET status = 'failed', last_error = ?, lease_expires_at = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hand a claimed delivery back: requeued after `retry_backoff` if
    /// attempts remain, failed otherwise. Returns true when requeued.
    pub async fn release(
        &self,
        id: i64,
        retry_backoff: Duration,
        error: &str,
    ) -> Result<bool, StoreError> {
        let row: Option<QueuedRun> =
            sqlx::query_as("SELECT * FROM dispatch_queue WHERE id = ? AND status = 'running'")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(run) = row else {
            return Ok(false);
        };

        if run.attempts >= run.max_attempts {
            self.fail(id, error).await?;
            return Ok(false);
        }

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET status = 'queued', lease_expires_at = NULL, available_at = ?,
                last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now + retry_backoff)
        .bind(error)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(true)
    }

    /// Release expired leases. Runs with attempts left go back to `queued`
    /// after `retry_backoff`; exhausted ones are marked failed and returned
    /// so the caller can reflect that in the run ledger.
    pub async fn release_expired(
        &self,
        retry_backoff: Duration,
    ) -> Result<Vec<QueuedRun>, StoreError> {
        let now = Utc::now();
        let expired: Vec<QueuedRun> = sqlx::query_as(
            "SELECT * FROM dispatch_queue WHERE status = 'running' AND lease_expires_at < ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut exhausted = Vec::new();
        for run in expired {
            if run.attempts >= run.max_attempts {
                warn!(tenant = %run.tenant_id, run = %run.run_id, "lease expired, attempts exhausted");
                self.fail(run.id, "delivery lease expired").await?;
                exhausted.push(run);
            } else {
                warn!(tenant = %run.tenant_id, run = %run.run_id, "lease expired, requeueing");
                sqlx::query(
                    r#"
                    UPDATE dispatch_queue
                    SET status = 'queued', lease_expires_at = NULL, available_at = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now + retry_backoff)
                .bind(now)
                .bind(run.id)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(exhausted)
    }

    /// Queue depth by status.
    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let stats: QueueStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'done') AS done,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM dispatch_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}
