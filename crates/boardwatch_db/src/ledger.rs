//! Append-only run ledger.
//!
//! Every write is a merge against the run row, and terminal statuses are
//! guarded so a late heartbeat or duplicate delivery can never regress
//! them. The UI reads the most recent N runs per tenant.

use crate::error::StoreError;
use crate::models::RunRecord;
use boardwatch_protocol::{
    CounterSnapshot, ErrorSample, RunDescriptor, RunStatus, TenantId,
};
use chrono::{Duration, Utc};
use sqlx::{Pool, Sqlite};
use tracing::debug;

#[derive(Clone)]
pub struct RunLedger {
    pool: Pool<Sqlite>,
}

impl RunLedger {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Record a freshly minted run as `enqueued`.
    pub async fn create_enqueued(&self, descriptor: &RunDescriptor) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO fetch_runs (tenant_id, run_id, run_type, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(descriptor.tenant_id.as_str())
        .bind(descriptor.run_id.as_str())
        .bind(descriptor.run_type)
        .bind(RunStatus::Enqueued)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Dispatcher submit failed; the next scheduler tick retries the tenant.
    pub async fn mark_enqueue_failed(
        &self,
        descriptor: &RunDescriptor,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE fetch_runs SET status = ?, error = ?, updated_at = ?
            WHERE tenant_id = ? AND run_id = ? AND status = ?
            "#,
        )
        .bind(RunStatus::EnqueueFailed)
        .bind(error)
        .bind(Utc::now())
        .bind(descriptor.tenant_id.as_str())
        .bind(descriptor.run_id.as_str())
        .bind(RunStatus::Enqueued)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_run(
        &self,
        tenant: &TenantId,
        run_id: &str,
    ) -> Result<Option<RunRecord>, StoreError> {
        let run = sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM fetch_runs WHERE tenant_id = ? AND run_id = ?",
        )
        .bind(tenant.as_str())
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(run)
    }

    /// Advance to `running`, zeroing counters and stamping `started_at`.
    /// Returns false when the run is already terminal (duplicate delivery).
    pub async fn begin_running(
        &self,
        tenant: &TenantId,
        run_id: &str,
        feeds_count: u64,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let rows = sqlx::query(
            r#"
            UPDATE fetch_runs SET
                status = ?, started_at = ?, updated_at = ?, feeds_count = ?,
                found = 0, candidates = 0, added = 0, updated = 0,
                skipped_old = 0, skipped_unchanged = 0, no_timestamp = 0,
                writes = 0, errors_count = 0
            WHERE tenant_id = ? AND run_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(RunStatus::Running)
        .bind(now)
        .bind(now)
        .bind(feeds_count as i64)
        .bind(tenant.as_str())
        .bind(run_id)
        .bind(RunStatus::Enqueued)
        .bind(RunStatus::Running)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Heartbeat merge: current counters and `updated_at`. Only lands while
    /// the run is `running`, so it can never clobber a terminal status.
    pub async fn heartbeat(
        &self,
        tenant: &TenantId,
        run_id: &str,
        counters: &CounterSnapshot,
    ) -> Result<(), StoreError> {
        let rows = self
            .counters_update(tenant, run_id, counters, RunStatus::Running)
            .await?;
        if rows == 0 {
            debug!(tenant = %tenant, run_id, "heartbeat after terminal status, ignored");
        }
        Ok(())
    }

    /// Terminal merge. Exactly one caller wins; later attempts are no-ops.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish(
        &self,
        tenant: &TenantId,
        run_id: &str,
        status: RunStatus,
        counters: &CounterSnapshot,
        duration_ms: i64,
        error: Option<&str>,
        samples: &[ErrorSample],
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let samples_json = serde_json::to_string(samples)?;
        let rows = sqlx::query(
            r#"
            UPDATE fetch_runs SET
                status = ?, error = ?, error_samples = ?,
                found = ?, candidates = ?, added = ?, updated = ?,
                skipped_old = ?, skipped_unchanged = ?, no_timestamp = ?,
                writes = ?, errors_count = ?, feeds_count = ?,
                finished_at = ?, updated_at = ?, duration_ms = ?
            WHERE tenant_id = ? AND run_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(status)
        .bind(error)
        .bind(samples_json)
        .bind(counters.found as i64)
        .bind(counters.candidates as i64)
        .bind(counters.added as i64)
        .bind(counters.updated as i64)
        .bind(counters.skipped_old as i64)
        .bind(counters.skipped_unchanged as i64)
        .bind(counters.no_timestamp as i64)
        .bind(counters.writes as i64)
        .bind(counters.errors_count as i64)
        .bind(counters.feeds_count as i64)
        .bind(now)
        .bind(now)
        .bind(duration_ms)
        .bind(tenant.as_str())
        .bind(run_id)
        .bind(RunStatus::Enqueued)
        .bind(RunStatus::Running)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Terminal `skipped_lock_active` with a human-readable reason.
    pub async fn mark_skipped_lock(
        &self,
        tenant: &TenantId,
        run_id: &str,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE fetch_runs SET status = ?, skip_reason = ?, finished_at = ?, updated_at = ?
            WHERE tenant_id = ? AND run_id = ? AND status IN (?, ?)
            "#,
        )
        .bind(RunStatus::SkippedLockActive)
        .bind(reason)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(tenant.as_str())
        .bind(run_id)
        .bind(RunStatus::Enqueued)
        .bind(RunStatus::Running)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Is another run for this tenant live and inside its heartbeat lease?
    pub async fn has_active_run(
        &self,
        tenant: &TenantId,
        exclude_run_id: &str,
        stale_after: Duration,
    ) -> Result<bool, StoreError> {
        let horizon = Utc::now() - stale_after;
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM fetch_runs
            WHERE tenant_id = ? AND run_id != ? AND status = ? AND updated_at > ?
            "#,
        )
        .bind(tenant.as_str())
        .bind(exclude_run_id)
        .bind(RunStatus::Running)
        .bind(horizon)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(
        &self,
        tenant: &TenantId,
        limit: i64,
    ) -> Result<Vec<RunRecord>, StoreError> {
        let runs = sqlx::query_as::<_, RunRecord>(
            "SELECT * FROM fetch_runs WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    async fn counters_update(
        &self,
        tenant: &TenantId,
        run_id: &str,
        counters: &CounterSnapshot,
        required_status: RunStatus,
    ) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE fetch_runs SET
                found = ?, candidates = ?, added = ?, updated = ?,
                skipped_old = ?, skipped_unchanged = ?, no_timestamp = ?,
                writes = ?, errors_count = ?, updated_at = ?
            WHERE tenant_id = ? AND run_id = ? AND status = ?
            "#,
        )
        .bind(counters.found as i64)
        .bind(counters.candidates as i64)
        .bind(counters.added as i64)
        .bind(counters.updated as i64)
        .bind(counters.skipped_old as i64)
        .bind(counters.skipped_unchanged as i64)
        .bind(counters.no_timestamp as i64)
        .bind(counters.writes as i64)
        .bind(counters.errors_count as i64)
        .bind(Utc::now())
        .bind(tenant.as_str())
        .bind(run_id)
        .bind(required_status)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}
