//! Schema initialization. Idempotent: every statement is IF NOT EXISTS.

use crate::error::StoreError;
use sqlx::{Pool, Sqlite};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenants (
        tenant_id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS feeds (
        tenant_id TEXT NOT NULL,
        feed_id TEXT NOT NULL,
        company TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        archived_at TEXT,
        source TEXT,
        last_error TEXT,
        last_synced_at TEXT,
        PRIMARY KEY (tenant_id, feed_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS companies (
        tenant_id TEXT NOT NULL,
        company_key TEXT NOT NULL,
        company_name TEXT NOT NULL DEFAULT '',
        url TEXT NOT NULL DEFAULT '',
        source TEXT NOT NULL DEFAULT 'unknown',
        last_seen_at TEXT NOT NULL,
        PRIMARY KEY (tenant_id, company_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        tenant_id TEXT NOT NULL,
        job_key TEXT NOT NULL,
        company_key TEXT NOT NULL,
        upstream_id TEXT NOT NULL,
        title TEXT NOT NULL,
        url TEXT,
        apply_url TEXT,
        location TEXT,
        state_codes TEXT NOT NULL DEFAULT '[]',
        is_remote INTEGER NOT NULL DEFAULT 0,
        source TEXT NOT NULL DEFAULT 'unknown',
        metadata TEXT NOT NULL DEFAULT '[]',
        metadata_kv TEXT NOT NULL DEFAULT '{}',
        content_html TEXT NOT NULL DEFAULT '',
        source_updated_iso TEXT NOT NULL,
        source_updated_ts TEXT NOT NULL,
        source_updated_ms INTEGER NOT NULL,
        saved INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        first_seen_at TEXT NOT NULL,
        last_seen_at TEXT NOT NULL,
        PRIMARY KEY (tenant_id, job_key)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_jobs_freshness
        ON jobs (tenant_id, source_updated_ts)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fetch_runs (
        tenant_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        run_type TEXT NOT NULL,
        status TEXT NOT NULL,
        skip_reason TEXT,
        error TEXT,
        error_samples TEXT NOT NULL DEFAULT '[]',
        feeds_count INTEGER NOT NULL DEFAULT 0,
        found INTEGER NOT NULL DEFAULT 0,
        candidates INTEGER NOT NULL DEFAULT 0,
        added INTEGER NOT NULL DEFAULT 0,
        updated INTEGER NOT NULL DEFAULT 0,
        skipped_old INTEGER NOT NULL DEFAULT 0,
        skipped_unchanged INTEGER NOT NULL DEFAULT 0,
        no_timestamp INTEGER NOT NULL DEFAULT 0,
        writes INTEGER NOT NULL DEFAULT 0,
        errors_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        finished_at TEXT,
        updated_at TEXT NOT NULL,
        duration_ms INTEGER,
        PRIMARY KEY (tenant_id, run_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_fetch_runs_created
        ON fetch_runs (tenant_id, created_at DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dispatch_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_id TEXT NOT NULL,
        run_id TEXT NOT NULL,
        run_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        available_at TEXT NOT NULL,
        lease_expires_at TEXT,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_dispatch_queue_claim
        ON dispatch_queue (status, available_at, id)
    "#,
];

/// Create all tables and indexes if absent.
pub async fn init_schema(pool: &Pool<Sqlite>) -> Result<(), StoreError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
