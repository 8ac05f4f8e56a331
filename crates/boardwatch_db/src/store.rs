//! Per-tenant job store: tenants, feeds, companies, jobs, and the GC
//! delete loops.

use crate::error::StoreError;
use crate::models::{CompanyRecord, FeedRecord, JobRecord, NewJob};
use boardwatch_protocol::defaults::MULTI_GET_CHUNK;
use boardwatch_protocol::TenantId;
use chrono::{DateTime, Utc};
use sqlx::{Pool, QueryBuilder, Sqlite};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

impl JobStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Tenants
    // ------------------------------------------------------------------

    pub async fn ensure_tenant(&self, tenant: &TenantId) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO tenants (tenant_id, created_at) VALUES (?, ?)")
            .bind(tenant.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT tenant_id FROM tenants ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids
            .iter()
            .filter_map(|id| TenantId::parse(id).ok())
            .collect())
    }

    // ------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------

    pub async fn upsert_feed(
        &self,
        tenant: &TenantId,
        feed_id: &str,
        company: &str,
        url: &str,
        source: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feeds (tenant_id, feed_id, company, url, active, source)
            VALUES (?, ?, ?, ?, 1, ?)
            ON CONFLICT (tenant_id, feed_id) DO UPDATE SET
                company = excluded.company,
                url = excluded.url,
                source = excluded.source
            "#,
        )
        .bind(tenant.as_str())
        .bind(feed_id)
        .bind(company)
        .bind(url)
        .bind(source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn archive_feed(&self, tenant: &TenantId, feed_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET archived_at = ? WHERE tenant_id = ? AND feed_id = ?",
        )
        .bind(Utc::now())
        .bind(tenant.as_str())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn restore_feed(&self, tenant: &TenantId, feed_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET archived_at = NULL, active = 1 WHERE tenant_id = ? AND feed_id = ?",
        )
        .bind(tenant.as_str())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Feeds eligible for ingestion: active and never archived.
    pub async fn active_feeds(&self, tenant: &TenantId) -> Result<Vec<FeedRecord>, StoreError> {
        let feeds = sqlx::query_as::<_, FeedRecord>(
            r#"
            SELECT * FROM feeds
            WHERE tenant_id = ? AND active = 1 AND archived_at IS NULL
            ORDER BY feed_id
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    pub async fn record_feed_error(
        &self,
        tenant: &TenantId,
        feed_id: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE feeds SET last_error = ? WHERE tenant_id = ? AND feed_id = ?")
            .bind(message)
            .bind(tenant.as_str())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_feed_success(
        &self,
        tenant: &TenantId,
        feed_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE feeds SET last_error = NULL, last_synced_at = ? WHERE tenant_id = ? AND feed_id = ?",
        )
        .bind(now)
        .bind(tenant.as_str())
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Companies
    // ------------------------------------------------------------------

    pub async fn upsert_company(
        &self,
        tenant: &TenantId,
        company_key: &str,
        company_name: &str,
        url: &str,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO companies (tenant_id, company_key, company_name, url, source, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (tenant_id, company_key) DO UPDATE SET
                company_name = CASE WHEN excluded.company_name != '' THEN excluded.company_name
                                    ELSE company_name END,
                url = excluded.url,
                source = excluded.source,
                last_seen_at = excluded.last_seen_at
            "#,
        )
        .bind(tenant.as_str())
        .bind(company_key)
        .bind(company_name)
        .bind(url)
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_company(
        &self,
        tenant: &TenantId,
        company_key: &str,
    ) -> Result<Option<CompanyRecord>, StoreError> {
        let company = sqlx::query_as::<_, CompanyRecord>(
            "SELECT * FROM companies WHERE tenant_id = ? AND company_key = ?",
        )
        .bind(tenant.as_str())
        .bind(company_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(company)
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// The single batched multi-read the upsert engine is allowed: stored
    /// freshness for each ref, chunked so no statement carries more than
    /// [`MULTI_GET_CHUNK`] keys.
    pub async fn multi_get_freshness(
        &self,
        tenant: &TenantId,
        job_keys: &[String],
    ) -> Result<HashMap<String, i64>, StoreError> {
        let mut freshness = HashMap::with_capacity(job_keys.len());
        for chunk in job_keys.chunks(MULTI_GET_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(
                "SELECT job_key, source_updated_ms FROM jobs WHERE tenant_id = ",
            );
            builder.push_bind(tenant.as_str());
            builder.push(" AND job_key IN (");
            let mut separated = builder.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            builder.push(")");

            let rows: Vec<(String, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
            freshness.extend(rows);
        }
        Ok(freshness)
    }

    /// Atomic create. Returns false when the row already exists (create
    /// race); the caller falls back to a merge.
    pub async fn try_create_job(
        &self,
        tenant: &TenantId,
        job: &NewJob,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs (
                tenant_id, job_key, company_key, upstream_id, title, url, apply_url,
                location, state_codes, is_remote, source, metadata, metadata_kv,
                content_html, source_updated_iso, source_updated_ts, source_updated_ms,
                saved, created_at, first_seen_at, last_seen_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(tenant.as_str())
        .bind(&job.job_key)
        .bind(&job.company_key)
        .bind(&job.upstream_id)
        .bind(&job.title)
        .bind(&job.url)
        .bind(&job.apply_url)
        .bind(&job.location)
        .bind(&job.state_codes_json)
        .bind(job.is_remote)
        .bind(&job.source)
        .bind(&job.metadata_json)
        .bind(&job.metadata_kv_json)
        .bind(&job.content_html)
        .bind(&job.source_updated_iso)
        .bind(job.source_updated_ts)
        .bind(job.source_updated_ms)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Merge write, guarded so stored freshness only ever advances. The
    /// `saved` bookmark belongs to the UI and is left alone unless
    /// `reset_saved` is set.
    pub async fn merge_job(
        &self,
        tenant: &TenantId,
        job: &NewJob,
        now: DateTime<Utc>,
        reset_saved: bool,
    ) -> Result<u64, StoreError> {
        let saved_clause = if reset_saved { ", saved = 0" } else { "" };
        let sql = format!(
            r#"
            UPDATE jobs SET
                title = ?, url = ?, apply_url = ?, location = ?, state_codes = ?,
                is_remote = ?, source = ?, metadata = ?, metadata_kv = ?,
                content_html = ?, source_updated_iso = ?, source_updated_ts = ?,
                source_updated_ms = ?, last_seen_at = ?{saved_clause}
            WHERE tenant_id = ? AND job_key = ? AND source_updated_ms < ?
            "#
        );
        let result = sqlx::query(&sql)
            .bind(&job.title)
            .bind(&job.url)
            .bind(&job.apply_url)
            .bind(&job.location)
            .bind(&job.state_codes_json)
            .bind(job.is_remote)
            .bind(&job.source)
            .bind(&job.metadata_json)
            .bind(&job.metadata_kv_json)
            .bind(&job.content_html)
            .bind(&job.source_updated_iso)
            .bind(job.source_updated_ts)
            .bind(job.source_updated_ms)
            .bind(now)
            .bind(tenant.as_str())
            .bind(&job.job_key)
            .bind(job.source_updated_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_job(
        &self,
        tenant: &TenantId,
        job_key: &str,
    ) -> Result<Option<JobRecord>, StoreError> {
        let job = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE tenant_id = ? AND job_key = ?",
        )
        .bind(tenant.as_str())
        .bind(job_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    pub async fn count_jobs(&self, tenant: &TenantId) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE tenant_id = ?")
            .bind(tenant.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ------------------------------------------------------------------
    // GC delete loops
    // ------------------------------------------------------------------

    /// Delete jobs whose upstream freshness is before `cutoff`. Bounded:
    /// each iteration selects at most `batch` keys then deletes them;
    /// stops on a short page or after `loop_cap` iterations.
    pub async fn delete_stale_jobs(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
        batch: i64,
        loop_cap: usize,
    ) -> Result<u64, StoreError> {
        self.bounded_delete(
            tenant,
            "SELECT job_key FROM jobs WHERE tenant_id = ? AND source_updated_ts < ? LIMIT ?",
            "jobs",
            "job_key",
            cutoff,
            batch,
            loop_cap,
        )
        .await
    }

    /// Delete run records created before `cutoff`.
    pub async fn delete_old_runs(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
        batch: i64,
        loop_cap: usize,
    ) -> Result<u64, StoreError> {
        self.bounded_delete(
            tenant,
            "SELECT run_id FROM fetch_runs WHERE tenant_id = ? AND created_at < ? LIMIT ?",
            "fetch_runs",
            "run_id",
            cutoff,
            batch,
            loop_cap,
        )
        .await
    }

    /// Delete companies not seen since `cutoff`.
    pub async fn delete_stale_companies(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
        batch: i64,
        loop_cap: usize,
    ) -> Result<u64, StoreError> {
        self.bounded_delete(
            tenant,
            "SELECT company_key FROM companies WHERE tenant_id = ? AND last_seen_at < ? LIMIT ?",
            "companies",
            "company_key",
            cutoff,
            batch,
            loop_cap,
        )
        .await
    }

    async fn bounded_delete(
        &self,
        tenant: &TenantId,
        select_sql: &str,
        table: &str,
        key_column: &str,
        cutoff: DateTime<Utc>,
        batch: i64,
        loop_cap: usize,
    ) -> Result<u64, StoreError> {
        let mut total = 0u64;
        for _ in 0..loop_cap {
            let keys: Vec<String> = sqlx::query_scalar(select_sql)
                .bind(tenant.as_str())
                .bind(cutoff)
                .bind(batch)
                .fetch_all(&self.pool)
                .await?;
            if keys.is_empty() {
                break;
            }

            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new(format!("DELETE FROM {table} WHERE tenant_id = "));
            builder.push_bind(tenant.as_str());
            builder.push(format!(" AND {key_column} IN ("));
            let mut separated = builder.separated(", ");
            for key in &keys {
                separated.push_bind(key);
            }
            builder.push(")");
            let deleted = builder.build().execute(&self.pool).await?.rows_affected();
            total += deleted;

            if (keys.len() as i64) < batch {
                break;
            }
        }
        debug!(tenant = %tenant, table, total, "gc delete loop finished");
        Ok(total)
    }
}
