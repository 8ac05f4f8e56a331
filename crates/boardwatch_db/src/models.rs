//! Row models. Derive FromRow; JSON-bearing columns keep their raw text and
//! expose typed accessors.

use boardwatch_protocol::{
    CounterSnapshot, ErrorSample, IdParseError, RunDescriptor, RunId, RunStatus, RunType, TenantId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FeedRecord {
    pub tenant_id: String,
    pub feed_id: String,
    pub company: String,
    pub url: String,
    pub active: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub last_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CompanyRecord {
    pub tenant_id: String,
    pub company_key: String,
    pub company_name: String,
    pub url: String,
    pub source: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRecord {
    pub tenant_id: String,
    pub job_key: String,
    pub company_key: String,
    pub upstream_id: String,
    pub title: String,
    pub url: Option<String>,
    pub apply_url: Option<String>,
    pub location: Option<String>,
    pub state_codes: String,
    pub is_remote: bool,
    pub source: String,
    pub metadata: String,
    pub metadata_kv: String,
    pub content_html: String,
    pub source_updated_iso: String,
    pub source_updated_ts: DateTime<Utc>,
    pub source_updated_ms: i64,
    pub saved: bool,
    pub created_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn state_code_list(&self) -> Vec<String> {
        serde_json::from_str(&self.state_codes).unwrap_or_default()
    }
}

/// Everything the upsert engine needs to write one posting.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_key: String,
    pub company_key: String,
    pub upstream_id: String,
    pub title: String,
    pub url: Option<String>,
    pub apply_url: Option<String>,
    pub location: Option<String>,
    pub state_codes_json: String,
    pub is_remote: bool,
    pub source: String,
    pub metadata_json: String,
    pub metadata_kv_json: String,
    pub content_html: String,
    pub source_updated_iso: String,
    pub source_updated_ts: DateTime<Utc>,
    pub source_updated_ms: i64,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RunRecord {
    pub tenant_id: String,
    pub run_id: String,
    pub run_type: RunType,
    pub status: RunStatus,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub error_samples: String,
    pub feeds_count: i64,
    pub found: i64,
    pub candidates: i64,
    pub added: i64,
    pub updated: i64,
    pub skipped_old: i64,
    pub skipped_unchanged: i64,
    pub no_timestamp: i64,
    pub writes: i64,
    pub errors_count: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

impl RunRecord {
    pub fn counters(&self) -> CounterSnapshot {
        CounterSnapshot {
            feeds_count: self.feeds_count.max(0) as u64,
            found: self.found.max(0) as u64,
            candidates: self.candidates.max(0) as u64,
            added: self.added.max(0) as u64,
            updated: self.updated.max(0) as u64,
            skipped_old: self.skipped_old.max(0) as u64,
            skipped_unchanged: self.skipped_unchanged.max(0) as u64,
            no_timestamp: self.no_timestamp.max(0) as u64,
            writes: self.writes.max(0) as u64,
            errors_count: self.errors_count.max(0) as u64,
        }
    }

    pub fn error_sample_list(&self) -> Vec<ErrorSample> {
        serde_json::from_str(&self.error_samples).unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct QueuedRun {
    pub id: i64,
    pub tenant_id: String,
    pub run_id: String,
    pub run_type: RunType,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub available_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueuedRun {
    pub fn descriptor(&self) -> Result<RunDescriptor, IdParseError> {
        Ok(RunDescriptor {
            tenant_id: TenantId::parse(&self.tenant_id)?,
            run_id: RunId::parse(&self.run_id)?,
            run_type: self.run_type,
        })
    }
}

#[derive(Debug, Clone, Copy, FromRow, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub done: i64,
    pub failed: i64,
}
