//! Upsert engine: decide add-vs-update-vs-skip for a batch of normalized
//! postings without a per-document read.
//!
//! The engine performs one batched multi-read of stored freshness keyed by
//! `(tenant, companyKey, upstreamJobId)` and decides per posting:
//! absent → create, stored newer-or-equal → skip, else merge. Create races
//! resolve inside the bulk writer via the existence fallback, and merges
//! carry a freshness guard, so concurrent runs stay monotone.

use boardwatch_db::{JobStore, JobWrite, NewJob, StoreError};
use boardwatch_protocol::TenantId;

/// The writes to submit plus what was skipped outright.
#[derive(Debug, Default)]
pub struct UpsertPlan {
    pub writes: Vec<JobWrite>,
    pub skipped_unchanged: u64,
}

/// Plan the batch. Postings without a parseable freshness timestamp never
/// reach this point; the filter routed them to `no_timestamp`.
pub async fn plan_upserts(
    store: &JobStore,
    tenant: &TenantId,
    batch: Vec<NewJob>,
) -> Result<UpsertPlan, StoreError> {
    if batch.is_empty() {
        return Ok(UpsertPlan::default());
    }

    let keys: Vec<String> = batch.iter().map(|job| job.job_key.clone()).collect();
    let stored = store.multi_get_freshness(tenant, &keys).await?;

    let mut plan = UpsertPlan::default();
    for job in batch {
        match stored.get(&job.job_key) {
            None => plan.writes.push(JobWrite::Create(job)),
            Some(prev) if job.source_updated_ms <= *prev => plan.skipped_unchanged += 1,
            Some(_) => plan.writes.push(JobWrite::Merge(job)),
        }
    }
    Ok(plan)
}
