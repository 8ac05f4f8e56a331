//! Bulk writer: the bounded-concurrency layer every job write flows
//! through.
//!
//! Owned by exactly one worker invocation. Writes execute on at most
//! `concurrency` tasks at a time, transient storage errors are retried
//! with backoff, and [`BulkWriter::close`] is the barrier that must
//! complete before a terminal run status is written.

use crate::error::StoreError;
use crate::models::NewJob;
use crate::store::JobStore;
use boardwatch_protocol::TenantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

/// Attempts per write, counting the first.
const WRITE_MAX_ATTEMPTS: u32 = 5;
const WRITE_BACKOFF_BASE_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Added,
    Updated,
}

/// One decided write: the upsert engine has already chosen create vs merge.
#[derive(Debug, Clone)]
pub enum JobWrite {
    Create(NewJob),
    Merge(NewJob),
}

/// One write that failed for good: which job, what happened.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub job_key: String,
    pub message: String,
}

/// What actually committed by close time.
#[derive(Debug, Default)]
pub struct WriteSummary {
    pub added: u64,
    pub updated: u64,
    pub failures: Vec<WriteFailure>,
}

pub struct BulkWriter {
    store: JobStore,
    tenant: TenantId,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<WriteOutcome, WriteFailure>>,
    reset_saved: bool,
}

impl BulkWriter {
    pub fn new(store: JobStore, tenant: TenantId, concurrency: usize, reset_saved: bool) -> Self {
        Self {
            store,
            tenant,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
            reset_saved,
        }
    }

    /// Queue one write. Execution is bounded by the semaphore, so any
    /// number may be submitted without exceeding the write concurrency.
    pub fn submit(&mut self, write: JobWrite) {
        let store = self.store.clone();
        let tenant = self.tenant.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let reset_saved = self.reset_saved;

        self.tasks.spawn(async move {
            let job_key = match &write {
                JobWrite::Create(job) | JobWrite::Merge(job) => job.job_key.clone(),
            };
            let _permit = semaphore.acquire_owned().await.map_err(|_| WriteFailure {
                job_key: job_key.clone(),
                message: "write pool closed".to_string(),
            })?;
            execute_with_retry(&store, &tenant, &write, reset_saved)
                .await
                .map_err(|e| WriteFailure {
                    job_key,
                    message: e.to_string(),
                })
        });
    }

    /// Flush everything. This is the barrier: when it returns, every
    /// submitted write has committed or failed for good.
    pub async fn close(mut self) -> WriteSummary {
        let mut summary = WriteSummary::default();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(WriteOutcome::Added)) => summary.added += 1,
                Ok(Ok(WriteOutcome::Updated)) => summary.updated += 1,
                Ok(Err(failure)) => {
                    warn!(job_key = %failure.job_key, "job write failed: {}", failure.message);
                    summary.failures.push(failure);
                }
                Err(e) => {
                    warn!("job write task panicked: {e}");
                    summary.failures.push(WriteFailure {
                        job_key: String::new(),
                        message: e.to_string(),
                    });
                }
            }
        }
        summary
    }
}

async fn execute_with_retry(
    store: &JobStore,
    tenant: &TenantId,
    write: &JobWrite,
    reset_saved: bool,
) -> Result<WriteOutcome, StoreError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match execute_once(store, tenant, write, reset_saved).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_transient() && attempt < WRITE_MAX_ATTEMPTS => {
                let delay = Duration::from_millis(
                    WRITE_BACKOFF_BASE_MS * 2u64.saturating_pow(attempt - 1),
                );
                warn!(attempt, "transient storage error, retrying in {delay:?}: {e}");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn execute_once(
    store: &JobStore,
    tenant: &TenantId,
    write: &JobWrite,
    reset_saved: bool,
) -> Result<WriteOutcome, StoreError> {
    let now = chrono::Utc::now();
    match write {
        JobWrite::Create(job) => {
            if store.try_create_job(tenant, job, now).await? {
                Ok(WriteOutcome::Added)
            } else {
                // Lost the create race to a concurrent run; merge instead.
                store.merge_job(tenant, job, now, reset_saved).await?;
                Ok(WriteOutcome::Updated)
            }
        }
        JobWrite::Merge(job) => {
            store.merge_job(tenant, job, now, reset_saved).await?;
            Ok(WriteOutcome::Updated)
        }
    }
}
