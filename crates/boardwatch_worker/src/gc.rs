//! Garbage collection runs: trim stale jobs, old run records, and
//! companies nobody has seen lately. Same run state machine as ingestion.

use crate::worker::WorkerConfig;
use anyhow::Result;
use boardwatch_db::{JobStore, RunLedger};
use boardwatch_protocol::defaults::{GC_DELETE_BATCH, GC_LOOP_CAP};
use boardwatch_protocol::{CounterSnapshot, ErrorSampleBuffer, RunDescriptor, RunStatus};
use chrono::Utc;
use std::time::Instant;
use tracing::info;

pub(crate) async fn run_gc(
    store: &JobStore,
    ledger: &RunLedger,
    descriptor: &RunDescriptor,
    config: &WorkerConfig,
) -> Result<RunStatus> {
    let tenant = &descriptor.tenant_id;
    let run_id = descriptor.run_id.as_str();
    let started = Instant::now();

    if !ledger.begin_running(tenant, run_id, 0).await? {
        let status = ledger
            .get_run(tenant, run_id)
            .await?
            .map(|run| run.status)
            .unwrap_or(RunStatus::Failed);
        return Ok(status);
    }

    let now = Utc::now();
    let mut errors = 0u64;
    let mut samples = ErrorSampleBuffer::default();

    match store
        .delete_stale_jobs(tenant, now - config.job_retention, GC_DELETE_BATCH, GC_LOOP_CAP)
        .await
    {
        Ok(deleted) => info!(tenant = %tenant, deleted, "gc: stale jobs removed"),
        Err(e) => {
            errors += 1;
            samples.push("jobs", e.to_string());
        }
    }

    match store
        .delete_old_runs(tenant, now - config.run_retention, GC_DELETE_BATCH, GC_LOOP_CAP)
        .await
    {
        Ok(deleted) => info!(tenant = %tenant, deleted, "gc: old runs removed"),
        Err(e) => {
            errors += 1;
            samples.push("fetch_runs", e.to_string());
        }
    }

    match store
        .delete_stale_companies(
            tenant,
            now - config.company_retention,
            GC_DELETE_BATCH,
            GC_LOOP_CAP,
        )
        .await
    {
        Ok(deleted) => info!(tenant = %tenant, deleted, "gc: stale companies removed"),
        Err(e) => {
            errors += 1;
            samples.push("companies", e.to_string());
        }
    }

    let counters = CounterSnapshot {
        errors_count: errors,
        ..Default::default()
    };
    let status = if errors > 0 {
        RunStatus::DoneWithErrors
    } else {
        RunStatus::Done
    };
    ledger
        .finish(
            tenant,
            run_id,
            status,
            &counters,
            started.elapsed().as_millis() as i64,
            None,
            &samples.as_slice(),
        )
        .await?;
    Ok(status)
}
