//! Per-tenant run orchestration.

use crate::cancel::CancellationToken;
use crate::counters::RunCounters;
use crate::gc;
use crate::heartbeat::Heartbeat;
use crate::upsert::plan_upserts;
use anyhow::{Context, Result};
use boardwatch_db::{BulkWriter, FeedRecord, JobStore, NewJob, RunLedger};
use boardwatch_feeds::source::{company_key, display_name_from_slug};
use boardwatch_feeds::{
    extract_postings, filter, normalize, FeedFetch, FilterOutcome, Source, UniformPosting,
};
use boardwatch_protocol::defaults::{
    COMPANY_RETENTION_DAYS, DEFAULT_FEED_CONCURRENCY, DEFAULT_INGEST_WINDOW_MINUTES,
    DEFAULT_JOB_WRITE_CONCURRENCY, DEFAULT_WORKER_DEADLINE_SECS, HEARTBEAT_INTERVAL_SECS,
    JOB_RETENTION_DAYS, RUN_RETENTION_DAYS,
};
use boardwatch_protocol::{ErrorSampleBuffer, RunDescriptor, RunStatus, RunType, TenantId};
use chrono::Utc;
use futures::StreamExt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

/// Worker configuration (plain data).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postings older than this are skipped as too old.
    pub ingest_window: chrono::Duration,
    pub feed_concurrency: usize,
    pub write_concurrency: usize,
    /// Overall per-run deadline.
    pub deadline: Duration,
    pub heartbeat_interval: Duration,
    /// When set, a concurrent live run makes this one `skipped_lock_active`.
    pub run_lock_enabled: bool,
    /// How recent a concurrent run's heartbeat must be to count as live.
    pub run_lock_lease: chrono::Duration,
    /// Operator opt-in: refreshes reset the UI-owned `saved` bookmark.
    pub reset_saved_on_ingest: bool,
    pub job_retention: chrono::Duration,
    pub run_retention: chrono::Duration,
    pub company_retention: chrono::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ingest_window: chrono::Duration::minutes(DEFAULT_INGEST_WINDOW_MINUTES),
            feed_concurrency: DEFAULT_FEED_CONCURRENCY,
            write_concurrency: DEFAULT_JOB_WRITE_CONCURRENCY,
            deadline: Duration::from_secs(DEFAULT_WORKER_DEADLINE_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            run_lock_enabled: false,
            run_lock_lease: chrono::Duration::seconds(60),
            reset_saved_on_ingest: false,
            job_retention: chrono::Duration::days(JOB_RETENTION_DAYS),
            run_retention: chrono::Duration::days(RUN_RETENTION_DAYS),
            company_retention: chrono::Duration::days(COMPANY_RETENTION_DAYS),
        }
    }
}

/// Executes one run descriptor end to end.
pub struct TenantWorker {
    store: JobStore,
    ledger: RunLedger,
    fetcher: Arc<dyn FeedFetch>,
    config: WorkerConfig,
}

impl TenantWorker {
    pub fn new(
        store: JobStore,
        ledger: RunLedger,
        fetcher: Arc<dyn FeedFetch>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            fetcher,
            config,
        }
    }

    /// Process one delivery. Never leaves the ledger without a terminal
    /// status: internal failures are persisted as `failed` rather than
    /// thrown, so a no-retry dispatcher can rely on a clean return.
    pub async fn execute(&self, descriptor: &RunDescriptor) -> Result<RunStatus> {
        match self.execute_inner(descriptor).await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!(
                    tenant = %descriptor.tenant_id,
                    run = %descriptor.run_id,
                    "run failed fatally: {e:#}"
                );
                let snapshot = boardwatch_protocol::CounterSnapshot::default();
                self.ledger
                    .finish(
                        &descriptor.tenant_id,
                        descriptor.run_id.as_str(),
                        RunStatus::Failed,
                        &snapshot,
                        0,
                        Some(&format!("{e:#}")),
                        &[],
                    )
                    .await
                    .context("persisting fatal run status")?;
                Ok(RunStatus::Failed)
            }
        }
    }

    async fn execute_inner(&self, descriptor: &RunDescriptor) -> Result<RunStatus> {
        let tenant = &descriptor.tenant_id;
        let run_id = descriptor.run_id.as_str();

        // At-least-once delivery: a terminal run means this is a redelivery.
        match self.ledger.get_run(tenant, run_id).await? {
            Some(run) if run.status.is_terminal() => {
                info!(tenant = %tenant, run_id, status = %run.status, "run already terminal, no-op");
                return Ok(run.status);
            }
            Some(_) => {}
            None => {
                // Direct invocation path (inline admin run): mint the row.
                self.ledger.create_enqueued(descriptor).await?;
            }
        }

        if self.config.run_lock_enabled
            && self
                .ledger
                .has_active_run(tenant, run_id, self.config.run_lock_lease)
                .await?
        {
            let reason = format!(
                "another run for tenant {tenant} is active within its {}s lease",
                self.config.run_lock_lease.num_seconds()
            );
            self.ledger.mark_skipped_lock(tenant, run_id, &reason).await?;
            return Ok(RunStatus::SkippedLockActive);
        }

        match descriptor.run_type {
            RunType::Gc => gc::run_gc(&self.store, &self.ledger, descriptor, &self.config).await,
            RunType::Scheduled | RunType::Manual => self.run_ingest(descriptor).await,
        }
    }

    async fn run_ingest(&self, descriptor: &RunDescriptor) -> Result<RunStatus> {
        let tenant = &descriptor.tenant_id;
        let run_id = descriptor.run_id.as_str();
        let started = Instant::now();

        let feeds = self.store.active_feeds(tenant).await?;
        if !self
            .ledger
            .begin_running(tenant, run_id, feeds.len() as u64)
            .await?
        {
            // Lost a race with another delivery that just finished it.
            let status = self
                .ledger
                .get_run(tenant, run_id)
                .await?
                .map(|run| run.status)
                .unwrap_or(RunStatus::Failed);
            return Ok(status);
        }
        info!(tenant = %tenant, run_id, feeds = feeds.len(), "run started");

        let counters = Arc::new(RunCounters::new(feeds.len() as u64));
        let samples = Arc::new(StdMutex::new(ErrorSampleBuffer::default()));
        let cancel = CancellationToken::new();
        let writer_slot = AsyncMutex::new(Some(BulkWriter::new(
            self.store.clone(),
            tenant.clone(),
            self.config.write_concurrency,
            self.config.reset_saved_on_ingest,
        )));

        let heartbeat = Heartbeat::start(
            self.ledger.clone(),
            tenant.clone(),
            run_id.to_string(),
            Arc::clone(&counters),
            self.config.heartbeat_interval,
        );

        let outcome = tokio::time::timeout(
            self.config.deadline,
            self.process_feeds(tenant, feeds, &counters, &samples, &writer_slot, &cancel),
        )
        .await;

        // Deadline or not: no new feeds start past this point.
        cancel.cancel();
        drop(heartbeat);

        // Close barrier: every submitted write commits or fails before the
        // terminal status goes out, so counters reflect actual commits.
        let writer = writer_slot.lock().await.take();
        if let Some(writer) = writer {
            let summary = writer.close().await;
            counters.record_writes(
                summary.added,
                summary.updated,
                summary.failures.len() as u64,
            );
            if !summary.failures.is_empty() {
                let mut samples = samples.lock().unwrap_or_else(|p| p.into_inner());
                for failure in &summary.failures {
                    samples.push(failure.job_key.clone(), failure.message.clone());
                }
            }
        }

        let (status, run_error) = match outcome {
            Ok(()) if counters.errors() > 0 => (RunStatus::DoneWithErrors, None),
            Ok(()) => (RunStatus::Done, None),
            Err(_) => (
                RunStatus::Failed,
                Some(format!(
                    "worker deadline of {}s exceeded",
                    self.config.deadline.as_secs()
                )),
            ),
        };

        let snapshot = counters.snapshot();
        let sample_list = {
            let samples = samples.lock().unwrap_or_else(|p| p.into_inner());
            samples.as_slice()
        };
        self.ledger
            .finish(
                tenant,
                run_id,
                status,
                &snapshot,
                started.elapsed().as_millis() as i64,
                run_error.as_deref(),
                &sample_list,
            )
            .await?;
        info!(
            tenant = %tenant,
            run_id,
            status = %status,
            duration_ms = started.elapsed().as_millis() as u64,
            found = snapshot.found,
            added = snapshot.added,
            updated = snapshot.updated,
            errors = snapshot.errors_count,
            "run finished"
        );
        Ok(status)
    }

    async fn process_feeds(
        &self,
        tenant: &TenantId,
        feeds: Vec<FeedRecord>,
        counters: &Arc<RunCounters>,
        samples: &Arc<StdMutex<ErrorSampleBuffer>>,
        writer_slot: &AsyncMutex<Option<BulkWriter>>,
        cancel: &CancellationToken,
    ) {
        futures::stream::iter(feeds)
            .for_each_concurrent(Some(self.config.feed_concurrency.max(1)), |feed| async move {
                if cancel.is_cancelled() {
                    return;
                }
                self.process_feed(tenant, feed, counters, samples, writer_slot)
                    .await;
            })
            .await;
    }

    /// One feed, start to finish. Errors are recovered locally: counted,
    /// sampled, recorded on the feed row. The run always continues.
    async fn process_feed(
        &self,
        tenant: &TenantId,
        feed: FeedRecord,
        counters: &Arc<RunCounters>,
        samples: &Arc<StdMutex<ErrorSampleBuffer>>,
        writer_slot: &AsyncMutex<Option<BulkWriter>>,
    ) {
        let declared = feed
            .source
            .as_deref()
            .and_then(|s| s.parse::<Source>().ok())
            .filter(|s| *s != Source::Unknown);
        let source = declared.unwrap_or_else(|| Source::detect(&feed.url));
        if source == Source::Unknown {
            self.record_feed_failure(tenant, &feed, counters, samples, "unrecognized feed source")
                .await;
            return;
        }

        let payload = match self.fetcher.fetch_json(&feed.url).await {
            Ok(payload) => payload,
            Err(e) => {
                self.record_feed_failure(tenant, &feed, counters, samples, &e.to_string())
                    .await;
                return;
            }
        };

        let postings = extract_postings(source, &payload);
        let company_key = company_key(&feed.url, &feed.feed_id);
        let now = Utc::now();

        let mut batch = Vec::new();
        for posting in &postings {
            match filter::evaluate(posting, now, self.config.ingest_window) {
                FilterOutcome::NoTimestamp => {
                    counters.add_found(1);
                    counters.add_no_timestamp(1);
                }
                FilterOutcome::TooOld => {
                    counters.add_found(1);
                    counters.add_skipped_old(1);
                }
                FilterOutcome::WrongLocation => {}
                FilterOutcome::Keep { state_codes } => {
                    counters.add_found(1);
                    if let Some(job) = build_job(posting, state_codes, &company_key, source) {
                        counters.add_candidates(1);
                        batch.push(job);
                    }
                }
            }
        }

        match plan_upserts(&self.store, tenant, batch).await {
            Ok(plan) => {
                counters.add_skipped_unchanged(plan.skipped_unchanged);
                let mut guard = writer_slot.lock().await;
                if let Some(writer) = guard.as_mut() {
                    for write in plan.writes {
                        writer.submit(write);
                    }
                }
            }
            Err(e) => {
                self.record_feed_failure(tenant, &feed, counters, samples, &e.to_string())
                    .await;
                return;
            }
        }

        let display_name = if feed.company.is_empty() {
            display_name_from_slug(&company_key)
        } else {
            feed.company.clone()
        };
        if let Err(e) = self
            .store
            .upsert_company(tenant, &company_key, &display_name, &feed.url, source.as_str(), now)
            .await
        {
            self.record_feed_failure(tenant, &feed, counters, samples, &e.to_string())
                .await;
            return;
        }

        if let Err(e) = self.store.record_feed_success(tenant, &feed.feed_id, now).await {
            warn!(tenant = %tenant, feed = %feed.feed_id, "feed bookkeeping failed: {e}");
        }
    }

    async fn record_feed_failure(
        &self,
        tenant: &TenantId,
        feed: &FeedRecord,
        counters: &Arc<RunCounters>,
        samples: &Arc<StdMutex<ErrorSampleBuffer>>,
        message: &str,
    ) {
        warn!(tenant = %tenant, feed = %feed.feed_id, url = %feed.url, "feed failed: {message}");
        counters.incr_errors();
        {
            let mut samples = samples.lock().unwrap_or_else(|p| p.into_inner());
            samples.push(feed.url.clone(), message.to_string());
        }
        if let Err(e) = self.store.record_feed_error(tenant, &feed.feed_id, message).await {
            warn!(tenant = %tenant, feed = %feed.feed_id, "recording feed error failed: {e}");
        }
    }
}

fn build_job(
    posting: &UniformPosting,
    state_codes: Vec<String>,
    company_key: &str,
    source: Source,
) -> Option<NewJob> {
    let effective = filter::effective_timestamp(posting)?;
    let (metadata, metadata_kv) = normalize::normalize_metadata(&posting.metadata);
    let content_html = posting
        .content_html
        .as_deref()
        .map(normalize::clean_content)
        .unwrap_or_default();

    Some(NewJob {
        job_key: format!("{company_key}__{}", posting.upstream_id),
        company_key: company_key.to_string(),
        upstream_id: posting.upstream_id.clone(),
        title: posting.title.clone(),
        url: posting.canonical_url.clone(),
        apply_url: posting.apply_url.clone(),
        location: posting.location_name.clone(),
        state_codes_json: serde_json::to_string(&state_codes)
            .unwrap_or_else(|_| "[]".to_string()),
        is_remote: posting.is_remote.unwrap_or(false),
        source: source.as_str().to_string(),
        metadata_json: serde_json::to_string(&metadata).unwrap_or_else(|_| "[]".to_string()),
        metadata_kv_json: serde_json::to_string(&metadata_kv)
            .unwrap_or_else(|_| "{}".to_string()),
        content_html,
        source_updated_iso: effective.to_rfc3339(),
        source_updated_ts: effective,
        source_updated_ms: effective.timestamp_millis(),
    })
}
