//! Sentinel assembly: wires the store, queue, ledger, worker, and loops.

use crate::dispatcher::Dispatcher;
use crate::http;
use crate::scheduler::Scheduler;
use anyhow::{Context, Result};
use boardwatch_db::{DispatchQueue, JobStore, RunLedger, StoreError};
use boardwatch_protocol::defaults::{
    DEFAULT_DISPATCH_CONCURRENCY, DEFAULT_DISPATCH_LEASE_SECS, DEFAULT_DISPATCH_MAX_ATTEMPTS,
    DEFAULT_DISPATCH_RETRY_BACKOFF_SECS, DEFAULT_ENQUEUE_CONCURRENCY, DEFAULT_GC_INTERVAL_SECS,
    DEFAULT_SCHEDULE_INTERVAL_SECS,
};
use boardwatch_protocol::{RunDescriptor, RunId, RunType, TenantId};
use boardwatch_worker::{CancellationToken, TenantWorker, WorkerConfig};
use sqlx::{Pool, Sqlite};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub dispatch_concurrency: usize,
    pub dispatch_lease: chrono::Duration,
    pub dispatch_max_attempts: i64,
    pub dispatch_retry_backoff: chrono::Duration,
    pub enqueue_concurrency: usize,
    pub schedule_interval: Duration,
    pub gc_interval: Duration,
    /// How often the dispatcher polls an empty queue.
    pub poll_interval: Duration,
    pub admin_bind: Option<SocketAddr>,
    pub worker: WorkerConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            dispatch_concurrency: DEFAULT_DISPATCH_CONCURRENCY,
            dispatch_lease: chrono::Duration::seconds(DEFAULT_DISPATCH_LEASE_SECS),
            dispatch_max_attempts: DEFAULT_DISPATCH_MAX_ATTEMPTS,
            dispatch_retry_backoff: chrono::Duration::seconds(DEFAULT_DISPATCH_RETRY_BACKOFF_SECS),
            enqueue_concurrency: DEFAULT_ENQUEUE_CONCURRENCY,
            schedule_interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
            gc_interval: Duration::from_secs(DEFAULT_GC_INTERVAL_SECS),
            poll_interval: Duration::from_millis(500),
            admin_bind: None,
            worker: WorkerConfig::default(),
        }
    }
}

/// Mint a run, record it as enqueued, and hand it to the queue. A queue
/// submit failure lands in the ledger as `enqueue_failed`; the next
/// scheduler tick will try the tenant again.
pub async fn enqueue_run(
    ledger: &RunLedger,
    queue: &DispatchQueue,
    tenant: &TenantId,
    run_type: RunType,
    max_attempts: i64,
) -> Result<RunDescriptor, StoreError> {
    let descriptor = RunDescriptor {
        tenant_id: tenant.clone(),
        run_id: RunId::new(),
        run_type,
    };
    ledger.create_enqueued(&descriptor).await?;
    if let Err(e) = queue.enqueue(&descriptor, max_attempts).await {
        warn!(tenant = %tenant, run = %descriptor.run_id, "enqueue failed: {e}");
        ledger.mark_enqueue_failed(&descriptor, &e.to_string()).await?;
        return Err(e);
    }
    Ok(descriptor)
}

pub struct Sentinel {
    store: JobStore,
    ledger: RunLedger,
    queue: DispatchQueue,
    worker: Arc<TenantWorker>,
    config: SentinelConfig,
}

impl Sentinel {
    pub fn new(
        pool: Pool<Sqlite>,
        fetcher: Arc<dyn boardwatch_feeds::FeedFetch>,
        config: SentinelConfig,
    ) -> Self {
        let store = JobStore::new(pool.clone());
        let ledger = RunLedger::new(pool.clone());
        let queue = DispatchQueue::new(pool);
        let worker = Arc::new(TenantWorker::new(
            store.clone(),
            ledger.clone(),
            fetcher,
            config.worker.clone(),
        ));
        Self {
            store,
            ledger,
            queue,
            worker,
            config,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn worker(&self) -> Arc<TenantWorker> {
        Arc::clone(&self.worker)
    }

    /// Run scheduler, dispatcher, and the admin surface until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let scheduler = Scheduler::new(
            self.store.clone(),
            self.ledger.clone(),
            self.queue.clone(),
            self.config.clone(),
        );
        let dispatcher = Dispatcher::new(
            self.queue.clone(),
            self.ledger.clone(),
            self.worker(),
            self.config.clone(),
        );

        let admin = match self.config.admin_bind {
            Some(addr) => {
                let state = http::AppState {
                    store: self.store.clone(),
                    ledger: self.ledger.clone(),
                    queue: self.queue.clone(),
                    worker: self.worker(),
                    dispatch_max_attempts: self.config.dispatch_max_attempts,
                };
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("binding admin surface on {addr}"))?;
                info!("admin surface listening on {addr}");
                Some(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, http::router(state)).await {
                        warn!("admin surface exited: {e}");
                    }
                }))
            }
            None => None,
        };

        let scheduler_cancel = cancel.clone();
        let dispatcher_cancel = cancel.clone();
        let scheduler_task = tokio::spawn(async move { scheduler.run(scheduler_cancel).await });
        let dispatcher_task = tokio::spawn(async move { dispatcher.run(dispatcher_cancel).await });

        let (scheduler_result, dispatcher_result) =
            tokio::join!(scheduler_task, dispatcher_task);
        scheduler_result.context("scheduler task")?;
        dispatcher_result.context("dispatcher task")?;

        if let Some(admin) = admin {
            admin.abort();
        }
        info!("sentinel stopped");
        Ok(())
    }
}
