//! Scheduler: periodic fan-out of runs across tenants.
//!
//! One `scheduled` run per tenant per tick, with bounded enqueue
//! concurrency; a slower cadence enqueues `gc` runs. A tenant that still
//! has an undelivered run buffered is skipped, so the queue holds at most
//! one pending run per tenant. Per-tenant enqueue failures are recorded
//! in that tenant's ledger and never block the rest.

use crate::sentinel::{enqueue_run, SentinelConfig};
use boardwatch_db::{DispatchQueue, JobStore, RunLedger};
use boardwatch_protocol::RunType;
use boardwatch_worker::CancellationToken;
use futures::StreamExt;
use tracing::{info, warn};

pub struct Scheduler {
    store: JobStore,
    ledger: RunLedger,
    queue: DispatchQueue,
    config: SentinelConfig,
}

impl Scheduler {
    pub fn new(
        store: JobStore,
        ledger: RunLedger,
        queue: DispatchQueue,
        config: SentinelConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            queue,
            config,
        }
    }

    /// Tick until cancelled. The first scheduled tick fires immediately so
    /// a fresh deployment ingests without waiting half an hour.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut scheduled = tokio::time::interval(self.config.schedule_interval);
        let mut gc = tokio::time::interval(self.config.gc_interval);
        gc.tick().await; // swallow the immediate gc tick
        info!("scheduler started");

        loop {
            tokio::select! {
                _ = scheduled.tick() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let enqueued = self.tick(RunType::Scheduled).await;
                    info!(enqueued, "scheduled tick complete");
                }
                _ = gc.tick() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let enqueued = self.tick(RunType::Gc).await;
                    info!(enqueued, "gc tick complete");
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Enqueue one run of `run_type` for every tenant. Returns how many
    /// actually entered the queue.
    pub async fn tick(&self, run_type: RunType) -> usize {
        let tenants = match self.store.list_tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!("tenant enumeration failed: {e}");
                return 0;
            }
        };

        let enqueued = futures::stream::iter(tenants)
            .map(|tenant| async move {
                if run_type == RunType::Scheduled {
                    match self.queue.has_queued(tenant.as_str()).await {
                        Ok(true) => {
                            info!(tenant = %tenant, "run already buffered, skipping");
                            return 0usize;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!(tenant = %tenant, "queue lookup failed: {e}");
                            return 0;
                        }
                    }
                }
                match enqueue_run(
                    &self.ledger,
                    &self.queue,
                    &tenant,
                    run_type,
                    self.config.dispatch_max_attempts,
                )
                .await
                {
                    Ok(_) => 1,
                    Err(e) => {
                        warn!(tenant = %tenant, "enqueue failed: {e}");
                        0
                    }
                }
            })
            .buffer_unordered(self.config.enqueue_concurrency.max(1))
            .fold(0usize, |acc, n| async move { acc + n })
            .await;
        enqueued
    }
}
