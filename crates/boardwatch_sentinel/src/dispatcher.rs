//! Dispatcher: claims queued runs and executes them under a concurrency
//! cap, with lease-based redelivery for crashed or wedged deliveries.

use crate::sentinel::SentinelConfig;
use boardwatch_db::{DispatchQueue, QueuedRun, RunLedger};
use boardwatch_protocol::{CounterSnapshot, RunStatus};
use boardwatch_worker::{CancellationToken, TenantWorker};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct Dispatcher {
    queue: DispatchQueue,
    ledger: RunLedger,
    worker: Arc<TenantWorker>,
    semaphore: Arc<Semaphore>,
    config: SentinelConfig,
}

impl Dispatcher {
    pub fn new(
        queue: DispatchQueue,
        ledger: RunLedger,
        worker: Arc<TenantWorker>,
        config: SentinelConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.dispatch_concurrency.max(1)));
        Self {
            queue,
            ledger,
            worker,
            semaphore,
            config,
        }
    }

    /// Main loop. Exits once cancelled and every in-flight delivery has
    /// finished.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut deliveries: JoinSet<()> = JoinSet::new();
        info!("dispatcher started");

        while !cancel.is_cancelled() {
            while deliveries.try_join_next().is_some() {}

            self.reap_expired_leases().await;

            let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            match self.queue.claim(self.config.dispatch_lease).await {
                Ok(Some(claimed)) => {
                    let queue = self.queue.clone();
                    let worker = Arc::clone(&self.worker);
                    let retry_backoff = self.config.dispatch_retry_backoff;
                    deliveries.spawn(async move {
                        let _permit = permit;
                        deliver(&queue, &worker, claimed, retry_backoff).await;
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(e) => {
                    drop(permit);
                    warn!("queue claim failed: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        while deliveries.join_next().await.is_some() {}
        info!("dispatcher drained");
    }

    /// Claim and execute everything currently available, inline. Test and
    /// CLI entry point; the serve loop uses [`Dispatcher::run`].
    pub async fn drain_once(&self) -> usize {
        self.reap_expired_leases().await;
        let mut processed = 0;
        loop {
            match self.queue.claim(self.config.dispatch_lease).await {
                Ok(Some(claimed)) => {
                    deliver(
                        &self.queue,
                        &self.worker,
                        claimed,
                        self.config.dispatch_retry_backoff,
                    )
                    .await;
                    processed += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("queue claim failed: {e}");
                    break;
                }
            }
        }
        processed
    }

    /// Requeue expired deliveries; runs out of attempts are marked failed
    /// in the ledger so every run still reaches a terminal status.
    async fn reap_expired_leases(&self) {
        match self
            .queue
            .release_expired(self.config.dispatch_retry_backoff)
            .await
        {
            Ok(exhausted) => {
                for run in exhausted {
                    let Ok(descriptor) = run.descriptor() else {
                        warn!(run = %run.run_id, "exhausted run has unparseable ids");
                        continue;
                    };
                    let result = self
                        .ledger
                        .finish(
                            &descriptor.tenant_id,
                            descriptor.run_id.as_str(),
                            RunStatus::Failed,
                            &CounterSnapshot::default(),
                            0,
                            Some("delivery attempts exhausted"),
                            &[],
                        )
                        .await;
                    if let Err(e) = result {
                        warn!(run = %run.run_id, "marking exhausted run failed: {e}");
                    }
                }
            }
            Err(e) => warn!("lease reaper failed: {e}"),
        }
    }
}

async fn deliver(
    queue: &DispatchQueue,
    worker: &TenantWorker,
    claimed: QueuedRun,
    retry_backoff: chrono::Duration,
) {
    let delivery_id = claimed.id;
    let descriptor = match claimed.descriptor() {
        Ok(descriptor) => descriptor,
        Err(e) => {
            warn!(run = %claimed.run_id, "dropping undeliverable message: {e}");
            let _ = queue.fail(delivery_id, &e.to_string()).await;
            return;
        }
    };

    match worker.execute(&descriptor).await {
        Ok(status) => {
            info!(
                tenant = %descriptor.tenant_id,
                run = %descriptor.run_id,
                status = %status,
                "delivery complete"
            );
            if let Err(e) = queue.complete(delivery_id).await {
                warn!(run = %descriptor.run_id, "marking delivery done failed: {e}");
            }
        }
        Err(e) => {
            // The worker could not even persist a terminal status. Give the
            // message back to the queue within its attempt budget.
            warn!(
                tenant = %descriptor.tenant_id,
                run = %descriptor.run_id,
                "delivery failed: {e:#}"
            );
            match queue
                .release(delivery_id, retry_backoff, &format!("{e:#}"))
                .await
            {
                Ok(true) => {}
                Ok(false) => info!(run = %descriptor.run_id, "delivery attempts exhausted"),
                Err(e) => warn!(run = %descriptor.run_id, "releasing delivery failed: {e}"),
            }
        }
    }
}
