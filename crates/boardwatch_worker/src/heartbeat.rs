//! Run heartbeat: periodic merge of in-progress counters into the ledger.

use crate::counters::RunCounters;
use boardwatch_db::RunLedger;
use boardwatch_protocol::TenantId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle for the heartbeat task. Dropping it stops the heartbeat, which
/// is what guarantees it stops on every exit path of the worker.
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn start(
        ledger: RunLedger,
        tenant: TenantId,
        run_id: String,
        counters: Arc<RunCounters>,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The immediate first tick would duplicate begin_running's write.
            interval.tick().await;
            loop {
                interval.tick().await;
                let snapshot = counters.snapshot();
                if let Err(e) = ledger.heartbeat(&tenant, &run_id, &snapshot).await {
                    warn!(tenant = %tenant, run_id = %run_id, "heartbeat write failed: {e}");
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
