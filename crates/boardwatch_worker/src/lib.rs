//! Per-tenant ingestion worker.
//!
//! One [`worker::TenantWorker`] invocation processes exactly one run
//! descriptor: it advances the run ledger, fans out feed fetches under
//! bounded concurrency, routes postings through the adapter/filter/
//! normalizer pipeline, drives the upsert engine, and writes the terminal
//! status after the bulk writer has flushed. GC runs share the same state
//! machine.

pub mod cancel;
pub mod counters;
pub mod gc;
pub mod heartbeat;
pub mod upsert;
pub mod worker;

pub use cancel::CancellationToken;
pub use counters::RunCounters;
pub use worker::{TenantWorker, WorkerConfig};
