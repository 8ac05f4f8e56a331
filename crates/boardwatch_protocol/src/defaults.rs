//! Canonical default values shared across the ingestion plane.

/// Default SQLite database path for the CLI.
pub const DEFAULT_DB_PATH: &str = "boardwatch.db";

/// Default bind address for the admin HTTP surface.
pub const DEFAULT_ADMIN_BIND_ADDR: &str = "127.0.0.1:7310";

/// Rolling ingestion window: postings older than this are skipped.
pub const DEFAULT_INGEST_WINDOW_MINUTES: i64 = 60;

/// Concurrent feed fetches per worker run.
pub const DEFAULT_FEED_CONCURRENCY: usize = 6;

/// Concurrent job writes through the bulk writer.
pub const DEFAULT_JOB_WRITE_CONCURRENCY: usize = 25;

/// Concurrent worker dispatches per queue.
pub const DEFAULT_DISPATCH_CONCURRENCY: usize = 10;

/// Concurrent enqueues on a scheduler tick.
pub const DEFAULT_ENQUEUE_CONCURRENCY: usize = 50;

/// Overall worker deadline per run.
pub const DEFAULT_WORKER_DEADLINE_SECS: u64 = 540;

/// Queue visibility timeout. Must cover the worker deadline.
pub const DEFAULT_DISPATCH_LEASE_SECS: i64 = 600;

/// Delivery attempts before a queued run is marked failed.
pub const DEFAULT_DISPATCH_MAX_ATTEMPTS: i64 = 3;

/// Minimum backoff before an expired delivery is retried.
pub const DEFAULT_DISPATCH_RETRY_BACKOFF_SECS: i64 = 60;

/// Scheduler cadence for `scheduled` runs.
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 30 * 60;

/// Scheduler cadence for `gc` runs.
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 2 * 24 * 60 * 60;

/// Heartbeat period while a run is `running`.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Ring capacity for per-run error samples.
pub const ERROR_SAMPLE_CAPACITY: usize = 8;

/// Reference chunk size for the batched multi-get of existing jobs.
pub const MULTI_GET_CHUNK: usize = 450;

/// Row cap per GC delete query.
pub const GC_DELETE_BATCH: i64 = 400;

/// Iteration cap per GC delete loop.
pub const GC_LOOP_CAP: usize = 50;

/// Job retention by upstream freshness.
pub const JOB_RETENTION_DAYS: i64 = 14;

/// Run-ledger retention.
pub const RUN_RETENTION_DAYS: i64 = 14;

/// Company retention by last-seen.
pub const COMPANY_RETENTION_DAYS: i64 = 30;

/// Per-request fetch timeout.
pub const FETCH_TIMEOUT_SECS: u64 = 75;

/// Retries after the first fetch attempt.
pub const FETCH_MAX_RETRIES: u32 = 3;

/// Fetch retry backoff: `base * 2^attempt + jitter`.
pub const FETCH_BACKOFF_BASE_MS: u64 = 500;

/// Upper bound on fetch retry jitter.
pub const FETCH_BACKOFF_JITTER_MS: u64 = 250;

/// Character ceiling on stored job body HTML.
pub const CONTENT_MAX_CHARS: usize = 120_000;
