//! End-to-end worker tests: wiremock upstreams against an in-memory store.

use async_trait::async_trait;
use boardwatch_db::{open_in_memory, JobStore, RunLedger};
use boardwatch_feeds::{source, FeedError, FeedFetch, HttpFeedClient, RetryPolicy};
use boardwatch_protocol::{RunDescriptor, RunId, RunStatus, RunType, TenantId};
use boardwatch_worker::{TenantWorker, WorkerConfig};
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    store: JobStore,
    ledger: RunLedger,
    tenant: TenantId,
}

async fn harness() -> Harness {
    let pool = open_in_memory().await.unwrap();
    let store = JobStore::new(pool.clone());
    let ledger = RunLedger::new(pool);
    let tenant = TenantId::parse("tenant-1").unwrap();
    store.ensure_tenant(&tenant).await.unwrap();
    Harness {
        store,
        ledger,
        tenant,
    }
}

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        heartbeat_interval: std::time::Duration::from_millis(50),
        ..WorkerConfig::default()
    }
}

fn fast_client() -> Arc<HttpFeedClient> {
    Arc::new(
        HttpFeedClient::with_policy(RetryPolicy {
            max_retries: 3,
            backoff_base: std::time::Duration::from_millis(5),
            jitter: std::time::Duration::from_millis(1),
        })
        .unwrap(),
    )
}

fn worker(h: &Harness, fetcher: Arc<dyn FeedFetch>, config: WorkerConfig) -> TenantWorker {
    TenantWorker::new(h.store.clone(), h.ledger.clone(), fetcher, config)
}

fn descriptor(h: &Harness, run_type: RunType) -> RunDescriptor {
    RunDescriptor {
        tenant_id: h.tenant.clone(),
        run_id: RunId::new(),
        run_type,
    }
}

fn greenhouse_payload(jobs: &[(u64, &str, chrono::DateTime<Utc>)]) -> serde_json::Value {
    let jobs: Vec<serde_json::Value> = jobs
        .iter()
        .map(|(id, title, updated)| {
            json!({
                "id": id,
                "title": title,
                "absolute_url": format!("https://boards.greenhouse.io/acme/jobs/{id}"),
                "updated_at": updated.to_rfc3339(),
                "location": {"name": "New York, NY"},
                "content": "<p>Role</p>"
            })
        })
        .collect();
    json!({"name": "Acme", "jobs": jobs})
}

async fn mount_feed(server: &MockServer, feed_path: &str, payload: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(feed_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload))
        .mount(server)
        .await;
}

async fn seed_greenhouse_feed(h: &Harness, server: &MockServer) -> String {
    let url = format!("{}/v1/boards/acme/jobs", server.uri());
    h.store
        .upsert_feed(&h.tenant, "f1", "Acme", &url, Some("greenhouse"))
        .await
        .unwrap();
    url
}

// ---------------------------------------------------------------------------
// Seed scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_greenhouse_feed_all_new() {
    let h = harness().await;
    let server = MockServer::start().await;
    let now = Utc::now();
    mount_feed(
        &server,
        "/v1/boards/acme/jobs",
        greenhouse_payload(&[
            (1, "Engineer", now - Duration::minutes(10)),
            (2, "Designer", now - Duration::minutes(30)),
        ]),
    )
    .await;
    let url = seed_greenhouse_feed(&h, &server).await;

    let desc = descriptor(&h, RunType::Scheduled);
    let status = worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Done);

    let run = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    let counters = run.counters();
    assert_eq!(counters.feeds_count, 1);
    assert_eq!(counters.found, 2);
    assert_eq!(counters.candidates, 2);
    assert_eq!(counters.added, 2);
    assert_eq!(counters.updated, 0);
    assert_eq!(counters.skipped_old, 0);
    assert_eq!(counters.errors_count, 0);
    assert_eq!(counters.writes, counters.added + counters.updated);

    // Feed bookkeeping and the company doc came along.
    let feeds = h.store.active_feeds(&h.tenant).await.unwrap();
    assert!(feeds[0].last_error.is_none());
    assert!(feeds[0].last_synced_at.is_some());
    let company_key = source::company_key(&url, "f1");
    assert!(h
        .store
        .get_company(&h.tenant, &company_key)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn out_of_window_posting_is_skipped_old() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "/v1/boards/acme/jobs",
        greenhouse_payload(&[(1, "Engineer", Utc::now() - Duration::minutes(90))]),
    )
    .await;
    seed_greenhouse_feed(&h, &server).await;

    let desc = descriptor(&h, RunType::Scheduled);
    let status = worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Done);

    let counters = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap()
        .counters();
    assert_eq!(counters.found, 1);
    assert_eq!(counters.candidates, 0);
    assert_eq!(counters.skipped_old, 1);
    assert_eq!(counters.added, 0);
    assert_eq!(counters.updated, 0);
    assert_eq!(h.store.count_jobs(&h.tenant).await.unwrap(), 0);
}

#[tokio::test]
async fn refresh_with_no_change_skips_unchanged() {
    let h = harness().await;
    let server = MockServer::start().await;
    let updated = Utc::now() - Duration::minutes(10);
    mount_feed(
        &server,
        "/v1/boards/acme/jobs",
        greenhouse_payload(&[(1, "Engineer", updated)]),
    )
    .await;
    let url = seed_greenhouse_feed(&h, &server).await;
    let w = worker(&h, fast_client(), fast_config());

    let first = descriptor(&h, RunType::Scheduled);
    w.execute(&first).await.unwrap();

    let second = descriptor(&h, RunType::Scheduled);
    w.execute(&second).await.unwrap();

    let counters = h
        .ledger
        .get_run(&h.tenant, second.run_id.as_str())
        .await
        .unwrap()
        .unwrap()
        .counters();
    assert_eq!(counters.candidates, 1);
    assert_eq!(counters.added, 0);
    assert_eq!(counters.updated, 0);
    assert_eq!(counters.skipped_unchanged, 1);

    // Idempotence: stored state identical to the first run's.
    let job_key = format!("{}__1", source::company_key(&url, "f1"));
    let job = h.store.get_job(&h.tenant, &job_key).await.unwrap().unwrap();
    assert_eq!(job.source_updated_ms, updated.timestamp_millis());
}

#[tokio::test]
async fn refresh_with_newer_timestamp_updates() {
    let h = harness().await;
    let server = MockServer::start().await;
    let updated = Utc::now() - Duration::minutes(10);
    mount_feed(
        &server,
        "/v1/boards/acme/jobs",
        greenhouse_payload(&[(1, "Engineer", updated)]),
    )
    .await;
    let url = seed_greenhouse_feed(&h, &server).await;
    let w = worker(&h, fast_client(), fast_config());
    w.execute(&descriptor(&h, RunType::Scheduled)).await.unwrap();

    // Upstream bumps the posting by a minute.
    server.reset().await;
    let newer = updated + Duration::minutes(1);
    mount_feed(
        &server,
        "/v1/boards/acme/jobs",
        greenhouse_payload(&[(1, "Engineer", newer)]),
    )
    .await;

    let second = descriptor(&h, RunType::Scheduled);
    w.execute(&second).await.unwrap();

    let counters = h
        .ledger
        .get_run(&h.tenant, second.run_id.as_str())
        .await
        .unwrap()
        .unwrap()
        .counters();
    assert_eq!(counters.added, 0);
    assert_eq!(counters.updated, 1);

    // Monotone freshness advanced.
    let job_key = format!("{}__1", source::company_key(&url, "f1"));
    let job = h.store.get_job(&h.tenant, &job_key).await.unwrap().unwrap();
    assert_eq!(job.source_updated_ms, newer.timestamp_millis());
}

#[tokio::test]
async fn ashby_non_us_remote_is_filtered_out() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_feed(
        &server,
        "/posting-api/job-board/acme",
        json!({
            "jobs": [{
                "id": "ash-1",
                "title": "Engineer",
                "location": "Remote - Germany",
                "isRemote": true,
                "publishedAt": (Utc::now() - Duration::minutes(5)).to_rfc3339(),
                "jobUrl": "https://jobs.ashbyhq.com/acme/ash-1"
            }]
        }),
    )
    .await;
    let url = format!("{}/posting-api/job-board/acme", server.uri());
    h.store
        .upsert_feed(&h.tenant, "f1", "Acme", &url, Some("ashby"))
        .await
        .unwrap();

    let desc = descriptor(&h, RunType::Scheduled);
    let status = worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Done);

    let counters = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap()
        .counters();
    assert_eq!(counters.found, 0);
    assert_eq!(counters.candidates, 0);
    assert_eq!(h.store.count_jobs(&h.tenant).await.unwrap(), 0);
}

#[tokio::test]
async fn upstream_503_recovers_with_retries() {
    let h = harness().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/boards/acme/jobs"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_feed(
        &server,
        "/v1/boards/acme/jobs",
        greenhouse_payload(&[(1, "Engineer", Utc::now() - Duration::minutes(10))]),
    )
    .await;
    seed_greenhouse_feed(&h, &server).await;

    let desc = descriptor(&h, RunType::Scheduled);
    let status = worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Done);

    let counters = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap()
        .counters();
    assert_eq!(counters.errors_count, 0);
    assert_eq!(counters.added, 1);
}

#[tokio::test]
async fn permanent_404_marks_feed_and_run() {
    let h = harness().await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    seed_greenhouse_feed(&h, &server).await;

    let desc = descriptor(&h, RunType::Scheduled);
    let status = worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::DoneWithErrors);

    let run = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.counters().errors_count, 1);
    let samples = run.error_sample_list();
    assert_eq!(samples.len(), 1);
    assert!(samples[0].message.contains("404"));

    let feeds = h.store.active_feeds(&h.tenant).await.unwrap();
    assert!(feeds[0].last_error.as_deref().unwrap().contains("404"));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Scripted fetcher that tracks how many fetches run at once.
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    delay: std::time::Duration,
}

#[async_trait]
impl FeedFetch for ConcurrencyProbe {
    async fn fetch_json(&self, _url: &str) -> Result<serde_json::Value, FeedError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({"jobs": []}))
    }
}

#[tokio::test]
async fn feed_fetches_respect_bounded_concurrency() {
    let h = harness().await;
    for i in 0..8 {
        h.store
            .upsert_feed(
                &h.tenant,
                &format!("f{i}"),
                "Acme",
                &format!("https://boards-api.greenhouse.io/v1/boards/acme{i}/jobs"),
                Some("greenhouse"),
            )
            .await
            .unwrap();
    }

    let probe = Arc::new(ConcurrencyProbe {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        delay: std::time::Duration::from_millis(30),
    });
    let config = WorkerConfig {
        feed_concurrency: 2,
        ..fast_config()
    };
    let status = worker(&h, Arc::clone(&probe) as Arc<dyn FeedFetch>, config)
        .execute(&descriptor(&h, RunType::Scheduled))
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Done);
    assert!(probe.peak.load(Ordering::SeqCst) <= 2);
}

/// Fetcher that never returns inside the deadline.
struct StallingFetcher;

#[async_trait]
impl FeedFetch for StallingFetcher {
    async fn fetch_json(&self, _url: &str) -> Result<serde_json::Value, FeedError> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(json!({"jobs": []}))
    }
}

#[tokio::test]
async fn deadline_produces_terminal_failed_status() {
    let h = harness().await;
    h.store
        .upsert_feed(
            &h.tenant,
            "f1",
            "Acme",
            "https://boards-api.greenhouse.io/v1/boards/acme/jobs",
            Some("greenhouse"),
        )
        .await
        .unwrap();

    let config = WorkerConfig {
        deadline: std::time::Duration::from_millis(100),
        ..fast_config()
    };
    let desc = descriptor(&h, RunType::Scheduled);
    let status = worker(&h, Arc::new(StallingFetcher), config)
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Failed);

    let run = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("deadline"));
}

#[tokio::test]
async fn duplicate_delivery_of_terminal_run_is_noop() {
    let h = harness().await;
    let server = MockServer::start().await;
    mount_feed(&server, "/v1/boards/acme/jobs", greenhouse_payload(&[])).await;
    seed_greenhouse_feed(&h, &server).await;

    let w = worker(&h, fast_client(), fast_config());
    let desc = descriptor(&h, RunType::Scheduled);
    let first = w.execute(&desc).await.unwrap();
    assert_eq!(first, RunStatus::Done);

    let run_before = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();

    // Redelivery finds the ledger terminal and changes nothing.
    let second = w.execute(&desc).await.unwrap();
    assert_eq!(second, RunStatus::Done);
    let run_after = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run_before.finished_at, run_after.finished_at);
}

#[tokio::test]
async fn concurrent_live_run_skips_with_lock_reason() {
    let h = harness().await;

    // A prior run is mid-flight with a fresh heartbeat.
    let prior = descriptor(&h, RunType::Scheduled);
    h.ledger.create_enqueued(&prior).await.unwrap();
    h.ledger
        .begin_running(&h.tenant, prior.run_id.as_str(), 1)
        .await
        .unwrap();

    let config = WorkerConfig {
        run_lock_enabled: true,
        ..fast_config()
    };
    let desc = descriptor(&h, RunType::Manual);
    let status = worker(&h, fast_client(), config)
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::SkippedLockActive);

    let run = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert!(run.skip_reason.is_some());
}

#[tokio::test]
async fn gc_run_uses_same_state_machine() {
    let h = harness().await;
    let desc = descriptor(&h, RunType::Gc);
    let status = worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Done);

    let run = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.run_type, RunType::Gc);
    assert_eq!(run.status, RunStatus::Done);
    assert!(run.duration_ms.is_some());
}

#[tokio::test]
async fn counter_conservation_holds_on_mixed_feed() {
    let h = harness().await;
    let server = MockServer::start().await;
    let now = Utc::now();
    // One fresh NY posting, one too old, one with no timestamp, one non-US.
    let payload = json!({
        "jobs": [
            {
                "id": 1, "title": "Fresh",
                "updated_at": (now - Duration::minutes(5)).to_rfc3339(),
                "location": {"name": "New York, NY"}
            },
            {
                "id": 2, "title": "Old",
                "updated_at": (now - Duration::minutes(500)).to_rfc3339(),
                "location": {"name": "Austin, TX"}
            },
            {
                "id": 3, "title": "Dateless",
                "location": {"name": "Denver, CO"}
            },
            {
                "id": 4, "title": "Abroad",
                "updated_at": (now - Duration::minutes(5)).to_rfc3339(),
                "location": {"name": "Berlin"}
            }
        ]
    });
    mount_feed(&server, "/v1/boards/acme/jobs", payload).await;
    seed_greenhouse_feed(&h, &server).await;

    let desc = descriptor(&h, RunType::Scheduled);
    worker(&h, fast_client(), fast_config())
        .execute(&desc)
        .await
        .unwrap();

    let counters = h
        .ledger
        .get_run(&h.tenant, desc.run_id.as_str())
        .await
        .unwrap()
        .unwrap()
        .counters();
    assert_eq!(
        counters.found,
        counters.candidates + counters.skipped_old + counters.no_timestamp
    );
    assert_eq!(counters.writes, counters.added + counters.updated);
    assert_eq!(counters.found, 3);
    assert_eq!(counters.candidates, 1);
}
