//! Control-plane tests: queue → dispatcher → worker → ledger, scheduler
//! fan-out, and the admin HTTP surface.

use boardwatch_db::{open_in_memory, DispatchQueue, JobStore, RunLedger};
use boardwatch_feeds::{HttpFeedClient, RetryPolicy};
use boardwatch_protocol::{RunStatus, RunType, TenantId};
use boardwatch_sentinel::{enqueue_run, Dispatcher, Scheduler, Sentinel, SentinelConfig};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_client() -> Arc<HttpFeedClient> {
    Arc::new(
        HttpFeedClient::with_policy(RetryPolicy {
            max_retries: 1,
            backoff_base: std::time::Duration::from_millis(5),
            jitter: std::time::Duration::from_millis(1),
        })
        .unwrap(),
    )
}

async fn sentinel() -> Sentinel {
    let pool = open_in_memory().await.unwrap();
    Sentinel::new(pool, fast_client(), SentinelConfig::default())
}

async fn seed_feed(store: &JobStore, tenant: &TenantId, server: &MockServer) {
    store.ensure_tenant(tenant).await.unwrap();
    store
        .upsert_feed(
            tenant,
            "f1",
            "Acme",
            &format!("{}/v1/boards/acme/jobs", server.uri()),
            Some("greenhouse"),
        )
        .await
        .unwrap();
}

async fn mount_fresh_board(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/boards/acme/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [{
                "id": 1,
                "title": "Engineer",
                "updated_at": (Utc::now() - chrono::Duration::minutes(10)).to_rfc3339(),
                "location": {"name": "New York, NY"}
            }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn enqueued_run_is_dispatched_to_done() {
    let s = sentinel().await;
    let server = MockServer::start().await;
    mount_fresh_board(&server).await;
    let tenant = TenantId::parse("t1").unwrap();
    seed_feed(s.store(), &tenant, &server).await;

    let descriptor = enqueue_run(s.ledger(), s.queue(), &tenant, RunType::Manual, 3)
        .await
        .unwrap();

    let dispatcher = Dispatcher::new(
        s.queue().clone(),
        s.ledger().clone(),
        s.worker(),
        SentinelConfig::default(),
    );
    assert_eq!(dispatcher.drain_once().await, 1);

    let run = s
        .ledger()
        .get_run(&tenant, descriptor.run_id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.counters().added, 1);

    let stats = s.queue().stats().await.unwrap();
    assert_eq!(stats.done, 1);
    assert_eq!(stats.queued, 0);
}

#[tokio::test]
async fn scheduler_tick_enqueues_one_run_per_tenant() {
    let s = sentinel().await;
    for id in ["t1", "t2", "t3"] {
        let tenant = TenantId::parse(id).unwrap();
        s.store().ensure_tenant(&tenant).await.unwrap();
    }

    let scheduler = Scheduler::new(
        s.store().clone(),
        s.ledger().clone(),
        s.queue().clone(),
        SentinelConfig::default(),
    );
    assert_eq!(scheduler.tick(RunType::Scheduled).await, 3);
    assert_eq!(s.queue().stats().await.unwrap().queued, 3);

    // A second tick skips tenants that still have a buffered run.
    assert_eq!(scheduler.tick(RunType::Scheduled).await, 0);
    assert_eq!(s.queue().stats().await.unwrap().queued, 3);
}

#[tokio::test]
async fn enqueue_failure_lands_in_ledger() {
    let pool = open_in_memory().await.unwrap();
    let store = JobStore::new(pool.clone());
    let ledger = RunLedger::new(pool.clone());
    let queue = DispatchQueue::new(pool.clone());
    let tenant = TenantId::parse("t1").unwrap();
    store.ensure_tenant(&tenant).await.unwrap();

    // Break the queue out from under the submit.
    sqlx::query("DROP TABLE dispatch_queue")
        .execute(&pool)
        .await
        .unwrap();

    let err = enqueue_run(&ledger, &queue, &tenant, RunType::Scheduled, 3).await;
    assert!(err.is_err());

    let runs = ledger.recent_runs(&tenant, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::EnqueueFailed);
    assert!(runs[0].error.is_some());
}

#[tokio::test]
async fn gc_tick_enqueues_gc_runs() {
    let s = sentinel().await;
    let tenant = TenantId::parse("t1").unwrap();
    s.store().ensure_tenant(&tenant).await.unwrap();

    let scheduler = Scheduler::new(
        s.store().clone(),
        s.ledger().clone(),
        s.queue().clone(),
        SentinelConfig::default(),
    );
    assert_eq!(scheduler.tick(RunType::Gc).await, 1);

    let dispatcher = Dispatcher::new(
        s.queue().clone(),
        s.ledger().clone(),
        s.worker(),
        SentinelConfig::default(),
    );
    dispatcher.drain_once().await;

    let runs = s.ledger().recent_runs(&tenant, 10).await.unwrap();
    assert_eq!(runs[0].run_type, RunType::Gc);
    assert_eq!(runs[0].status, RunStatus::Done);
}

// ---------------------------------------------------------------------------
// Admin HTTP surface
// ---------------------------------------------------------------------------

async fn spawn_admin(s: &Sentinel) -> String {
    let state = boardwatch_sentinel::http::AppState {
        store: s.store().clone(),
        ledger: s.ledger().clone(),
        queue: s.queue().clone(),
        worker: s.worker(),
        dispatch_max_attempts: 3,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, boardwatch_sentinel::http::router(state))
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn healthz_responds_ok() {
    let s = sentinel().await;
    let base = spawn_admin(&s).await;
    let body = reqwest::get(format!("{base}/healthz"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "OK");
}

#[tokio::test]
async fn poll_now_enqueues_manual_run() {
    let s = sentinel().await;
    let base = spawn_admin(&s).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/poll-now"))
        .header("x-tenant-id", "t1")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "enqueued");
    let run_id = body["runId"].as_str().unwrap();

    let tenant = TenantId::parse("t1").unwrap();
    let run = s.ledger().get_run(&tenant, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Enqueued);
    assert_eq!(run.run_type, RunType::Manual);
    assert!(s.queue().has_queued("t1").await.unwrap());
}

#[tokio::test]
async fn poll_now_without_tenant_is_bad_request() {
    let s = sentinel().await;
    let base = spawn_admin(&s).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/poll-now"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn run_sync_now_returns_terminal_summary() {
    let s = sentinel().await;
    let server = MockServer::start().await;
    mount_fresh_board(&server).await;
    let tenant = TenantId::parse("t1").unwrap();
    seed_feed(s.store(), &tenant, &server).await;

    let base = spawn_admin(&s).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/internal/run-sync-now?tenantId=t1"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "done");
    assert_eq!(body["added"], 1);
    assert_eq!(body["run_type"], "manual");
}

#[tokio::test]
async fn runs_endpoint_lists_recent_runs() {
    let s = sentinel().await;
    let tenant = TenantId::parse("t1").unwrap();
    s.store().ensure_tenant(&tenant).await.unwrap();
    enqueue_run(s.ledger(), s.queue(), &tenant, RunType::Manual, 3)
        .await
        .unwrap();

    let base = spawn_admin(&s).await;
    let body: serde_json::Value = reqwest::get(format!("{base}/api/runs?tenantId=t1&limit=5"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["status"], "enqueued");
}
