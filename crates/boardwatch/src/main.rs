//! Boardwatch operator CLI.
//!
//! Usage:
//!     boardwatch serve                  # scheduler + dispatcher + admin HTTP
//!     boardwatch run-now --tenant t1    # one ingestion run, inline
//!     boardwatch poll-now --tenant t1   # enqueue a manual run
//!     boardwatch gc [--tenant t1]       # retention pass
//!     boardwatch status --tenant t1     # recent runs from the ledger
//!
//! Exit codes: 0 success, 2 bad input, 3 upstream failure, 4 storage failure.

use anyhow::Result;
use boardwatch_db::{DispatchQueue, JobStore, RunLedger, StoreError};
use boardwatch_feeds::HttpFeedClient;
use boardwatch_logging::{init_logging, LogConfig};
use boardwatch_protocol::defaults::{DEFAULT_ADMIN_BIND_ADDR, DEFAULT_DB_PATH};
use boardwatch_protocol::{RunDescriptor, RunId, RunStatus, RunType, TenantId};
use boardwatch_sentinel::{enqueue_run, Sentinel, SentinelConfig};
use boardwatch_worker::{CancellationToken, TenantWorker, WorkerConfig};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

const EXIT_OK: u8 = 0;
const EXIT_BAD_INPUT: u8 = 2;
const EXIT_UPSTREAM: u8 = 3;
const EXIT_STORAGE: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "boardwatch", about = "Multi-tenant job-feed ingestion service")]
struct Cli {
    /// SQLite database path
    #[arg(long, env = "BOARDWATCH_DB", default_value = DEFAULT_DB_PATH, global = true)]
    db: PathBuf,

    /// Mirror the full log stream to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control plane: scheduler, dispatcher, admin surface
    Serve {
        #[arg(long, env = "BOARDWATCH_ADMIN_BIND", default_value = DEFAULT_ADMIN_BIND_ADDR)]
        admin_bind: SocketAddr,

        /// Disable the admin HTTP surface
        #[arg(long)]
        no_admin: bool,

        /// End a manual run as skipped when another run is live
        #[arg(long)]
        run_lock: bool,
    },
    /// Execute one ingestion run for a tenant, inline
    RunNow {
        #[arg(long)]
        tenant: String,
    },
    /// Enqueue a manual run for a tenant
    PollNow {
        #[arg(long)]
        tenant: String,
    },
    /// Execute a garbage-collection run, for one tenant or all
    Gc {
        #[arg(long)]
        tenant: Option<String>,
    },
    /// Show recent runs for a tenant
    Status {
        #[arg(long)]
        tenant: String,

        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Create the database schema
    InitDb,
    /// Register or update a feed subscription
    AddFeed {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        feed_id: String,

        #[arg(long, default_value = "")]
        company: String,

        #[arg(long)]
        url: String,

        /// Declared source tag (greenhouse | ashby); detected from the URL
        /// when omitted
        #[arg(long)]
        source: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(LogConfig {
        app_name: "boardwatch",
        verbose: cli.verbose,
    }) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(EXIT_STORAGE);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            eprintln!("error: {e:#}");
            let code = if e.downcast_ref::<boardwatch_protocol::IdParseError>().is_some() {
                EXIT_BAD_INPUT
            } else if e.downcast_ref::<StoreError>().is_some() {
                EXIT_STORAGE
            } else {
                EXIT_UPSTREAM
            };
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let pool = boardwatch_db::open(&cli.db).await?;
    let store = JobStore::new(pool.clone());
    let ledger = RunLedger::new(pool.clone());
    let queue = DispatchQueue::new(pool.clone());

    match cli.command {
        Command::Serve {
            admin_bind,
            no_admin,
            run_lock,
        } => {
            let config = SentinelConfig {
                admin_bind: (!no_admin).then_some(admin_bind),
                worker: WorkerConfig {
                    run_lock_enabled: run_lock,
                    ..WorkerConfig::default()
                },
                ..SentinelConfig::default()
            };
            let fetcher = Arc::new(HttpFeedClient::new()?);
            let sentinel = Sentinel::new(pool, fetcher, config);

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    signal_cancel.cancel();
                }
            });

            sentinel.run(cancel).await?;
            Ok(EXIT_OK)
        }

        Command::RunNow { tenant } => {
            let tenant = parse_tenant(&tenant)?;
            store.ensure_tenant(&tenant).await?;
            let status = execute_inline(&store, &ledger, &tenant, RunType::Manual).await?;
            Ok(exit_code_for(status))
        }

        Command::PollNow { tenant } => {
            let tenant = parse_tenant(&tenant)?;
            store.ensure_tenant(&tenant).await?;
            let descriptor = enqueue_run(
                &ledger,
                &queue,
                &tenant,
                RunType::Manual,
                boardwatch_protocol::defaults::DEFAULT_DISPATCH_MAX_ATTEMPTS,
            )
            .await?;
            println!("{{\"runId\":\"{}\",\"status\":\"enqueued\"}}", descriptor.run_id);
            Ok(EXIT_OK)
        }

        Command::Gc { tenant } => {
            let tenants = match tenant {
                Some(tenant) => vec![parse_tenant(&tenant)?],
                None => store.list_tenants().await?,
            };
            let mut worst = EXIT_OK;
            for tenant in tenants {
                let status = execute_inline(&store, &ledger, &tenant, RunType::Gc).await?;
                worst = worst.max(exit_code_for(status));
            }
            Ok(worst)
        }

        Command::Status { tenant, limit } => {
            let tenant = parse_tenant(&tenant)?;
            let runs = ledger.recent_runs(&tenant, limit.clamp(1, 100)).await?;
            if runs.is_empty() {
                println!("no runs recorded for tenant {tenant}");
                return Ok(EXIT_OK);
            }
            println!(
                "{:<38} {:<10} {:<19} {:>5} {:>5} {:>5} {:>5} {:>6}",
                "RUN", "TYPE", "STATUS", "FOUND", "ADD", "UPD", "ERRS", "MS"
            );
            for run in runs {
                println!(
                    "{:<38} {:<10} {:<19} {:>5} {:>5} {:>5} {:>5} {:>6}",
                    run.run_id,
                    run.run_type.as_str(),
                    run.status.as_str(),
                    run.found,
                    run.added,
                    run.updated,
                    run.errors_count,
                    run.duration_ms.unwrap_or(0),
                );
            }
            Ok(EXIT_OK)
        }

        Command::InitDb => {
            // open() already ran schema init.
            println!("schema ready at {}", cli.db.display());
            Ok(EXIT_OK)
        }

        Command::AddFeed {
            tenant,
            feed_id,
            company,
            url,
            source,
        } => {
            let tenant = parse_tenant(&tenant)?;
            store.ensure_tenant(&tenant).await?;
            store
                .upsert_feed(&tenant, &feed_id, &company, &url, source.as_deref())
                .await?;
            println!("feed {feed_id} registered for tenant {tenant}");
            Ok(EXIT_OK)
        }
    }
}

fn parse_tenant(raw: &str) -> Result<TenantId> {
    TenantId::parse(raw).map_err(anyhow::Error::new)
}

async fn execute_inline(
    store: &JobStore,
    ledger: &RunLedger,
    tenant: &TenantId,
    run_type: RunType,
) -> Result<RunStatus> {
    let fetcher = Arc::new(HttpFeedClient::new()?);
    let worker = TenantWorker::new(
        store.clone(),
        ledger.clone(),
        fetcher,
        WorkerConfig::default(),
    );
    let descriptor = RunDescriptor {
        tenant_id: tenant.clone(),
        run_id: RunId::new(),
        run_type,
    };
    let status = worker.execute(&descriptor).await?;
    let run = ledger.get_run(tenant, descriptor.run_id.as_str()).await?;
    if let Some(run) = run {
        let counters = run.counters();
        println!(
            "run {} {}: found={} candidates={} added={} updated={} skipped_old={} \
             skipped_unchanged={} no_timestamp={} errors={} duration_ms={}",
            run.run_id,
            run.status.as_str(),
            counters.found,
            counters.candidates,
            counters.added,
            counters.updated,
            counters.skipped_old,
            counters.skipped_unchanged,
            counters.no_timestamp,
            counters.errors_count,
            run.duration_ms.unwrap_or(0),
        );
    }
    Ok(status)
}

fn exit_code_for(status: RunStatus) -> u8 {
    match status {
        RunStatus::Done | RunStatus::SkippedLockActive => EXIT_OK,
        RunStatus::DoneWithErrors | RunStatus::Failed => EXIT_UPSTREAM,
        RunStatus::Enqueued | RunStatus::Running | RunStatus::EnqueueFailed => EXIT_STORAGE,
    }
}
