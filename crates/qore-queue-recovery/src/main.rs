//! Maintenance pass that returns stale `processing` jobs to `pending`.
//!
//! A consumer crash strands its claimed job in `processing` forever; pollers
//! cannot tell that apart from slow generation. Running this on a timer
//! bounds how long a crashed job stays invisible to the queue.

use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{info, warn};

use qore_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use qore_common::queue::JobStore;
use qore_common::store::client::DEFAULT_BASE_URL;
use qore_common::store::{DocStore, ServiceAccountKey, StoreConfig, TokenBroker};

#[derive(Debug, Parser)]
#[command(
    name = "qore-queue-recovery",
    about = "Return stale processing jobs to the pending queue"
)]
struct Cli {
    /// Document store project id
    #[arg(long, env = "QORE_STORE_PROJECT")]
    project_id: String,

    /// Inline service-account JSON (client_email + private_key)
    #[arg(long, env = "QORE_SERVICE_ACCOUNT_JSON")]
    service_account_json: Option<String>,

    /// Path to a service-account key file; ignored when the inline JSON is set
    #[arg(long, env = "QORE_SERVICE_ACCOUNT_KEY_FILE")]
    service_account_file: Option<String>,

    /// Document store REST endpoint
    #[arg(long, env = "QORE_STORE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    store_base_url: String,

    /// Minutes a job may sit in processing before it counts as stale
    #[arg(long, env = "QORE_STALENESS_MINUTES", default_value_t = 10)]
    staleness_minutes: i64,

    /// Upper bound on jobs reset in one run
    #[arg(long, env = "QORE_RECOVERY_MAX_RESETS", default_value_t = 100)]
    max_resets: usize,

    /// Total timeout (seconds) for outbound store calls
    #[arg(long, env = "QORE_HTTP_TIMEOUT_SECONDS", default_value_t = 30)]
    http_timeout: u64,
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing_subscriber("qore-queue-recovery");
    install_tracing_panic_hook("qore-queue-recovery");

    let cli = Cli::parse();

    let credential = ServiceAccountKey::load(
        cli.service_account_json.as_deref(),
        cli.service_account_file.as_deref(),
    )?
    .ok_or("a service account (QORE_SERVICE_ACCOUNT_JSON or _KEY_FILE) is required")?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(cli.http_timeout))
        .build()?;
    let tokens = Arc::new(TokenBroker::new(credential, http.clone()));
    let jobs = JobStore::new(Arc::new(DocStore::new(
        StoreConfig::new(cli.project_id.clone()).with_base_url(cli.store_base_url.clone()),
        tokens,
        http,
    )));

    let staleness = Duration::minutes(cli.staleness_minutes.max(1));
    info!(
        project_id = %cli.project_id,
        staleness_minutes = cli.staleness_minutes,
        "scanning for stale processing jobs"
    );

    let mut reset = 0usize;
    while reset < cli.max_resets {
        match jobs.recover_stale(staleness, Utc::now()).await {
            Ok(Some(job_id)) => {
                info!(%job_id, "reset stale job to pending");
                reset += 1;
            }
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "recovery pass aborted");
                return Err(err.into());
            }
        }
    }

    info!(reset, "recovery pass finished");
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("qore-queue-recovery failed: {err}");
        std::process::exit(1);
    }
}
