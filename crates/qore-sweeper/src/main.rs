use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use qore_common::genai::{GeneratorConfig, HttpChatGenerator};
use qore_common::job_id::process_run_id;
use qore_common::logging::{init_tracing_subscriber, install_tracing_panic_hook};
use qore_common::queue::{JobStore, RetryPolicy};
use qore_common::reflex::ReflexTable;
use qore_common::store::client::DEFAULT_BASE_URL;
use qore_common::store::{DocStore, ServiceAccountKey, StoreConfig, TokenBroker};
use qore_common::sweep::{sweep_once, SweepContext, SweepOutcome};

#[derive(Debug, Parser)]
#[command(
    name = "qore-sweeper",
    about = "Scheduled consumer: claims and processes one queued chat job per tick"
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

    /// Worker id recorded on claimed jobs
    #[arg(long, env = "QORE_WORKER_ID", default_value = "qore-sweeper")]
    worker_id: String,

    /// Tick interval in seconds; each tick processes at most one job
    #[arg(long, env = "QORE_POLL_INTERVAL_SECONDS", default_value_t = 60)]
    poll_interval: u64,

    /// Optional cap on how many jobs to process before exiting
    #[arg(long)]
    max_jobs: Option<usize>,

    /// Exit when a tick finds the queue empty instead of idling
    #[arg(long, default_value_t = false)]
    exit_on_empty: bool,

    /// Attempts before a job is marked failed
    #[arg(long, env = "QORE_JOB_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: i64,

    /// Backoff in seconds before a failed attempt becomes eligible again
    #[arg(long, env = "QORE_JOB_RETRY_BACKOFF_SECONDS", default_value_t = 300)]
    retry_backoff: i64,

    /// Total timeout (seconds) for outbound store and provider calls
    #[arg(long, env = "QORE_HTTP_TIMEOUT_SECONDS", default_value_t = 30)]
    http_timeout: u64,
}

fn record_outcome(outcome: &SweepOutcome) {
    metrics::counter!("qore_sweeps_total").increment(1);
    for name in outcome_counters(outcome) {
        metrics::counter!(*name).increment(1);
    }
}

fn outcome_counters(outcome: &SweepOutcome) -> &'static [&'static str] {
    match outcome {
        SweepOutcome::Idle => &[],
        SweepOutcome::LostRace => &["qore_claim_races_total"],
        SweepOutcome::Completed { reflex: true, .. } => {
            &["qore_jobs_completed_total", "qore_reflex_hits_total"]
        }
        SweepOutcome::Completed { reflex: false, .. } => &["qore_jobs_completed_total"],
        SweepOutcome::Retried { .. } => &["qore_job_retries_total"],
        SweepOutcome::Failed { .. } => &["qore_jobs_failed_total"],
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_tracing_subscriber("qore-sweeper");
    install_tracing_panic_hook("qore-sweeper");

    let cli = Cli::parse();
    qore_metrics::init_metrics("QORE_METRICS_PORT", 9464);

    let credential = ServiceAccountKey::load(
        cli.service_account_json.as_deref(),
        cli.service_account_file.as_deref(),
    )?
    .ok_or("a service account (QORE_SERVICE_ACCOUNT_JSON or _KEY_FILE) is required")?;

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(cli.http_timeout))
        .build()?;
    let tokens = Arc::new(TokenBroker::new(credential, http.clone()));
    let store = DocStore::new(
        StoreConfig::new(cli.project_id.clone()).with_base_url(cli.store_base_url.clone()),
        tokens,
        http.clone(),
    );

    let generator_config = GeneratorConfig::from_env();
    info!(
        run_id = process_run_id(),
        worker_id = %cli.worker_id,
        project_id = %cli.project_id,
        poll_interval = cli.poll_interval,
        max_attempts = cli.max_attempts,
        provider = %generator_config.provider,
        model = %generator_config.model,
        "starting queue sweeper"
    );

    let ctx = SweepContext {
        jobs: JobStore::new(Arc::new(store)),
        generator: Arc::new(HttpChatGenerator::new(generator_config, http)),
        reflexes: ReflexTable::builtin(),
        policy: RetryPolicy {
            max_attempts: cli.max_attempts,
            backoff: chrono::Duration::seconds(cli.retry_backoff),
        },
        worker_id: cli.worker_id.clone(),
    };

    let mut ticker = interval(Duration::from_secs(cli.poll_interval.max(1)));
    let mut processed = 0usize;
    let max_jobs = cli.max_jobs.unwrap_or(usize::MAX);

    while processed < max_jobs {
        ticker.tick().await;

        match sweep_once(&ctx).await {
            Ok(outcome) => {
                record_outcome(&outcome);
                match outcome {
                    SweepOutcome::Idle => {
                        if cli.exit_on_empty {
                            info!(processed, "queue empty; exiting");
                            break;
                        }
                    }
                    SweepOutcome::LostRace => {}
                    SweepOutcome::Completed { .. }
                    | SweepOutcome::Retried { .. }
                    | SweepOutcome::Failed { .. } => processed += 1,
                }
            }
            // The sweep boundary catches everything; a bad tick never kills
            // the scheduler.
            Err(err) => warn!(error = %err, "sweep failed"),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("qore-sweeper failed: {err}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_cover_the_scheduled_trigger_shape() {
        let cli = Cli::try_parse_from(["qore-sweeper", "--project-id", "unique-ue"]).unwrap();
        assert_eq!(cli.worker_id, "qore-sweeper");
        assert!(cli.poll_interval >= 1);
        assert_eq!(cli.max_attempts, 3);
        assert!(!cli.exit_on_empty);
    }

    #[test]
    fn outcome_counter_mapping() {
        assert!(outcome_counters(&SweepOutcome::Idle).is_empty());
        assert_eq!(
            outcome_counters(&SweepOutcome::LostRace),
            ["qore_claim_races_total"].as_slice()
        );
        assert_eq!(
            outcome_counters(&SweepOutcome::Completed {
                job_id: "j".into(),
                reflex: true,
            }),
            ["qore_jobs_completed_total", "qore_reflex_hits_total"].as_slice()
        );
        assert_eq!(
            outcome_counters(&SweepOutcome::Retried { job_id: "j".into() }),
            ["qore_job_retries_total"].as_slice()
        );
        assert_eq!(
            outcome_counters(&SweepOutcome::Failed { job_id: "j".into() }),
            ["qore_jobs_failed_total"].as_slice()
        );
    }
}
