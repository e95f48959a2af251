//! One consumer sweep: claim the oldest pending job, produce a reply, and
//! persist the outcome. At most one job is processed per call; overlapping
//! sweeps are safe because the claim is a conditional update.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::genai::{ChatGenerator, GenerateError};
use crate::memory::{extract_memory_update, MemoryRecord};
use crate::persona;
use crate::queue::{ChatTurn, JobQueueError, JobStore, JobStatus, RetryPolicy};
use crate::reflex::ReflexTable;

pub struct SweepContext {
    pub jobs: JobStore,
    pub generator: Arc<dyn ChatGenerator>,
    pub reflexes: ReflexTable,
    pub policy: RetryPolicy,
    pub worker_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing pending, or the oldest pending job is waiting out its backoff.
    Idle,
    /// Another sweep claimed the job between our read and our write.
    LostRace,
    Completed { job_id: String, reflex: bool },
    Retried { job_id: String },
    Failed { job_id: String },
}

pub struct TaskReply {
    pub response: String,
    pub reflex: bool,
}

/// The task itself, shared verbatim with the producer's synchronous
/// fallback: reflex table first, AI generation otherwise.
pub async fn execute_task(
    generator: &dyn ChatGenerator,
    reflexes: &ReflexTable,
    persona_name: &str,
    history: &[ChatTurn],
    message: &str,
) -> Result<TaskReply, GenerateError> {
    if let Some(canned) = reflexes.respond(message) {
        return Ok(TaskReply {
            response: canned.to_string(),
            reflex: true,
        });
    }

    let prompt = persona::system_prompt(persona_name);
    let response = generator.generate(prompt, history, message).await?;
    Ok(TaskReply {
        response,
        reflex: false,
    })
}

#[instrument(skip(ctx), fields(worker_id = %ctx.worker_id))]
pub async fn sweep_once(ctx: &SweepContext) -> Result<SweepOutcome, JobQueueError> {
    let Some((job, update_time)) = ctx.jobs.oldest_pending().await? else {
        return Ok(SweepOutcome::Idle);
    };

    let now = Utc::now();
    if job.next_retry_at.map(|at| at > now).unwrap_or(false) {
        // Global FIFO means a backing-off head blocks the tick; the next
        // eligible moment is bounded by the retry backoff.
        return Ok(SweepOutcome::Idle);
    }

    let Some(claimed) = ctx
        .jobs
        .claim(&job, &update_time, &ctx.worker_id, now)
        .await?
    else {
        return Ok(SweepOutcome::LostRace);
    };

    info!(
        job_id = %claimed.job_id,
        attempt = claimed.attempt_count,
        "claimed pending job"
    );

    match execute_task(
        ctx.generator.as_ref(),
        &ctx.reflexes,
        &claimed.persona,
        &claimed.history,
        &claimed.message,
    )
    .await
    {
        Ok(task) => {
            persist_memory(ctx, &claimed.user_id, &claimed.job_id, &task.response).await;

            ctx.jobs.complete(&claimed, &task.response, Utc::now()).await?;
            info!(job_id = %claimed.job_id, reflex = task.reflex, "job completed");
            Ok(SweepOutcome::Completed {
                job_id: claimed.job_id,
                reflex: task.reflex,
            })
        }
        Err(err) => {
            let status = ctx
                .jobs
                .record_failure(&claimed, &err.to_string(), &ctx.policy, Utc::now())
                .await?;
            Ok(match status {
                JobStatus::Pending => SweepOutcome::Retried {
                    job_id: claimed.job_id,
                },
                _ => SweepOutcome::Failed {
                    job_id: claimed.job_id,
                },
            })
        }
    }
}

/// Memory persistence is best-effort: a malformed block or a store hiccup
/// must not un-complete the job, so failures stop here as warnings.
async fn persist_memory(ctx: &SweepContext, user_id: &str, job_id: &str, response: &str) {
    let update = match extract_memory_update(response) {
        Ok(Some(update)) if !update.is_empty() => update,
        Ok(_) => return,
        Err(err) => {
            warn!(job_id, error = %err, "ignoring malformed memory update block");
            return;
        }
    };

    let record = match MemoryRecord::from_update(user_id, &update, Utc::now()) {
        Ok(record) => record,
        Err(err) => {
            warn!(job_id, error = %err, "failed to serialize memory update");
            return;
        }
    };

    if let Err(err) = ctx.jobs.append_memory(&record).await {
        warn!(job_id, error = %err, "failed to persist memory update");
    }
}
