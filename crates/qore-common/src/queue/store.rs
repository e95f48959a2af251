use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::job::{ChatJob, JobStatus};
use crate::job_id::new_job_id;
use crate::memory::MemoryRecord;
use crate::store::{DocStore, Document, FieldFilter, StoreError};

pub const JOB_COLLECTION: &str = "job_queue";
pub const MEMORY_COLLECTION: &str = "corporate_memory";

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("failed to map job document: {0}")]
    Mapping(String),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for JobQueueError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => JobQueueError::NotFound(msg),
            StoreError::Conflict(msg) => JobQueueError::Conflict(msg),
            other => JobQueueError::Store(other),
        }
    }
}

/// Bounded-retry policy for jobs that fail while processing. The original
/// deployment never retried, so both knobs stay configurable rather than
/// baked in.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: i64,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::minutes(5),
        }
    }
}

/// Job persistence over the document store. One document per job; the
/// document's server `updateTime` guards every transition that could race
/// with another sweep.
pub struct JobStore {
    store: Arc<DocStore>,
}

impl JobStore {
    pub fn new(store: Arc<DocStore>) -> Self {
        Self { store }
    }

    fn job_path(job_id: &str) -> String {
        format!("{JOB_COLLECTION}/{job_id}")
    }

    /// Durably insert a pending job. The explicit document id doubles as a
    /// store-side uniqueness check: an id collision surfaces as a conflict
    /// instead of silently overwriting.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn enqueue(&self, job: &ChatJob) -> Result<(), JobQueueError> {
        let fields = job_record(job)?;
        self.store
            .create_document(JOB_COLLECTION, &job.job_id, &fields)
            .await?;
        info!(job_id = %job.job_id, user_id = %job.user_id, "enqueued chat job");
        Ok(())
    }

    pub async fn fetch_job(
        &self,
        job_id: &str,
    ) -> Result<(ChatJob, Option<String>), JobQueueError> {
        let doc = self.store.get_document(&Self::job_path(job_id)).await?;
        let job = job_from_document(&doc)?;
        Ok((job, doc.update_time))
    }

    /// The single oldest pending job across the whole queue (global FIFO by
    /// `created_at`), together with the version the claim must be issued
    /// against.
    pub async fn oldest_pending(&self) -> Result<Option<(ChatJob, String)>, JobQueueError> {
        let Some(doc) = self
            .store
            .query_oldest(
                JOB_COLLECTION,
                &[FieldFilter::equal("status", json!(JobStatus::Pending.as_str()))],
            )
            .await?
        else {
            return Ok(None);
        };

        let job = job_from_document(&doc)?;
        let update_time = doc
            .update_time
            .ok_or_else(|| JobQueueError::Mapping("query result missing updateTime".into()))?;
        Ok(Some((job, update_time)))
    }

    /// Conditionally transition pending → processing. Returns `None` when a
    /// concurrent sweep got there first; exactly one claimer can win because
    /// the patch is guarded by the document version it observed.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn claim(
        &self,
        job: &ChatJob,
        update_time: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ChatJob>, JobQueueError> {
        if !job.status.can_transition_to(JobStatus::Processing) {
            return Err(JobQueueError::Conflict(format!(
                "job {} is {} and cannot be claimed",
                job.job_id,
                job.status.as_str()
            )));
        }

        let attempt_count = job.attempt_count + 1;
        let fields = record(json!({
            "status": JobStatus::Processing.as_str(),
            "locked_by": worker_id,
            "processing_started_at": now,
            "attempt_count": attempt_count,
            "next_retry_at": null,
        }));

        match self
            .store
            .patch_document(&Self::job_path(&job.job_id), &fields, Some(update_time))
            .await
        {
            Ok(_) => {
                let mut claimed = job.clone();
                claimed.status = JobStatus::Processing;
                claimed.locked_by = Some(worker_id.to_string());
                claimed.processing_started_at = Some(now);
                claimed.attempt_count = attempt_count;
                claimed.next_retry_at = None;
                Ok(Some(claimed))
            }
            Err(StoreError::Conflict(detail)) => {
                info!(job_id = %job.job_id, detail, "lost claim race; leaving job alone");
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Finish a claimed job. `processing_time_ms` is measured from enqueue
    /// time, matching what the status endpoint reports to pollers.
    #[instrument(skip(self, job, response_text), fields(job_id = %job.job_id))]
    pub async fn complete(
        &self,
        job: &ChatJob,
        response_text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), JobQueueError> {
        if !job.status.can_transition_to(JobStatus::Completed) {
            return Err(JobQueueError::Conflict(format!(
                "job {} is {} and cannot be completed",
                job.job_id,
                job.status.as_str()
            )));
        }

        let fields = record(json!({
            "status": JobStatus::Completed.as_str(),
            "response": response_text,
            "completed_at": now,
            "processing_time_ms": (now - job.created_at).num_milliseconds(),
            "locked_by": null,
        }));

        self.store
            .patch_document(&Self::job_path(&job.job_id), &fields, None)
            .await?;
        Ok(())
    }

    /// Route a processing failure through the retry policy: back to pending
    /// with a backoff while attempts remain, terminal `failed` afterwards.
    /// Returns the status the job ended up in.
    #[instrument(skip(self, job, policy), fields(job_id = %job.job_id))]
    pub async fn record_failure(
        &self,
        job: &ChatJob,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, JobQueueError> {
        if job.status != JobStatus::Processing {
            return Err(JobQueueError::Conflict(format!(
                "job {} is {} and cannot record a failure",
                job.job_id,
                job.status.as_str()
            )));
        }

        if job.attempt_count < policy.max_attempts {
            let retry_at = now + policy.backoff;
            let fields = record(json!({
                "status": JobStatus::Pending.as_str(),
                "next_retry_at": retry_at,
                "last_error": error,
                "locked_by": null,
                "processing_started_at": null,
            }));
            self.store
                .patch_document(&Self::job_path(&job.job_id), &fields, None)
                .await?;
            warn!(
                job_id = %job.job_id,
                attempt = job.attempt_count,
                max_attempts = policy.max_attempts,
                error,
                "job failed; scheduled for retry"
            );
            Ok(JobStatus::Pending)
        } else {
            let fields = record(json!({
                "status": JobStatus::Failed.as_str(),
                "last_error": error,
                "completed_at": now,
                "locked_by": null,
            }));
            self.store
                .patch_document(&Self::job_path(&job.job_id), &fields, None)
                .await?;
            warn!(
                job_id = %job.job_id,
                attempt = job.attempt_count,
                error,
                "job exhausted its attempts; marked failed"
            );
            Ok(JobStatus::Failed)
        }
    }

    /// Manual re-queue of a failed job. Any other state is a conflict so the
    /// endpoint cannot disturb in-flight or completed work.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self, job_id: &str) -> Result<(), JobQueueError> {
        let (job, update_time) = self.fetch_job(job_id).await?;
        if job.status != JobStatus::Failed {
            return Err(JobQueueError::Conflict(format!(
                "job {job_id} is {} and cannot be retried",
                job.status.as_str()
            )));
        }

        let fields = record(json!({
            "status": JobStatus::Pending.as_str(),
            "attempt_count": 0,
            "next_retry_at": null,
            "last_error": null,
            "response": null,
            "completed_at": null,
            "processing_started_at": null,
            "processing_time_ms": null,
            "locked_by": null,
        }));
        self.store
            .patch_document(&Self::job_path(job_id), &fields, update_time.as_deref())
            .await?;
        Ok(())
    }

    /// Return the oldest stale processing job to pending, if there is one.
    /// At most one job moves per call; the recovery binary loops until this
    /// reports nothing left to do.
    #[instrument(skip(self))]
    pub async fn recover_stale(
        &self,
        staleness: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, JobQueueError> {
        let Some(doc) = self
            .store
            .query_oldest(
                JOB_COLLECTION,
                &[FieldFilter::equal(
                    "status",
                    json!(JobStatus::Processing.as_str()),
                )],
            )
            .await?
        else {
            return Ok(None);
        };

        let job = job_from_document(&doc)?;
        let update_time = doc
            .update_time
            .ok_or_else(|| JobQueueError::Mapping("query result missing updateTime".into()))?;
        let started = job.processing_started_at.unwrap_or(job.created_at);
        if now - started < staleness {
            return Ok(None);
        }

        let fields = record(json!({
            "status": JobStatus::Pending.as_str(),
            "locked_by": null,
            "next_retry_at": now,
            "processing_started_at": null,
        }));

        match self
            .store
            .patch_document(&Self::job_path(&job.job_id), &fields, Some(&update_time))
            .await
        {
            Ok(_) => {
                info!(job_id = %job.job_id, "returned stale processing job to pending");
                Ok(Some(job.job_id))
            }
            Err(StoreError::Conflict(detail)) => {
                warn!(job_id = %job.job_id, detail, "stale job moved under us; skipping");
                Ok(None)
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Append one memory-extraction record. Callers treat failures as
    /// best-effort; this never touches the job document.
    #[instrument(skip(self, memory), fields(user_id = %memory.user_id))]
    pub async fn append_memory(&self, memory: &MemoryRecord) -> Result<(), JobQueueError> {
        let fields = serde_json::to_value(memory)
            .ok()
            .and_then(|value| value.as_object().cloned())
            .ok_or_else(|| JobQueueError::Mapping("memory record is not an object".into()))?;
        self.store
            .create_document(MEMORY_COLLECTION, &new_job_id(), &fields)
            .await?;
        Ok(())
    }
}

fn record(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn job_record(job: &ChatJob) -> Result<Map<String, Value>, JobQueueError> {
    match serde_json::to_value(job) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) | Err(_) => Err(JobQueueError::Mapping(
            "job did not serialize to an object".into(),
        )),
    }
}

fn job_from_document(doc: &Document) -> Result<ChatJob, JobQueueError> {
    serde_json::from_value(Value::Object(doc.fields.clone()))
        .map_err(|err| JobQueueError::Mapping(format!("{}: {err}", doc.doc_id())))
}
