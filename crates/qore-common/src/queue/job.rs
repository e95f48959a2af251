use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue status. Terminal states are `completed` and `failed`; `processing`
/// may return to `pending` only through the explicit retry and stale-job
/// recovery paths, never implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal lifecycle edges. Completed documents are immutable; failed jobs
    /// may only re-enter the queue via the manual retry endpoint.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
                | (JobStatus::Failed, JobStatus::Pending)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// One chat turn tracked through the queue. Stored as a single document in
/// the `job_queue` collection, document id = `job_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatJob {
    pub job_id: String,
    pub user_id: String,
    pub message: String,
    pub mode: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub persona: String,
    pub status: JobStatus,
    #[serde(default)]
    pub attempt_count: i64,
    #[serde(default)]
    pub locked_by: Option<String>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub processing_time_ms: Option<i64>,
}

impl ChatJob {
    pub fn new(
        job_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
        mode: impl Into<String>,
        history: Vec<ChatTurn>,
        persona: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            mode: mode.into(),
            history,
            persona: persona.into(),
            status: JobStatus::Pending,
            attempt_count: 0,
            locked_by: None,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            processing_started_at: None,
            completed_at: None,
            response: None,
            processing_time_ms: None,
        }
    }
}
