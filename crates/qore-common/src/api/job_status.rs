use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::queue::ChatJob;

/// `GET /job-status/{job_id}` body. Pollers see the queue status verbatim;
/// `response` and the completion stamps stay null until the job finishes.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
}

impl JobStatusResponse {
    pub fn from_job(job: &ChatJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            status: job.status.as_str().to_string(),
            response: job.response.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
            processing_time_ms: job.processing_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobStatus;

    #[test]
    fn mirrors_the_job_document() {
        let now = Utc::now();
        let mut job = ChatJob::new("j1", "u1", "hi", "GRAPH", Vec::new(), "qore", now);
        job.status = JobStatus::Completed;
        job.response = Some("done".into());
        job.completed_at = Some(now);
        job.processing_time_ms = Some(1200);

        let body = serde_json::to_value(JobStatusResponse::from_job(&job)).unwrap();
        assert_eq!(body["job_id"], "j1");
        assert_eq!(body["status"], "completed");
        assert_eq!(body["response"], "done");
        assert_eq!(body["processing_time_ms"], 1200);
    }
}
