pub mod chat;
pub mod job_status;

pub use chat::{ChatRequest, FallbackResponse, QueuedResponse};
pub use job_status::JobStatusResponse;
