pub mod job;
pub mod producer;
pub mod store;

pub use job::{ChatJob, ChatTurn, JobStatus};
pub use producer::{ChatProducer, EnqueueOutcome, ProducerError};
pub use store::{JobQueueError, JobStore, RetryPolicy, JOB_COLLECTION, MEMORY_COLLECTION};
