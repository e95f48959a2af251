use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::job::{ChatJob, ChatTurn};
use super::store::JobStore;
use crate::genai::{ChatGenerator, GenerateError};
use crate::job_id::new_job_id;
use crate::reflex::ReflexTable;
use crate::sweep::execute_task;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

#[derive(Debug)]
pub enum EnqueueOutcome {
    /// Durably queued; the caller polls the status endpoint with this id.
    Queued { job_id: String },
    /// The store was unavailable or unconfigured, so the task ran inline.
    Fallback { response: String, reflex: bool },
}

/// Producer side of the queue. Accepts a chat request, writes a pending job,
/// and returns immediately. When durable storage is missing or failing the
/// request degrades to synchronous in-process execution instead of erroring,
/// so the feature keeps working without the store configured; the response
/// carries an explicit fallback marker so the degradation stays observable.
pub struct ChatProducer {
    jobs: Option<JobStore>,
    generator: Arc<dyn ChatGenerator>,
    reflexes: ReflexTable,
}

impl ChatProducer {
    pub fn new(
        jobs: Option<JobStore>,
        generator: Arc<dyn ChatGenerator>,
        reflexes: ReflexTable,
    ) -> Self {
        Self {
            jobs,
            generator,
            reflexes,
        }
    }

    pub fn durable(&self) -> bool {
        self.jobs.is_some()
    }

    pub fn job_store(&self) -> Option<&JobStore> {
        self.jobs.as_ref()
    }

    #[instrument(skip(self, message, history), fields(user_id = %user_id))]
    pub async fn submit(
        &self,
        user_id: &str,
        message: &str,
        mode: &str,
        history: Vec<ChatTurn>,
        persona: &str,
    ) -> Result<EnqueueOutcome, ProducerError> {
        let Some(jobs) = &self.jobs else {
            return self.run_inline(persona, &history, message).await;
        };

        let job = ChatJob::new(
            new_job_id(),
            user_id,
            message,
            mode,
            history.clone(),
            persona,
            Utc::now(),
        );

        match jobs.enqueue(&job).await {
            Ok(()) => Ok(EnqueueOutcome::Queued { job_id: job.job_id }),
            Err(err) => {
                warn!(error = %err, "job store write failed; running task inline");
                self.run_inline(persona, &history, message).await
            }
        }
    }

    async fn run_inline(
        &self,
        persona: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<EnqueueOutcome, ProducerError> {
        let reply = execute_task(
            self.generator.as_ref(),
            &self.reflexes,
            persona,
            history,
            message,
        )
        .await?;
        info!(reflex = reply.reflex, "served chat request via synchronous fallback");
        Ok(EnqueueOutcome::Fallback {
            response: reply.response,
            reflex: reply.reflex,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::store::testutil::test_service_account;
    use crate::store::token::SystemClock;
    use crate::store::{DocStore, StoreConfig, TokenBroker};

    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatGenerator for CountingGenerator {
        async fn generate(
            &self,
            _system_prompt: &str,
            _history: &[ChatTurn],
            _message: &str,
        ) -> Result<String, GenerateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("generated text".into())
        }
    }

    fn unreachable_job_store() -> JobStore {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenBroker::with_endpoints(
            test_service_account(),
            http.clone(),
            // Nothing listens here; every token mint fails fast.
            "http://127.0.0.1:9/token".into(),
            Arc::new(SystemClock),
        ));
        JobStore::new(Arc::new(DocStore::new(
            StoreConfig::new("unique-ue").with_base_url("http://127.0.0.1:9"),
            tokens,
            http,
        )))
    }

    #[tokio::test]
    async fn no_store_means_synchronous_fallback() {
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let producer = ChatProducer::new(None, generator.clone(), ReflexTable::builtin());

        let outcome = producer
            .submit("user-1", "Explain quantum entanglement", "graph", Vec::new(), "qore")
            .await
            .unwrap();

        match outcome {
            EnqueueOutcome::Fallback { response, reflex } => {
                assert_eq!(response, "generated text");
                assert!(!reflex);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_fallback_not_an_error() {
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let producer = ChatProducer::new(
            Some(unreachable_job_store()),
            generator.clone(),
            ReflexTable::builtin(),
        );

        let outcome = producer
            .submit("user-1", "Explain quantum entanglement", "graph", Vec::new(), "qore")
            .await
            .unwrap();

        assert!(matches!(outcome, EnqueueOutcome::Fallback { reflex: false, .. }));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_still_honors_the_reflex_table() {
        let generator = Arc::new(CountingGenerator {
            calls: AtomicUsize::new(0),
        });
        let producer = ChatProducer::new(None, generator.clone(), ReflexTable::builtin());

        let outcome = producer
            .submit("user-1", "hello", "graph", Vec::new(), "qore")
            .await
            .unwrap();

        match outcome {
            EnqueueOutcome::Fallback { response, reflex } => {
                assert!(reflex);
                assert!(response.contains("The Qore"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
