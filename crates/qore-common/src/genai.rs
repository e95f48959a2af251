//! AI-generation collaborator: a chat-completions-shaped HTTP client behind
//! a trait so the sweep and the synchronous fallback can run against fakes.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::instrument;

use crate::queue::ChatTurn;
use crate::store::truncate_detail;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("ai provider rejected request ({status}): {detail}")]
    Status { status: u16, detail: String },
    #[error("ai provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ai response carried no message content")]
    EmptyResponse,
}

#[async_trait]
pub trait ChatGenerator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, GenerateError>;
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
}

impl GeneratorConfig {
    /// Resolve provider settings from the environment. `QORE_AI_PROVIDER`
    /// picks the defaults; model, endpoint, and key are individually
    /// overridable.
    pub fn from_env() -> Self {
        let provider = std::env::var("QORE_AI_PROVIDER").unwrap_or_else(|_| "github".into());
        let (default_model, default_endpoint) = provider_defaults(&provider);

        let api_key = std::env::var("QORE_AI_API_KEY")
            .ok()
            .or_else(|| provider_api_key(&provider))
            .unwrap_or_default();

        Self {
            provider,
            model: std::env::var("QORE_AI_MODEL").unwrap_or(default_model),
            endpoint: std::env::var("QORE_AI_ENDPOINT").unwrap_or(default_endpoint),
            api_key,
        }
    }
}

fn provider_defaults(provider: &str) -> (String, String) {
    match provider.to_ascii_lowercase().as_str() {
        "openai" => (
            "gpt-4o-mini".into(),
            "https://api.openai.com/v1/chat/completions".into(),
        ),
        "google" | "gemini" => (
            "gemini-1.5-flash".into(),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions".into(),
        ),
        "huggingface" | "hf" => (
            "meta-llama/Meta-Llama-3-70B-Instruct".into(),
            "https://router.huggingface.co/v1/chat/completions".into(),
        ),
        _ => (
            "openai/gpt-4o-mini".into(),
            "https://models.github.ai/inference/chat/completions".into(),
        ),
    }
}

fn provider_api_key(provider: &str) -> Option<String> {
    match provider.to_ascii_lowercase().as_str() {
        "openai" => std::env::var("OPENAI_API_KEY").ok(),
        "google" | "gemini" => std::env::var("GOOGLE_API_KEY").ok(),
        "huggingface" | "hf" => std::env::var("HUGGINGFACE_API_KEY")
            .ok()
            .or_else(|| std::env::var("HF_TOKEN").ok()),
        _ => std::env::var("GITHUB_PAT")
            .ok()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok()),
    }
}

pub struct HttpChatGenerator {
    http: reqwest::Client,
    config: GeneratorConfig,
}

impl HttpChatGenerator {
    pub fn new(config: GeneratorConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl ChatGenerator for HttpChatGenerator {
    #[instrument(skip_all, fields(provider = %self.config.provider, model = %self.config.model))]
    async fn generate(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String, GenerateError> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": system_prompt }));
        for turn in history {
            // Clients may still send the graph UI's historical `model` role.
            let role = if turn.role == "model" { "assistant" } else { turn.role.as_str() };
            messages.push(json!({ "role": role, "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": message }));

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&json!({ "model": self.config.model, "messages": messages }));

        if self.config.provider.eq_ignore_ascii_case("github") {
            request = request
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28");
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = truncate_detail(&response.text().await.unwrap_or_default());
            return Err(GenerateError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let body: Value = response.json().await?;
        let content = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .ok_or(GenerateError::EmptyResponse)?;

        Ok(content.to_string())
    }
}
