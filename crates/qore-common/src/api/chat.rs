use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::queue::ChatTurn;

/// `POST /chat` body. Field names match the browser client, which camelCases
/// the optional extras and sends history turns as `{role, content}` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub persona: Option<String>,
    /// Graph nodes the client considered relevant. Accepted for wire
    /// compatibility; the queue does not persist them.
    #[serde(default, rename = "contextNodes")]
    pub context_nodes: Vec<Value>,
    #[serde(default, rename = "userId")]
    pub user_id: Option<String>,
}

pub const DEFAULT_MODE: &str = "GRAPH";
pub const DEFAULT_PERSONA: &str = "qore";
pub const DEFAULT_USER: &str = "anonymous";

/// Accepted-for-processing acknowledgment.
#[derive(Debug, Clone, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub job_id: String,
    pub message: String,
    pub executive: String,
}

impl QueuedResponse {
    pub fn new(job_id: String) -> Self {
        Self {
            status: "queued",
            job_id,
            message: "Request queued for asynchronous processing.".into(),
            executive: "The Qore has accepted your request and is thinking.".into(),
        }
    }
}

/// Synchronous degrade path: the task ran inline because durable storage was
/// unavailable. `reply` duplicates `response` for older clients.
#[derive(Debug, Clone, Serialize)]
pub struct FallbackResponse {
    pub status: &'static str,
    pub response: String,
    pub reply: String,
    pub fallback: bool,
}

impl FallbackResponse {
    pub fn new(response: String) -> Self {
        let reply = response.clone();
        Self {
            status: "completed",
            response,
            reply,
            fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_tolerates_minimal_bodies() {
        let request: ChatRequest = serde_json::from_str(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(request.message, "hello");
        assert!(request.history.is_empty());
        assert!(request.user_id.is_none());
    }

    #[test]
    fn chat_request_accepts_the_full_client_shape() {
        let request: ChatRequest = serde_json::from_str(
            r#"{
                "message": "what connects these?",
                "mode": "GRAPH",
                "history": [{"role": "user", "content": "earlier"}],
                "persona": "qore",
                "contextNodes": [{"label": "Apples", "type": "CONCEPT"}],
                "userId": "user-42"
            }"#,
        )
        .unwrap();

        assert_eq!(request.history.len(), 1);
        assert_eq!(request.context_nodes.len(), 1);
        assert_eq!(request.user_id.as_deref(), Some("user-42"));
    }

    #[test]
    fn fallback_response_is_explicitly_marked() {
        let body = serde_json::to_value(FallbackResponse::new("text".into())).unwrap();
        assert_eq!(body["status"], "completed");
        assert_eq!(body["fallback"], true);
        assert_eq!(body["response"], body["reply"]);
    }
}
