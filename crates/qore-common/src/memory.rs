//! Corporate-memory extraction from generated replies.
//!
//! The generation prompt asks the model to append a delimited
//! `<memory_update>` block whose body is a JSON object with `nodes` and
//! `links`. The block is located by its delimiters and the body is
//! deserialized against that schema; malformed payloads are rejected
//! outright rather than partially scraped, so a truncated model response can
//! never persist a half-parsed graph fragment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MEMORY_OPEN_TAG: &str = "<memory_update>";
pub const MEMORY_CLOSE_TAG: &str = "</memory_update>";

#[derive(Debug, Error)]
pub enum MemoryParseError {
    #[error("memory update block is missing its closing tag")]
    Unterminated,
    #[error("memory update block is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLink {
    pub source: String,
    pub target: String,
    pub rel: String,
    #[serde(default = "default_strength")]
    pub strength: f64,
}

fn default_strength() -> f64 {
    1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    #[serde(default)]
    pub nodes: Vec<MemoryNode>,
    #[serde(default)]
    pub links: Vec<MemoryLink>,
}

impl MemoryUpdate {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// The persisted form: one append-only document per extraction event, the
/// graph fragment serialized so the record stays flat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub user_id: String,
    pub nodes: String,
    pub links: String,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn from_update(
        user_id: impl Into<String>,
        update: &MemoryUpdate,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            user_id: user_id.into(),
            nodes: serde_json::to_string(&update.nodes)?,
            links: serde_json::to_string(&update.links)?,
            created_at: now,
        })
    }
}

/// Find and deserialize the memory-update block in a reply. A reply without
/// the block is the common case and returns `Ok(None)`.
pub fn extract_memory_update(reply: &str) -> Result<Option<MemoryUpdate>, MemoryParseError> {
    let Some(open) = reply.find(MEMORY_OPEN_TAG) else {
        return Ok(None);
    };
    let body_start = open + MEMORY_OPEN_TAG.len();
    let Some(close) = reply[body_start..].find(MEMORY_CLOSE_TAG) else {
        return Err(MemoryParseError::Unterminated);
    };

    let body = reply[body_start..body_start + close].trim();
    let update: MemoryUpdate = serde_json::from_str(body)?;
    Ok(Some(update))
}
