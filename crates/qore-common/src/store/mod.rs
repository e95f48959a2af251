pub mod client;
pub mod credentials;
pub mod fields;
pub mod token;

pub use client::{DocStore, Document, FieldFilter, StoreConfig, StoreError};
pub use credentials::{CredentialConfigError, ServiceAccountKey};
pub use fields::{decode_fields, encode_fields, FieldCodecError};
pub use token::{Clock, SystemClock, TokenBroker, TokenError};

/// Upstream error bodies are attached to errors for debugging but capped so a
/// verbose provider response cannot flood logs or API error payloads.
pub(crate) const ERROR_DETAIL_LIMIT: usize = 500;

pub(crate) fn truncate_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= ERROR_DETAIL_LIMIT {
        return trimmed.to_string();
    }
    trimmed.chars().take(ERROR_DETAIL_LIMIT).collect()
}
