use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::instrument;

use super::fields::{decode_fields, encode_fields, FieldCodecError};
use super::token::{TokenBroker, TokenError};
use super::truncate_detail;

pub const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_DATABASE_ID: &str = "(default)";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("document conflict: {0}")]
    Conflict(String),
    #[error("document store rejected request ({status}): {detail}")]
    Status { status: u16, detail: String },
    #[error("document store unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode store response: {0}")]
    Decode(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Codec(#[from] FieldCodecError),
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub project_id: String,
    pub database_id: String,
    pub base_url: String,
}

impl StoreConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: DEFAULT_DATABASE_ID.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// A document as returned by the store: decoded plain fields plus the server
/// `updateTime`, which doubles as the optimistic-concurrency version for
/// conditional patches.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub fields: Map<String, Value>,
    pub update_time: Option<String>,
}

impl Document {
    pub fn doc_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

impl FieldFilter {
    pub fn equal(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

#[derive(Deserialize)]
struct WireDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(rename = "updateTime")]
    update_time: Option<String>,
}

/// Minimal REST binding over the credential exchange for one
/// project + database namespace. Every call fetches a bearer token from the
/// broker (served from cache on the hot path) and surfaces non-2xx statuses
/// as errors with truncated upstream detail. No retries happen here; callers
/// own that decision.
pub struct DocStore {
    http: reqwest::Client,
    config: StoreConfig,
    tokens: Arc<TokenBroker>,
}

impl DocStore {
    pub fn new(config: StoreConfig, tokens: Arc<TokenBroker>, http: reqwest::Client) -> Self {
        Self {
            http,
            config,
            tokens,
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents",
            self.config.base_url, self.config.project_id, self.config.database_id
        )
    }

    /// Fetch a single document by collection-relative path
    /// (e.g. `job_queue/01JB...`).
    #[instrument(skip(self))]
    pub async fn get_document(&self, path: &str) -> Result<Document, StoreError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/{}", self.documents_root(), path);

        let response = self.http.get(&url).bearer_auth(token).send().await?;
        let response = check_status(path, response).await?;
        decode_document(response).await
    }

    /// Insert a document with an explicit id; an existing document with the
    /// same id surfaces as `StoreError::Conflict`.
    #[instrument(skip(self, fields))]
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Document, StoreError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/{}", self.documents_root(), collection);
        let body = serde_json::json!({ "fields": encode_fields(fields)? });

        let response = self
            .http
            .post(&url)
            .query(&[("documentId", doc_id)])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let response = check_status(&format!("{collection}/{doc_id}"), response).await?;
        decode_document(response).await
    }

    /// Partial-field patch: only the supplied fields are overwritten. When
    /// `expected_update_time` is set, the store applies the patch only if the
    /// document is still at that version; a lost race surfaces as
    /// `StoreError::Conflict`.
    #[instrument(skip(self, fields))]
    pub async fn patch_document(
        &self,
        path: &str,
        fields: &Map<String, Value>,
        expected_update_time: Option<&str>,
    ) -> Result<Document, StoreError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}/{}", self.documents_root(), path);

        let mut query: Vec<(&str, String)> = fields
            .keys()
            .map(|name| ("updateMask.fieldPaths", name.clone()))
            .collect();
        if let Some(update_time) = expected_update_time {
            query.push(("currentDocument.updateTime", update_time.to_string()));
        }

        let body = serde_json::json!({ "fields": encode_fields(fields)? });

        let response = self
            .http
            .patch(&url)
            .query(&query)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let response = check_status(path, response).await?;
        decode_document(response).await
    }

    /// Structured query: AND-composed equality filters, ordered by
    /// `created_at` ascending, limited to one result. The single-result limit
    /// is a fixed design choice (the queue only ever wants "the oldest
    /// match"), not a tunable.
    #[instrument(skip(self))]
    pub async fn query_oldest(
        &self,
        collection: &str,
        filters: &[FieldFilter],
    ) -> Result<Option<Document>, StoreError> {
        let token = self.tokens.bearer_token().await?;
        let url = format!("{}:runQuery", self.documents_root());

        let wire_filters = filters
            .iter()
            .map(|filter| {
                Ok(serde_json::json!({
                    "fieldFilter": {
                        "field": { "fieldPath": filter.field },
                        "op": "EQUAL",
                        "value": encode_single(&filter.value, &filter.field)?,
                    }
                }))
            })
            .collect::<Result<Vec<_>, FieldCodecError>>()?;

        let where_clause = match wire_filters.len() {
            0 => None,
            1 => Some(wire_filters.into_iter().next().unwrap_or_default()),
            _ => Some(serde_json::json!({
                "compositeFilter": { "op": "AND", "filters": wire_filters }
            })),
        };

        let mut structured_query = serde_json::json!({
            "from": [{ "collectionId": collection }],
            "orderBy": [{
                "field": { "fieldPath": "created_at" },
                "direction": "ASCENDING",
            }],
            "limit": 1,
        });
        if let Some(clause) = where_clause {
            structured_query["where"] = clause;
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "structuredQuery": structured_query }))
            .send()
            .await?;
        let response = check_status(collection, response).await?;

        let entries: Vec<Value> = response
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;

        // Entries without a `document` key are read-time markers.
        for entry in entries {
            if let Some(document) = entry.get("document") {
                let wire: WireDocument = serde_json::from_value(document.clone())
                    .map_err(|err| StoreError::Decode(err.to_string()))?;
                return Ok(Some(from_wire(wire)?));
            }
        }

        Ok(None)
    }
}

fn encode_single(value: &Value, path: &str) -> Result<Value, FieldCodecError> {
    let mut record = Map::with_capacity(1);
    record.insert(path.to_string(), value.clone());
    let mut encoded = encode_fields(&record)?;
    Ok(encoded.remove(path).unwrap_or(Value::Null))
}

async fn check_status(
    context: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let detail = truncate_detail(&response.text().await.unwrap_or_default());
    Err(match status.as_u16() {
        404 => StoreError::NotFound(format!("{context}: {detail}")),
        409 => StoreError::Conflict(format!("{context}: {detail}")),
        400 if detail.contains("FAILED_PRECONDITION") => {
            StoreError::Conflict(format!("{context}: {detail}"))
        }
        code => StoreError::Status {
            status: code,
            detail,
        },
    })
}

async fn decode_document(response: reqwest::Response) -> Result<Document, StoreError> {
    let wire: WireDocument = response
        .json()
        .await
        .map_err(|err| StoreError::Decode(err.to_string()))?;
    from_wire(wire)
}

fn from_wire(wire: WireDocument) -> Result<Document, StoreError> {
    Ok(Document {
        name: wire.name,
        fields: decode_fields(&wire.fields)?,
        update_time: wire.update_time,
    })
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::store::testutil::test_service_account;
    use crate::store::token::SystemClock;

    const DOCS_PREFIX: &str = "/projects/unique-ue/databases/(default)/documents";

    async fn store_for(server: &mockito::Server) -> DocStore {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenBroker::with_endpoints(
            test_service_account(),
            http.clone(),
            format!("{}/token", server.url()),
            Arc::new(SystemClock),
        ));
        DocStore::new(
            StoreConfig::new("unique-ue").with_base_url(server.url()),
            tokens,
            http,
        )
    }

    async fn mock_token(server: &mut mockito::Server) -> mockito::Mock {
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "access_token": "tok", "expires_in": 3600 }).to_string())
            .create_async()
            .await
    }

    fn wire_doc(doc_id: &str, status: &str, update_time: &str) -> Value {
        json!({
            "name": format!("projects/unique-ue/databases/(default)/documents/job_queue/{doc_id}"),
            "fields": {
                "job_id": { "stringValue": doc_id },
                "status": { "stringValue": status },
                "attempt_count": { "integerValue": "0" }
            },
            "updateTime": update_time,
        })
    }

    #[tokio::test]
    async fn get_document_decodes_fields_and_update_time() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("GET", format!("{DOCS_PREFIX}/job_queue/job-1").as_str())
            .with_status(200)
            .with_body(wire_doc("job-1", "pending", "2025-08-05T12:00:00.000001Z").to_string())
            .create_async()
            .await;

        let store = store_for(&server).await;
        let doc = store.get_document("job_queue/job-1").await.unwrap();

        assert_eq!(doc.doc_id(), "job-1");
        assert_eq!(doc.fields["status"], json!("pending"));
        assert_eq!(doc.fields["attempt_count"], json!(0));
        assert_eq!(
            doc.update_time.as_deref(),
            Some("2025-08-05T12:00:00.000001Z")
        );
    }

    #[tokio::test]
    async fn missing_document_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("GET", format!("{DOCS_PREFIX}/job_queue/nope").as_str())
            .with_status(404)
            .with_body("document missing")
            .create_async()
            .await;

        let store = store_for(&server).await;
        let err = store.get_document("job_queue/nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_sends_explicit_document_id_and_maps_conflicts() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        let create = server
            .mock("POST", format!("{DOCS_PREFIX}/job_queue").as_str())
            .match_query(Matcher::UrlEncoded("documentId".into(), "job-1".into()))
            .match_body(Matcher::PartialJson(json!({
                "fields": { "status": { "stringValue": "pending" } }
            })))
            .with_status(200)
            .with_body(wire_doc("job-1", "pending", "2025-08-05T12:00:00Z").to_string())
            .create_async()
            .await;

        let store = store_for(&server).await;
        let fields = json!({ "job_id": "job-1", "status": "pending" })
            .as_object()
            .cloned()
            .unwrap();
        store
            .create_document("job_queue", "job-1", &fields)
            .await
            .unwrap();
        create.assert_async().await;

        server
            .mock("POST", format!("{DOCS_PREFIX}/job_queue").as_str())
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body("ALREADY_EXISTS")
            .create_async()
            .await;

        let err = store
            .create_document("job_queue", "job-1", &fields)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn patch_carries_update_mask_and_precondition() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        let patch = server
            .mock("PATCH", format!("{DOCS_PREFIX}/job_queue/job-1").as_str())
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("updateMask.fieldPaths".into(), "status".into()),
                Matcher::UrlEncoded(
                    "currentDocument.updateTime".into(),
                    "2025-08-05T12:00:00Z".into(),
                ),
            ]))
            .with_status(200)
            .with_body(wire_doc("job-1", "processing", "2025-08-05T12:00:01Z").to_string())
            .create_async()
            .await;

        let store = store_for(&server).await;
        let fields = json!({ "status": "processing" }).as_object().cloned().unwrap();
        let doc = store
            .patch_document("job_queue/job-1", &fields, Some("2025-08-05T12:00:00Z"))
            .await
            .unwrap();

        assert_eq!(doc.fields["status"], json!("processing"));
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn stale_precondition_maps_to_conflict() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("PATCH", format!("{DOCS_PREFIX}/job_queue/job-1").as_str())
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body("ABORTED: the stored version of the document changed")
            .create_async()
            .await;

        let store = store_for(&server).await;
        let fields = json!({ "status": "processing" }).as_object().cloned().unwrap();
        let err = store
            .patch_document("job_queue/job-1", &fields, Some("2025-08-05T12:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn query_oldest_builds_filters_and_skips_bare_read_times() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        let query = server
            .mock("POST", format!("{DOCS_PREFIX}:runQuery").as_str())
            .match_body(Matcher::PartialJson(json!({
                "structuredQuery": {
                    "from": [{ "collectionId": "job_queue" }],
                    "where": {
                        "fieldFilter": {
                            "field": { "fieldPath": "status" },
                            "op": "EQUAL",
                            "value": { "stringValue": "pending" }
                        }
                    },
                    "limit": 1
                }
            })))
            .with_status(200)
            .with_body(
                json!([
                    { "readTime": "2025-08-05T12:00:02Z" },
                    {
                        "document": wire_doc("job-2", "pending", "2025-08-05T12:00:00Z"),
                        "readTime": "2025-08-05T12:00:02Z"
                    }
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let store = store_for(&server).await;
        let found = store
            .query_oldest(
                "job_queue",
                &[FieldFilter::equal("status", json!("pending"))],
            )
            .await
            .unwrap();

        let doc = found.expect("query should surface the pending document");
        assert_eq!(doc.doc_id(), "job-2");
        query.assert_async().await;
    }

    #[tokio::test]
    async fn query_oldest_returns_none_on_empty_result() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("POST", format!("{DOCS_PREFIX}:runQuery").as_str())
            .with_status(200)
            .with_body(json!([{ "readTime": "2025-08-05T12:00:02Z" }]).to_string())
            .create_async()
            .await;

        let store = store_for(&server).await;
        let found = store
            .query_oldest(
                "job_queue",
                &[FieldFilter::equal("status", json!("pending"))],
            )
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn upstream_errors_carry_truncated_detail() {
        let mut server = mockito::Server::new_async().await;
        mock_token(&mut server).await;
        server
            .mock("GET", format!("{DOCS_PREFIX}/job_queue/job-1").as_str())
            .with_status(503)
            .with_body("b".repeat(2_000))
            .create_async()
            .await;

        let store = store_for(&server).await;
        let err = store.get_document("job_queue/job-1").await.unwrap_err();
        match err {
            StoreError::Status { status, detail } => {
                assert_eq!(status, 503);
                assert_eq!(detail.chars().count(), 500);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
