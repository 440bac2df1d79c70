//! Firestore REST backend.
//!
//! Lists `projects/{project}/databases/{database}/documents/{collection}`
//! page by page and deletes documents one at a time. Chat documents carry
//! `participants` (array of strings) and `createdAt` (timestamp).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::{ChatStore, StoreError};
use crate::config::FirestoreConfig;
use crate::models::ChatRecord;

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

// ============================================================================
// Firestore API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorResponse {
    error: Option<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// FirestoreChatStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct FirestoreChatStore {
    client: Client,
    config: FirestoreConfig,
    base_url: String,
}

impl FirestoreChatStore {
    /// Production constructor. Missing credentials and emulator host fall back
    /// to `FIREBASE_API_KEY`, `FIRESTORE_ACCESS_TOKEN` and `FIRESTORE_EMULATOR_HOST`.
    pub fn new(mut config: FirestoreConfig) -> Result<Self, StoreError> {
        config.api_key = config
            .api_key
            .or_else(|| std::env::var("FIREBASE_API_KEY").ok());
        config.access_token = config
            .access_token
            .or_else(|| std::env::var("FIRESTORE_ACCESS_TOKEN").ok());
        config.emulator_host = config
            .emulator_host
            .or_else(|| std::env::var("FIRESTORE_EMULATOR_HOST").ok());

        let base_url = match &config.emulator_host {
            Some(host) => format!("http://{}/v1", host.trim_end_matches('/')),
            None => FIRESTORE_BASE_URL.to_string(),
        };

        Self::with_base_url(config, base_url)
    }

    /// Create a store against a custom base URL (for testing / integration)
    pub fn with_base_url(config: FirestoreConfig, base_url: String) -> Result<Self, StoreError> {
        if config.project_id.is_empty() {
            return Err(StoreError::InvalidConfig(
                "firestore.project_id is required".to_string(),
            ));
        }
        if config.page_size == 0 {
            return Err(StoreError::InvalidConfig(
                "firestore.page_size must be positive".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn collection_url(&self) -> String {
        format!(
            "{}/projects/{}/databases/{}/documents/{}",
            self.base_url,
            self.config.project_id,
            self.config.database,
            self.config.collection_path()
        )
    }

    /// URL of one document. The id is pushed as a single percent-encoded
    /// path segment, so `?`, `#` and `%` in ids stay part of the id.
    pub fn document_url(&self, id: &str) -> Result<Url, StoreError> {
        let collection_url = self.collection_url();
        let mut url = Url::parse(&collection_url).map_err(|e| {
            StoreError::InvalidConfig(format!("bad Firestore URL {collection_url}: {e}"))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                StoreError::InvalidConfig(format!("Firestore URL {collection_url} cannot have a path"))
            })?
            .push(id);
        Ok(url)
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.query(&[("key", key)]);
        }
        if let Some(token) = self.config.access_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn fetch_page(
        &self,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse, StoreError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = RetryIf::spawn(
            retry_strategy,
            || self.fetch_page_once(page_token),
            |e: &StoreError| e.is_transient(),
        )
        .await;

        match result {
            Ok(page) => Ok(page),
            Err(e) if e.is_transient() => {
                tracing::error!(
                    attempts = self.config.max_retries + 1,
                    error = %e,
                    "All Firestore list attempts failed"
                );
                Err(StoreError::RetryExhausted {
                    attempts: self.config.max_retries + 1,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_page_once(
        &self,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse, StoreError> {
        let page_size = self.config.page_size.to_string();
        let mut request = self
            .client
            .get(self.collection_url())
            .query(&[("pageSize", page_size.as_str())]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = self.authorize(request).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatStore for FirestoreChatStore {
    async fn fetch_all(&self) -> Result<Vec<ChatRecord>, StoreError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.fetch_page(page_token.as_deref()).await?;
            pages += 1;
            records.extend(page.documents.into_iter().map(decode_document));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(
            pages = pages,
            records = records.len(),
            collection = %self.config.collection_path(),
            "Firestore scan complete"
        );

        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let url = self.document_url(id)?;
        let response = self.authorize(self.client.delete(url)).send().await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "firestore"
    }
}

// ============================================================================
// Decoding helpers
// ============================================================================

async fn api_error(response: Response) -> StoreError {
    let status = response.status();
    let error_body = response.text().await.unwrap_or_default();
    let error_detail = serde_json::from_str::<GoogleErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error);

    let (code, message) = error_detail
        .map(|e| (e.code, e.message))
        .unwrap_or((status.as_u16(), error_body));

    tracing::warn!(code = code, message = %message, "Firestore API error");

    StoreError::Api { code, message }
}

fn decode_document(doc: FirestoreDocument) -> ChatRecord {
    let id = doc.name.rsplit('/').next().unwrap_or_default().to_string();

    let participants = doc
        .fields
        .get("participants")
        .and_then(|v| v.get("arrayValue"))
        .and_then(|a| a.get("values"))
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(participant_id).collect())
        .unwrap_or_default();

    let created_at = doc.fields.get("createdAt").and_then(decode_timestamp);

    ChatRecord {
        id,
        participants,
        created_at,
    }
}

/// `stringValue` ids, plus `integerValue` ids rendered as their decimal string.
fn participant_id(value: &Value) -> Option<String> {
    value
        .get("stringValue")
        .or_else(|| value.get("integerValue"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `timestampValue` (RFC 3339), or epoch millis as `integerValue` / `doubleValue`.
fn decode_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.get("timestampValue").and_then(Value::as_str) {
        return match DateTime::parse_from_rfc3339(s) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(e) => {
                tracing::debug!(value = s, error = %e, "Unparseable createdAt timestamp");
                None
            }
        };
    }

    let millis = if let Some(s) = value.get("integerValue").and_then(Value::as_str) {
        s.parse::<i64>().ok()
    } else {
        value
            .get("doubleValue")
            .and_then(Value::as_f64)
            .map(|f| f as i64)
    };

    millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COLLECTION_PATH: &str =
        "/projects/test-project/databases/(default)/documents/artifacts/academic-matchmaker/public/data/chats";

    fn test_config() -> FirestoreConfig {
        FirestoreConfig {
            project_id: "test-project".to_string(),
            page_size: 2,
            max_retries: 2,
            retry_delay_ms: 10,
            ..Default::default()
        }
    }

    fn doc(id: &str, participants: &[&str], created_at: Option<&str>) -> Value {
        let values: Vec<Value> = participants
            .iter()
            .map(|p| json!({ "stringValue": p }))
            .collect();
        let mut fields = json!({
            "participants": { "arrayValue": { "values": values } }
        });
        if let Some(ts) = created_at {
            fields["createdAt"] = json!({ "timestampValue": ts });
        }
        json!({
            "name": format!("projects/test-project/databases/(default)/documents/artifacts/academic-matchmaker/public/data/chats/{id}"),
            "fields": fields,
            "createTime": "2024-01-01T00:00:00Z",
            "updateTime": "2024-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_fetch_all_follows_page_tokens() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(path(COLLECTION_PATH))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [doc("c3", &["carol", "dave"], None)]
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(COLLECTION_PATH))
            .and(query_param("pageSize", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [
                    doc("c1", &["alice", "bob"], Some("2024-03-01T12:00:00.500Z")),
                    doc("c2", &["bob", "alice"], Some("2024-02-01T00:00:00Z"))
                ],
                "nextPageToken": "page-2"
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        let records = store.fetch_all().await.unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(records[0].participants, vec!["alice", "bob"]);
        assert_eq!(
            records[0].created_at.map(|t| t.timestamp_millis()),
            Some(1_709_294_400_500)
        );
        assert!(records[2].created_at.is_none());
    }

    #[tokio::test]
    async fn test_fetch_all_handles_empty_collection() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&mock_server)
            .await;

        assert!(store.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_sends_api_key_and_bearer_token() {
        let mock_server = MockServer::start().await;
        let config = FirestoreConfig {
            api_key: Some("test-key".to_string()),
            access_token: Some("test-token".to_string()),
            ..test_config()
        };
        let store = FirestoreChatStore::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(query_param("key", "test-key"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [doc("c1", &["alice", "bob"], None)]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        assert_eq!(store.fetch_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_retries_on_503_then_succeeds() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": { "code": 503, "message": "Service unavailable" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [doc("c1", &["alice", "bob"], None)]
            })))
            .mount(&mock_server)
            .await;

        assert_eq!(store.fetch_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_exhausts_retries_on_persistent_500() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "code": 500, "message": "boom" }
            })))
            .expect(3)
            .mount(&mock_server)
            .await;

        match store.fetch_all().await {
            Err(StoreError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(last.contains("boom"));
            }
            other => panic!("Expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_permission_denied() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": { "code": 403, "message": "Missing or insufficient permissions." }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match store.fetch_all().await {
            Err(StoreError::Api { code, message }) => {
                assert_eq!(code, 403);
                assert_eq!(message, "Missing or insufficient permissions.");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_targets_document_url() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("DELETE"))
            .and(path(format!("{COLLECTION_PATH}/chat-42")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&mock_server)
            .await;

        store.delete("chat-42").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_encodes_reserved_characters_in_id() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        for encoded in ["keep%3Fdup", "keep%23dup", "keep%25dup"] {
            Mock::given(method("DELETE"))
                .and(path(format!("{COLLECTION_PATH}/{encoded}")))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
                .expect(1)
                .mount(&mock_server)
                .await;
        }
        Mock::given(method("DELETE"))
            .and(path(format!("{COLLECTION_PATH}/keep")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&mock_server)
            .await;

        store.delete("keep?dup").await.unwrap();
        store.delete("keep#dup").await.unwrap();
        store.delete("keep%dup").await.unwrap();

        let url = store.document_url("keep?dup").unwrap();
        assert!(url.query().is_none());
        assert!(url.path().ends_with("/chats/keep%3Fdup"));
    }

    #[test]
    fn test_emulator_host_switches_base_url() {
        let config = FirestoreConfig {
            emulator_host: Some("localhost:8080/".to_string()),
            collection: Some("chats".to_string()),
            ..test_config()
        };

        let store = FirestoreChatStore::new(config).unwrap();

        assert_eq!(
            store.collection_url(),
            "http://localhost:8080/v1/projects/test-project/databases/(default)/documents/chats"
        );
    }

    #[tokio::test]
    async fn test_delete_error_is_not_retried() {
        let mock_server = MockServer::start().await;
        let store =
            FirestoreChatStore::with_base_url(test_config(), mock_server.uri()).unwrap();

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .expect(1)
            .mount(&mock_server)
            .await;

        match store.delete("chat-42").await {
            Err(StoreError::Api { code, message }) => {
                assert_eq!(code, 503);
                assert_eq!(message, "upstream down");
            }
            other => panic!("Expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_project_is_rejected() {
        let config = FirestoreConfig::default();
        assert!(matches!(
            FirestoreChatStore::with_base_url(config, "http://localhost".to_string()),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_decode_document_variants() {
        let document: FirestoreDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/chats/abc",
            "fields": {
                "participants": { "arrayValue": { "values": [
                    { "stringValue": "alice" },
                    { "integerValue": "42" }
                ] } },
                "createdAt": { "integerValue": "1700000000000" }
            }
        }))
        .unwrap();

        let record = decode_document(document);
        assert_eq!(record.id, "abc");
        assert_eq!(record.participants, vec!["alice", "42"]);
        assert_eq!(
            record.created_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_decode_document_without_fields() {
        let document: FirestoreDocument = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/chats/empty"
        }))
        .unwrap();

        let record = decode_document(document);
        assert_eq!(record.id, "empty");
        assert!(record.participants.is_empty());
        assert!(record.created_at.is_none());
    }

    #[test]
    fn test_decode_timestamp_null_and_garbage() {
        assert!(decode_timestamp(&json!({ "nullValue": null })).is_none());
        assert!(decode_timestamp(&json!({ "timestampValue": "yesterday" })).is_none());
        assert_eq!(
            decode_timestamp(&json!({ "doubleValue": 1500.0 })).map(|t| t.timestamp_millis()),
            Some(1500)
        );
    }
}
