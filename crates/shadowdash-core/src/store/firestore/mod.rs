//! Shadow store backed by the Firestore REST API.
//!
//! Transactions use `beginTransaction` + transactional read + `commit`; an
//! `ABORTED` read or commit is retried with a fresh transaction, any other
//! failure rolls the transaction back. Realtime listeners poll the document
//! and emit whenever its `updateTime` changes.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::{
    DocumentWrite, Mutator, ShadowStore, Snapshot, SnapshotStream, StoreError, StoreResult,
};
use crate::models::{merge_fields, resolve_server_timestamps, Fields, ShadowPath};
use crate::util::compact_text;

mod codec;

pub use codec::{decode_fields, encode_fields, merge_mask};

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
/// Same attempt budget as the managed client SDKs.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const LISTENER_BUFFER: usize = 16;

#[derive(Clone)]
pub struct FirestoreShadowStore {
    documents_url: String,
    database_name: String,
    client: Client,
    id_token: Arc<RwLock<Option<String>>>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl std::fmt::Debug for FirestoreShadowStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FirestoreShadowStore")
            .field("documents_url", &self.documents_url)
            .field("id_token", &"[REDACTED]")
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl FirestoreShadowStore {
    pub fn new(project_id: impl AsRef<str>) -> StoreResult<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, project_id)
    }

    /// Point the store at another endpoint, e.g. the local emulator
    /// (`http://localhost:8080/v1`).
    pub fn with_base_url(base_url: impl AsRef<str>, project_id: impl AsRef<str>) -> StoreResult<Self> {
        let base_url = base_url.as_ref().trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(StoreError::Api(
                "Firestore base URL must include http:// or https://".to_string(),
            ));
        }
        let project_id = project_id.as_ref().trim();
        if project_id.is_empty() || project_id.contains('/') {
            return Err(StoreError::Api(format!(
                "invalid Firestore project id '{project_id}'"
            )));
        }

        let database_name = format!("projects/{project_id}/databases/(default)/documents");
        Ok(Self {
            documents_url: format!(
                "{base_url}/projects/{}/databases/(default)/documents",
                urlencoding::encode(project_id)
            ),
            database_name,
            client: Client::builder().build()?,
            id_token: Arc::new(RwLock::new(None)),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(100));
        self
    }

    /// Bearer token attached to every request; `None` sends requests anonymously.
    pub fn set_id_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.id_token.write() {
            *guard = token;
        }
    }

    /// REST URL of a document; each path segment is percent-encoded so ids
    /// containing `?`, `#` or `%` still address their own document.
    pub fn document_url(&self, path: &ShadowPath) -> String {
        let segments = path
            .segments()
            .map(|segment| urlencoding::encode(segment).into_owned());
        format!("{}/{}", self.documents_url, segments.join("/"))
    }

    fn document_name(&self, path: &ShadowPath) -> String {
        format!("{}/{}", self.database_name, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.id_token.read().ok().and_then(|guard| guard.clone());
        match token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn fetch(&self, path: &ShadowPath, transaction: Option<&str>) -> StoreResult<Snapshot> {
        let mut request = self.client.get(self.document_url(path));
        if let Some(transaction) = transaction {
            request = request.query(&[("transaction", transaction)]);
        }

        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Snapshot::missing(path.clone()));
        }
        let document = read_json::<DocumentResponse>(response).await?;
        document.into_snapshot(path.clone())
    }

    async fn begin_transaction(&self) -> StoreResult<String> {
        let request = self
            .client
            .post(format!("{}:beginTransaction", self.documents_url))
            .json(&json!({ "options": { "readWrite": {} } }));
        let response = self.authorize(request).send().await?;
        Ok(read_json::<BeginTransactionResponse>(response).await?.transaction)
    }

    /// Release a transaction's locks; failures only mean the server lets it
    /// expire on its own.
    async fn rollback(&self, transaction: &str) {
        let request = self
            .client
            .post(format!("{}:rollback", self.documents_url))
            .json(&json!({ "transaction": transaction }));
        let result = match self.authorize(request).send().await {
            Ok(response) => read_json::<Value>(response).await.map(drop),
            Err(error) => Err(error.into()),
        };
        if let Err(error) = result {
            tracing::warn!("Failed to roll back Firestore transaction: {}", error);
        }
    }

    async fn attempt_transaction(
        &self,
        path: &ShadowPath,
        mutator: Mutator<'_>,
        transaction: &str,
    ) -> StoreResult<Snapshot> {
        let pre_image = self.fetch(path, Some(transaction)).await?;
        let write = mutator(&pre_image);
        self.commit(path, &pre_image, write, Some(transaction)).await
    }

    fn encode_write(&self, path: &ShadowPath, write: &DocumentWrite) -> Value {
        let (fields, transforms) = encode_fields(&write.fields);
        let mut encoded = Map::new();
        encoded.insert(
            "update".to_string(),
            json!({ "name": self.document_name(path), "fields": fields }),
        );
        if write.merge {
            encoded.insert(
                "updateMask".to_string(),
                json!({ "fieldPaths": merge_mask(&write.fields) }),
            );
        }
        if !transforms.is_empty() {
            let transforms = transforms
                .into_iter()
                .map(|field_path| json!({ "fieldPath": field_path, "setToServerValue": "REQUEST_TIME" }))
                .collect::<Vec<_>>();
            encoded.insert("updateTransforms".to_string(), Value::Array(transforms));
        }
        Value::Object(encoded)
    }

    async fn commit(
        &self,
        path: &ShadowPath,
        pre_image: &Snapshot,
        write: DocumentWrite,
        transaction: Option<&str>,
    ) -> StoreResult<Snapshot> {
        let mut body = Map::new();
        body.insert(
            "writes".to_string(),
            Value::Array(vec![self.encode_write(path, &write)]),
        );
        if let Some(transaction) = transaction {
            body.insert("transaction".to_string(), json!(transaction));
        }

        let request = self
            .client
            .post(format!("{}:commit", self.documents_url))
            .json(&Value::Object(body));
        let response = self.authorize(request).send().await?;
        let committed = read_json::<CommitResponse>(response).await?;
        let commit_time = codec::parse_timestamp(&committed.commit_time)?;

        // Rebuild the committed document locally instead of re-reading it.
        let DocumentWrite { mut fields, merge } = write;
        resolve_server_timestamps(&mut fields, commit_time);
        let fields = match (pre_image.fields.clone(), merge) {
            (Some(mut existing), true) => {
                merge_fields(&mut existing, fields);
                existing
            }
            _ => fields,
        };
        Ok(Snapshot {
            path: path.clone(),
            fields: Some(fields),
            update_time: Some(commit_time),
        })
    }
}

#[async_trait]
impl ShadowStore for FirestoreShadowStore {
    async fn get(&self, path: &ShadowPath) -> StoreResult<Snapshot> {
        self.fetch(path, None).await
    }

    async fn set(&self, path: &ShadowPath, write: DocumentWrite) -> StoreResult<Snapshot> {
        let pre_image = if write.merge {
            self.fetch(path, None).await?
        } else {
            Snapshot::missing(path.clone())
        };
        self.commit(path, &pre_image, write, None).await
    }

    async fn run_transaction(
        &self,
        path: &ShadowPath,
        mutator: Mutator<'_>,
    ) -> StoreResult<Snapshot> {
        for attempt in 1..=self.max_attempts {
            let transaction = self.begin_transaction().await?;
            match self.attempt_transaction(path, mutator, &transaction).await {
                Err(StoreError::Aborted(reason)) => {
                    tracing::debug!(
                        "Firestore transaction on {} aborted (attempt {}): {}",
                        path,
                        attempt,
                        reason
                    );
                }
                Err(error) => {
                    self.rollback(&transaction).await;
                    return Err(error);
                }
                committed => return committed,
            }
        }

        Err(StoreError::Contention {
            path: path.to_string(),
            attempts: self.max_attempts,
        })
    }

    fn listen(&self, path: &ShadowPath) -> StoreResult<SnapshotStream> {
        let (sender, receiver) = mpsc::channel(LISTENER_BUFFER);
        let store = self.clone();
        let path = path.clone();

        let task = tokio::spawn(async move {
            let mut last_seen = None;
            loop {
                match store.fetch(&path, None).await {
                    Ok(snapshot) => {
                        let marker = (snapshot.exists(), snapshot.update_time);
                        if last_seen != Some(marker) {
                            last_seen = Some(marker);
                            if sender.send(Ok(snapshot)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(error) => {
                        tracing::warn!("Polling listener for {} failed: {}", path, error);
                        let _ = sender
                            .send(Err(StoreError::Disconnected(format!("{path}: {error}"))))
                            .await;
                        return;
                    }
                }
                tokio::time::sleep(store.poll_interval).await;
            }
        });

        Ok(SnapshotStream::new(receiver, task))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentResponse {
    #[serde(default)]
    fields: Option<Map<String, Value>>,
    update_time: Option<String>,
}

impl DocumentResponse {
    fn into_snapshot(self, path: ShadowPath) -> StoreResult<Snapshot> {
        let fields = match self.fields {
            Some(raw) => decode_fields(&raw)?,
            None => Fields::new(),
        };
        let update_time = self
            .update_time
            .as_deref()
            .map(codec::parse_timestamp)
            .transpose()?;
        Ok(Snapshot {
            path,
            fields: Some(fields),
            update_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BeginTransactionResponse {
    transaction: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    commit_time: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> StoreResult<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(classify_error(status, &body))
}

fn classify_error(status: StatusCode, body: &str) -> StoreError {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);
    let code = parsed.as_ref().and_then(|error| error.status.clone());
    let message = parsed
        .and_then(|error| error.message)
        .unwrap_or_else(|| compact_text(body));

    match (status, code.as_deref()) {
        (_, Some("ABORTED")) | (StatusCode::CONFLICT, _) => StoreError::Aborted(message),
        (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => StoreError::Unauthenticated,
        (status, _) if status.is_server_error() => {
            StoreError::Unavailable(format!("{} ({})", message, status.as_u16()))
        }
        (status, _) if message.is_empty() => StoreError::Api(format!("HTTP {}", status.as_u16())),
        (status, _) => StoreError::Api(format!("{} ({})", message, status.as_u16())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::models::{DeviceId, FieldValue, ShadowSlot};

    type RequestLog = Arc<Mutex<Vec<String>>>;

    fn desired_path() -> ShadowPath {
        DeviceId::parse("luz_do_quarto")
            .unwrap()
            .path(ShadowSlot::Desired)
    }

    /// Serves `responses` in order, one connection each, and records every
    /// raw request.
    async fn spawn_scripted_server(responses: Vec<(&'static str, &'static str)>) -> (String, RequestLog) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test server");
        let address = listener.local_addr().expect("local address");
        let requests = RequestLog::default();
        let log = Arc::clone(&requests);

        tokio::spawn(async move {
            for (status_line, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let request = read_request(&mut socket).await;
                log.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{address}/v1"), requests)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 1024];
        while let Ok(read) = socket.read(&mut chunk).await {
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if raw.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    fn request_lines(requests: &RequestLog) -> Vec<String> {
        requests
            .lock()
            .unwrap()
            .iter()
            .map(|request| request.lines().next().unwrap_or_default().to_string())
            .collect()
    }

    fn switch_on(_: &Snapshot) -> DocumentWrite {
        let mut fields = Fields::new();
        fields.insert("on".to_string(), true.into());
        DocumentWrite::merge(fields)
    }

    #[test]
    fn reserved_characters_in_device_ids_stay_in_the_path() {
        let store = FirestoreShadowStore::with_base_url("http://localhost:8080/v1", "demo").unwrap();
        for id in ["sala?x", "sala#x", "sala%3Fx"] {
            let path = DeviceId::parse(id).unwrap().path(ShadowSlot::Desired);
            let url = reqwest::Url::parse(&store.document_url(&path)).unwrap();
            assert_eq!(url.query(), None, "{id}");
            assert_eq!(url.fragment(), None, "{id}");
            let segments = url.path_segments().unwrap().collect::<Vec<_>>();
            assert_eq!(
                urlencoding::decode(segments[segments.len() - 3]).unwrap(),
                id
            );
            assert_eq!(segments[segments.len() - 1], "desired");
        }
    }

    #[tokio::test]
    async fn reads_address_the_escaped_document() {
        let (base_url, requests) = spawn_scripted_server(vec![(
            "404 Not Found",
            r#"{"error":{"code":404,"message":"not found","status":"NOT_FOUND"}}"#,
        )])
        .await;
        let store = FirestoreShadowStore::with_base_url(&base_url, "demo").unwrap();
        let path = DeviceId::parse("sala?x").unwrap().path(ShadowSlot::Desired);

        let snapshot = store.get(&path).await.unwrap();

        assert!(!snapshot.exists());
        assert_eq!(
            request_lines(&requests),
            vec!["GET /v1/projects/demo/databases/(default)/documents/devices/sala%3Fx/shadow/desired HTTP/1.1"]
        );
    }

    #[tokio::test]
    async fn failed_commit_rolls_the_transaction_back() {
        let (base_url, requests) = spawn_scripted_server(vec![
            ("200 OK", r#"{"transaction":"dHgtMQ=="}"#),
            ("404 Not Found", r#"{"error":{"code":404,"status":"NOT_FOUND"}}"#),
            (
                "400 Bad Request",
                r#"{"error":{"code":400,"message":"bad write","status":"INVALID_ARGUMENT"}}"#,
            ),
            ("200 OK", "{}"),
        ])
        .await;
        let store = FirestoreShadowStore::with_base_url(&base_url, "demo").unwrap();

        let error = store
            .run_transaction(&desired_path(), &switch_on)
            .await
            .unwrap_err();

        assert!(matches!(error, StoreError::Api(message) if message.contains("bad write")));
        let lines = request_lines(&requests);
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("POST /v1/projects/demo/databases/(default)/documents:rollback "));
        assert!(requests.lock().unwrap()[3].contains("dHgtMQ=="));
    }

    #[tokio::test]
    async fn aborted_transactional_read_is_retried() {
        let (base_url, requests) = spawn_scripted_server(vec![
            ("200 OK", r#"{"transaction":"dHgtMQ=="}"#),
            (
                "409 Conflict",
                r#"{"error":{"code":409,"message":"Transaction lock timeout.","status":"ABORTED"}}"#,
            ),
            ("200 OK", r#"{"transaction":"dHgtMg=="}"#),
            (
                "200 OK",
                r#"{"fields":{"seq":{"integerValue":"5"}},"updateTime":"2024-05-01T12:00:00Z"}"#,
            ),
            ("200 OK", r#"{"commitTime":"2024-05-01T12:00:05Z"}"#),
        ])
        .await;
        let store = FirestoreShadowStore::with_base_url(&base_url, "demo").unwrap();

        let committed = store
            .run_transaction(&desired_path(), &switch_on)
            .await
            .unwrap();

        let fields = committed.fields.unwrap();
        assert_eq!(fields["on"], FieldValue::Bool(true));
        assert_eq!(fields["seq"], FieldValue::Integer(5));
        let lines = request_lines(&requests);
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|line| !line.contains(":rollback")));
        assert!(lines[3].contains("transaction=dHgtMg%3D%3D"));
    }

    #[test]
    fn document_url_includes_project_and_path() {
        let store = FirestoreShadowStore::new("projeto-teste").unwrap();
        assert_eq!(
            store.document_url(&desired_path()),
            "https://firestore.googleapis.com/v1/projects/projeto-teste/databases/(default)/documents/devices/luz_do_quarto/shadow/desired"
        );
    }

    #[test]
    fn rejects_invalid_configuration() {
        assert!(FirestoreShadowStore::new("  ").is_err());
        assert!(FirestoreShadowStore::with_base_url("localhost:8080", "demo").is_err());
    }

    #[test]
    fn merge_write_carries_mask_and_transforms() {
        let store = FirestoreShadowStore::with_base_url("http://localhost:8080/v1/", "demo").unwrap();
        let mut fields = Fields::new();
        fields.insert("on".to_string(), true.into());
        fields.insert("updatedAt".to_string(), FieldValue::ServerTimestamp);

        let encoded = store.encode_write(&desired_path(), &DocumentWrite::merge(fields));
        assert_eq!(
            encoded["update"]["name"],
            "projects/demo/databases/(default)/documents/devices/luz_do_quarto/shadow/desired"
        );
        assert_eq!(encoded["updateMask"]["fieldPaths"], json!(["on"]));
        assert_eq!(
            encoded["updateTransforms"],
            json!([{ "fieldPath": "updatedAt", "setToServerValue": "REQUEST_TIME" }])
        );
    }

    #[test]
    fn api_errors_are_classified() {
        let body = r#"{"error":{"code":409,"message":"Transaction lock timeout.","status":"ABORTED"}}"#;
        assert!(matches!(
            classify_error(StatusCode::CONFLICT, body),
            StoreError::Aborted(_)
        ));
        assert!(matches!(
            classify_error(StatusCode::FORBIDDEN, "{}"),
            StoreError::Unauthenticated
        ));
        assert!(matches!(
            classify_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn document_response_decodes_snapshot() {
        let raw = r#"{
            "name": "projects/demo/databases/(default)/documents/devices/luz_do_quarto/shadow/desired",
            "fields": { "on": { "booleanValue": false }, "seq": { "integerValue": "5" } },
            "createTime": "2024-05-01T12:00:00Z",
            "updateTime": "2024-05-01T12:00:03Z"
        }"#;
        let document = serde_json::from_str::<DocumentResponse>(raw).unwrap();
        let snapshot = document.into_snapshot(desired_path()).unwrap();
        let fields = snapshot.fields.unwrap();
        assert_eq!(fields["seq"], FieldValue::Integer(5));
        assert!(snapshot.update_time.is_some());
    }
}
