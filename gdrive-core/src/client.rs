use std::path::Path;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

const ENTRY_FIELDS: &str = "id,name,mimeType,md5Checksum,size";
const LIST_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("upload session response carries no location")]
    MissingUploadSession,
    #[error("upload finished without a file entry")]
    EmptyUpload,
    #[error("operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Lists every child of a folder, folders and files alike, following
    /// `nextPageToken` until the listing is exhausted.
    pub async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveEntry>, DriveError> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(&query, page_token.as_deref()).await?;
            entries.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(entries)
    }

    pub async fn create_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<DriveEntry, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut().append_pair("fields", ENTRY_FIELDS);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Looks up a folder with this exact name under the parent without
    /// creating anything.
    pub async fn find_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<DriveEntry>, DriveError> {
        let query = format!(
            "'{}' in parents and name = '{}' and mimeType = '{}' and trashed = false",
            escape_query(parent_id),
            escape_query(name),
            FOLDER_MIME_TYPE
        );
        let page = self.list_page(&query, None).await?;
        Ok(page.files.into_iter().next())
    }

    /// Get-or-create: returns the existing folder with this exact name under
    /// the parent when present, otherwise creates it.
    pub async fn ensure_folder_created(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<DriveEntry, DriveError> {
        if let Some(existing) = self.find_folder(parent_id, name).await? {
            return Ok(existing);
        }
        self.create_folder(parent_id, name).await
    }

    /// Uploads a local file under the given parent via a resumable upload
    /// session, streaming the file body. Aborts as soon as `cancel` fires.
    pub async fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<DriveEntry, DriveError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(DriveError::Cancelled),
            result = self.upload_file_inner(parent_id, name, source) => result,
        }
    }

    async fn upload_file_inner(
        &self,
        parent_id: &str,
        name: &str,
        source: &Path,
    ) -> Result<DriveEntry, DriveError> {
        let mut url = self.endpoint("/upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "resumable")
            .append_pair("fields", ENTRY_FIELDS);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&serde_json::json!({
                "name": name,
                "parents": [parent_id],
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, body });
        }
        let session_url = response
            .headers()
            .get("location")
            .and_then(|value| value.to_str().ok())
            .ok_or(DriveError::MissingUploadSession)?
            .to_string();

        let size = tokio::fs::metadata(source).await?.len();
        let file = tokio::fs::File::open(source).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .http
            .put(Url::parse(&session_url)?)
            .header("Authorization", self.auth_header_value())
            .header("Content-Length", size)
            .body(body)
            .send()
            .await?;
        let entry: DriveEntry = Self::handle_response(response).await?;
        if entry.id.is_empty() {
            return Err(DriveError::EmptyUpload);
        }
        Ok(entry)
    }

    /// Fetches a file's content. Used by verification tooling, not the sync
    /// path itself.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, DriveError> {
        let mut url = self.endpoint(&format!("/drive/v3/files/{file_id}"))?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::Api { status, body });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<EntryPage, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            pairs.append_pair("pageSize", &LIST_PAGE_SIZE.to_string());
            pairs.append_pair("fields", &format!("nextPageToken,files({ENTRY_FIELDS})"));
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// Drive query literals put string values in single quotes with backslash
// escaping.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
}

impl DriveEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryPage {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<DriveEntry>,
}

// The v3 API reports `size` as a decimal string.
fn deserialize_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(value)) => Ok(Some(value)),
        Some(Raw::Text(value)) => value
            .parse::<u64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_client(server: &MockServer) -> DriveClient {
        DriveClient::with_base_url(&server.uri(), "test-token").unwrap()
    }

    #[tokio::test]
    async fn list_children_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'p1' in parents and trashed = false"))
            .and(query_param_is_missing("pageToken"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "nextPageToken": "cursor-2",
                "files": [
                    {"id": "f1", "name": "a.txt", "mimeType": "text/plain", "md5Checksum": "aa", "size": "5"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("pageToken", "cursor-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    {"id": "d1", "name": "Sub", "mimeType": FOLDER_MIME_TYPE}
                ]
            })))
            .mount(&server)
            .await;

        let entries = make_client(&server).list_children("p1").await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "f1");
        assert_eq!(entries[0].size, Some(5));
        assert!(!entries[0].is_folder());
        assert!(entries[1].is_folder());
    }

    #[tokio::test]
    async fn ensure_folder_returns_existing_entry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                format!(
                    "'root' in parents and name = 'Docs' and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false"
                ),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [{"id": "d1", "name": "Docs", "mimeType": FOLDER_MIME_TYPE}]
            })))
            .mount(&server)
            .await;

        let entry = make_client(&server)
            .ensure_folder_created("root", "Docs")
            .await
            .unwrap();

        assert_eq!(entry.id, "d1");
    }

    #[tokio::test]
    async fn find_folder_returns_none_on_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})),
            )
            .mount(&server)
            .await;

        let found = make_client(&server).find_folder("root", "Docs").await.unwrap();

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn ensure_folder_creates_on_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"files": []})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "d2", "name": "Docs", "mimeType": FOLDER_MIME_TYPE
            })))
            .mount(&server)
            .await;

        let entry = make_client(&server)
            .ensure_folder_created("root", "Docs")
            .await
            .unwrap();

        assert_eq!(entry.id, "d2");
        assert!(entry.is_folder());
    }

    #[tokio::test]
    async fn upload_streams_file_and_returns_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "resumable"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("location", format!("{}/session/1", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session/1"))
            .and(wiremock::matchers::body_bytes(b"payload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "f9", "name": "in.bin", "mimeType": "application/octet-stream",
                "md5Checksum": "321c3cf486ed509164edec1e1981fec8", "size": "7"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();

        let entry = make_client(&server)
            .upload_file("p1", "in.bin", &source, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(entry.id, "f9");
        assert_eq!(entry.size, Some(7));
    }

    #[tokio::test]
    async fn upload_without_entry_in_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("location", format!("{}/session/2", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/session/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();

        let err = make_client(&server)
            .upload_file("p1", "in.bin", &source, &CancellationToken::new())
            .await
            .expect_err("expected empty upload error");

        assert!(matches!(err, DriveError::EmptyUpload));
    }

    #[tokio::test]
    async fn upload_aborts_when_already_cancelled() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = make_client(&server)
            .upload_file("p1", "in.bin", &source, &cancel)
            .await
            .expect_err("expected cancellation");

        assert!(matches!(err, DriveError::Cancelled));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_file_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/f1"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let bytes = make_client(&server).download_file("f1").await.unwrap();

        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn server_errors_classify_as_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = make_client(&server)
            .list_children("p1")
            .await
            .expect_err("expected api error");

        assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
        assert!(err.is_retryable());
    }

    #[test]
    fn query_values_are_escaped() {
        assert_eq!(escape_query("it's"), "it\\'s");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }
}
