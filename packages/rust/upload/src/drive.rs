//! Google Drive upload sink.
//!
//! Uses the v3 multipart upload endpoint: one `multipart/related` request
//! carrying the JSON metadata (name, parent folder) and the file bytes.
//! Obtaining the OAuth access token is not handled here; it is read from the
//! environment variable named in config.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use duplexscan_shared::{AppConfig, DuplexScanError, Result, drive_access_token};

use crate::{UploadSink, mime_type_for};

/// User-Agent string for Drive requests.
const USER_AGENT: &str = concat!("duplexscan/", env!("CARGO_PKG_VERSION"));

/// Drive's MIME type for folders.
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Page size used when listing folders.
const FOLDER_PAGE_SIZE: &str = "1000";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileMetadata<'a> {
    name: &'a str,
    parents: Vec<&'a str>,
    mime_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFolder>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// A folder in the user's Drive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DriveFolder {
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// DriveSink
// ---------------------------------------------------------------------------

/// Uploads finished documents into one Drive folder.
#[derive(Debug, Clone)]
pub struct DriveSink {
    client: Client,
    api_base: Url,
    access_token: String,
    parent_folder_id: String,
}

impl DriveSink {
    pub fn new(
        api_base: &str,
        access_token: impl Into<String>,
        parent_folder_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut api_base = Url::parse(api_base).map_err(|e| {
            DuplexScanError::config(format!("invalid Drive API base '{api_base}': {e}"))
        })?;
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| DuplexScanError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base,
            access_token: access_token.into(),
            parent_folder_id: parent_folder_id.into(),
        })
    }

    /// Build from the `[drive]` config section and the token env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let token = drive_access_token(config)?;
        Self::new(
            &config.drive.api_base,
            token,
            &config.drive.parent_folder_id,
            Duration::from_secs(config.drive.timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_base
            .join(path)
            .map_err(|e| DuplexScanError::config(format!("bad Drive endpoint {path}: {e}")))
    }

    /// List every folder visible to the token, for picking a parent folder id.
    #[instrument(skip_all)]
    pub async fn list_folders(&self) -> Result<Vec<DriveFolder>> {
        let url = self.endpoint("drive/v3/files")?;
        let query = format!("mimeType = '{FOLDER_MIME_TYPE}' and trashed = false");
        let mut folders = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(url.clone())
                .bearer_auth(&self.access_token)
                .query(&[
                    ("q", query.as_str()),
                    ("fields", "nextPageToken,files(id,name)"),
                    ("pageSize", FOLDER_PAGE_SIZE),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| DuplexScanError::Network(format!("{url}: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(DuplexScanError::Network(format!(
                    "listing folders: HTTP {status}: {}",
                    body.trim()
                )));
            }

            let page: FileList = response
                .json()
                .await
                .map_err(|e| DuplexScanError::Network(format!("listing folders: {e}")))?;
            folders.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(count = folders.len(), "listed Drive folders");
        Ok(folders)
    }
}

#[async_trait]
impl UploadSink for DriveSink {
    fn name(&self) -> &'static str {
        "drive"
    }

    #[instrument(skip_all, fields(path = %path.display(), title = %title))]
    async fn upload(&self, path: &Path, title: &str) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DuplexScanError::io(path, e))?;
        let mime_type = mime_type_for(path);

        let metadata = serde_json::to_vec(&FileMetadata {
            name: title,
            parents: vec![self.parent_folder_id.as_str()],
            mime_type,
        })
        .map_err(|e| DuplexScanError::Upload(format!("encoding metadata: {e}")))?;

        let boundary = format!("duplexscan-{}", Uuid::now_v7().simple());
        let body = multipart_related(&boundary, &metadata, mime_type, &bytes);

        let url = self.endpoint("upload/drive/v3/files")?;
        let response = self
            .client
            .post(url)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .bearer_auth(&self.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| DuplexScanError::Upload(format!("{}: {e}", path.display())))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DuplexScanError::Upload(format!(
                "{}: HTTP {status}{}: {}",
                path.display(),
                auth_hint(status),
                body.trim()
            )));
        }

        let created: CreatedFile = response
            .json()
            .await
            .map_err(|e| DuplexScanError::Upload(format!("{}: bad response: {e}", path.display())))?;

        Ok(created.id)
    }
}

fn auth_hint(status: StatusCode) -> &'static str {
    if status == StatusCode::UNAUTHORIZED {
        " (access token expired or invalid)"
    } else {
        ""
    }
}

/// Assemble a `multipart/related` body: JSON metadata part, then the media part.
fn multipart_related(boundary: &str, metadata: &[u8], mime_type: &str, media: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(metadata.len() + media.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(media);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
