use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;

use crate::ingest::model::{MediaFile, UploadMetadata};
use crate::model::{Entity, SyncError};

pub mod model;

/// Downstream ingestion service consumed by the workflows.
#[async_trait]
pub trait IngestService: Send + Sync {
    /// Submit a batch of flat entities to a data source. Ok means the
    /// service accepted the import.
    async fn submit_entities(
        &self,
        data_source: &str,
        entities: &[Entity],
    ) -> Result<(), SyncError>;

    /// Look up an already-ingested asset by its stable unique id.
    async fn asset_by_unique_id(&self, unique_id: &str) -> Result<Option<MediaFile>, SyncError>;

    /// Upload asset bytes with metadata; idempotent on the unique id.
    async fn upload_asset(
        &self,
        bytes: Vec<u8>,
        metadata: UploadMetadata,
    ) -> Result<MediaFile, SyncError>;
}

/// Reqwest-backed ingestion client.
#[derive(Clone)]
pub struct IngestClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for IngestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl IngestClient {
    pub fn new(base_url: &str, token: String) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::Validation(format!("invalid ingest url: {e}")))?;
        let http = Client::builder()
            .user_agent("pim-sync/0.1")
            .build()
            .map_err(|e| SyncError::Unknown(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Validation(format!("invalid ingest endpoint: {e}")))
    }

    fn check_status(status: StatusCode) -> Result<(), SyncError> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SyncError::Unauthorized),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Err(SyncError::Validation(
                "ingestion service rejected the request".to_string(),
            )),
            other => Err(SyncError::Unknown(format!(
                "ingestion service does not indicate success: {other}"
            ))),
        }
    }
}

/// Content type derived from the file extension, for upload metadata.
pub fn mime_from_filename(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl IngestService for IngestClient {
    async fn submit_entities(
        &self,
        data_source: &str,
        entities: &[Entity],
    ) -> Result<(), SyncError> {
        let url = self.endpoint(&format!("v1/data-sources/{data_source}/entities"))?;
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&entities)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("entity import failed: {e}")))?;
        Self::check_status(res.status())
    }

    async fn asset_by_unique_id(&self, unique_id: &str) -> Result<Option<MediaFile>, SyncError> {
        let mut url = self.endpoint("v1/media/files")?;
        url.query_pairs_mut().append_pair("uniqueId", unique_id);
        let res = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("asset lookup failed: {e}")))?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(res.status())?;
        let file = res
            .json::<MediaFile>()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to parse asset lookup: {e}")))?;
        Ok(Some(file))
    }

    async fn upload_asset(
        &self,
        bytes: Vec<u8>,
        metadata: UploadMetadata,
    ) -> Result<MediaFile, SyncError> {
        let url = self.endpoint("v1/media/uploads")?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(metadata.filename.clone())
            .mime_str(&metadata.mime_type)
            .map_err(|e| SyncError::Validation(format!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("uniqueId", metadata.unique_id.clone())
            .text("size", metadata.size.to_string());
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Unknown(format!("asset upload failed: {e}")))?;
        Self::check_status(res.status())?;
        res.json::<MediaFile>()
            .await
            .map_err(|e| SyncError::Unknown(format!("failed to parse upload response: {e}")))
    }
}
