//! HTTP client for the file-storage service.
//!
//! Attachments are stored as opaque file references. Before a message goes out
//! each reference is exchanged for a time-limited download URL via
//! `GET {base_url}/files/{file_id}/download-url`.

use std::time::Duration;

use huddle_config::FileServiceConfig;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Header carrying the shared secret for service-to-service calls.
pub const INTERNAL_KEY_HEADER: &str = "internal-key";

#[derive(Debug, Error)]
pub enum FileServiceError {
    #[error("invalid file service url: {0}")]
    InvalidBaseUrl(String),
    #[error("file id must not be empty")]
    EmptyFileId,
    #[error("file {0} not found")]
    NotFound(String),
    #[error("file service returned an empty url for {0}")]
    EmptyUrl(String),
    #[error("file service request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct DownloadUrlResponse {
    presigned_url: String,
}

#[derive(Clone)]
pub struct FileServiceClient {
    http: Client,
    base_url: Url,
    internal_key: Option<String>,
}

impl FileServiceClient {
    pub fn new(config: &FileServiceConfig) -> Result<Self, FileServiceError> {
        Self::with_timeout(config, config.request_timeout())
    }

    pub fn with_timeout(
        config: &FileServiceConfig,
        timeout: Duration,
    ) -> Result<Self, FileServiceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FileServiceError::InvalidBaseUrl(format!("{}: {e}", config.base_url)))?;

        if base_url.cannot_be_a_base() {
            return Err(FileServiceError::InvalidBaseUrl(config.base_url.clone()));
        }

        let http = Client::builder()
            .timeout(timeout)
            .user_agent("huddle-chat")
            .build()?;

        Ok(Self {
            http,
            base_url,
            internal_key: config.internal_key.clone().filter(|key| !key.is_empty()),
        })
    }

    /// Ask the file service for a time-limited download URL of a stored file.
    pub async fn generate_download_url(&self, file_id: &str) -> Result<String, FileServiceError> {
        if file_id.is_empty() {
            return Err(FileServiceError::EmptyFileId);
        }

        let url = self.download_url_endpoint(file_id)?;

        let mut request = self.http.get(url);
        if let Some(key) = &self.internal_key {
            request = request.header(INTERNAL_KEY_HEADER, key);
        }

        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FileServiceError::NotFound(file_id.to_owned()));
        }

        let parsed: DownloadUrlResponse = response.error_for_status()?.json().await?;
        if parsed.presigned_url.is_empty() {
            return Err(FileServiceError::EmptyUrl(file_id.to_owned()));
        }

        debug!(file_id, "generated download url");
        Ok(parsed.presigned_url)
    }

    fn download_url_endpoint(&self, file_id: &str) -> Result<Url, FileServiceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FileServiceError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["files", file_id, "download-url"]);
        Ok(url)
    }
}
