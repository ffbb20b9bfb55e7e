//! Client for the file URL endpoints.
//!
//! The backend hands out short-lived upload and download URLs; the bytes
//! themselves never pass through this client.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::client::ClientError;
use crate::http::{authorize, build_http_client, error_from_response};
use crate::options::{ClientConfig, HttpTransport};

const UPLOAD_URL_PATH: &str = "/api/files/upload-url";
const DOWNLOAD_URL_PATH: &str = "/api/files/download-url";
const LIST_PATH: &str = "/api/files/list";

const MIB: u64 = 1024 * 1024;
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;
const DEFAULT_ALLOWED_TYPES: &str = "image/*,application/pdf,text/*,.doc,.docx,.xls,.xlsx,.ppt,.pptx";

/// Default lifetime of a download URL.
pub const DEFAULT_DOWNLOAD_EXPIRY_MINUTES: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRequest {
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

impl FileUploadRequest {
    pub fn new(file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_size,
            file_type: None,
        }
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_type = Some(file_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    pub upload_url: String,
    pub blob_name: String,
    pub expires_at: DateTime<Utc>,
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrl {
    pub download_url: String,
    pub blob_name: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub blob_name: String,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
    /// Not reported by every backend.
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub files: Vec<StoredFile>,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadUrlRequest<'a> {
    blob_name: &'a str,
    expires_in_minutes: u32,
}

/// MIME type for a file name, from its extension.
pub fn mime_type_for(file_name: &str) -> &'static str {
    let extension = file_name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Size and type limits checked before an upload URL is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Maximum size in bytes.
    pub max_file_size: u64,
    /// Patterns: `*`, `category/*`, `.ext` or an exact MIME type.
    pub allowed_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE_MB * MIB,
            allowed_types: split_types(DEFAULT_ALLOWED_TYPES),
        }
    }
}

fn split_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

impl UploadPolicy {
    /// Read `MAX_FILE_SIZE_MB` and `ALLOWED_FILE_TYPES`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut policy = Self::default();

        if let Some(raw) = lookup("MAX_FILE_SIZE_MB").filter(|v| !v.trim().is_empty()) {
            let mb = raw.trim().parse::<u64>().map_err(|_| {
                ClientError::Config(format!(
                    "Invalid upload configuration:\nMAX_FILE_SIZE_MB: expected a whole number, got {raw}"
                ))
            })?;
            policy.max_file_size = mb.checked_mul(MIB).ok_or_else(|| {
                ClientError::Config(format!(
                    "Invalid upload configuration:\nMAX_FILE_SIZE_MB: {raw} is too large"
                ))
            })?;
        }

        if let Some(raw) = lookup("ALLOWED_FILE_TYPES").filter(|v| !v.trim().is_empty()) {
            policy.allowed_types = split_types(&raw);
        }

        Ok(policy)
    }

    pub fn allows(&self, file_name: &str) -> bool {
        let mime = mime_type_for(file_name);
        let lowered = file_name.to_lowercase();

        self.allowed_types.iter().any(|allowed| {
            if allowed == "*" {
                true
            } else if let Some(category) = allowed.strip_suffix("/*") {
                mime.starts_with(&format!("{category}/"))
            } else if allowed.starts_with('.') {
                lowered.ends_with(&allowed.to_lowercase())
            } else {
                mime == allowed.as_str()
            }
        })
    }

    pub fn validate(&self, file_name: &str, file_size: u64) -> Result<(), ClientError> {
        if file_size > self.max_file_size {
            let limit_mb = self.max_file_size.saturating_add(MIB / 2) / MIB;
            return Err(ClientError::Validation(format!(
                "File size exceeds maximum limit of {limit_mb}MB"
            )));
        }

        if !self.allows(file_name) {
            return Err(ClientError::Validation(format!(
                "File type not allowed. Supported types: {}",
                self.allowed_types.iter().join(", ")
            )));
        }

        Ok(())
    }
}

/// Requests signed URLs for uploading, downloading and listing files.
#[derive(Debug, Clone)]
pub struct FilesClient {
    http: Client,
    transport: HttpTransport,
    policy: Option<UploadPolicy>,
}

impl FilesClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http_client(&config.transport)?,
            transport: config.transport.provider.clone(),
            policy: None,
        })
    }

    /// Check uploads locally before contacting the backend.
    pub fn with_policy(mut self, policy: UploadPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub async fn request_upload_url(&self, request: &FileUploadRequest) -> Result<UploadUrl, ClientError> {
        if request.file_name.trim().is_empty() || request.file_size == 0 {
            return Err(ClientError::Validation(
                "fileName and fileSize are required".to_string(),
            ));
        }
        if let Some(policy) = &self.policy {
            policy.validate(&request.file_name, request.file_size)?;
        }

        let url = self.transport.endpoint(UPLOAD_URL_PATH)?;
        let response = authorize(self.http.post(&url).json(request), &self.transport)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let upload: UploadUrl = response.json().await?;
        tracing::debug!(blob_name = %upload.blob_name, "Upload URL issued");
        Ok(upload)
    }

    pub async fn request_download_url(
        &self,
        blob_name: &str,
        expires_in_minutes: u32,
    ) -> Result<DownloadUrl, ClientError> {
        if blob_name.trim().is_empty() {
            return Err(ClientError::Validation("blobName is required".to_string()));
        }
        if expires_in_minutes == 0 {
            return Err(ClientError::Validation(
                "expiresInMinutes must be positive".to_string(),
            ));
        }

        let url = self.transport.endpoint(DOWNLOAD_URL_PATH)?;
        let body = DownloadUrlRequest {
            blob_name,
            expires_in_minutes,
        };
        let response = authorize(self.http.post(&url).json(&body), &self.transport)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(response.json().await?)
    }

    pub async fn list_files(&self) -> Result<FileListing, ClientError> {
        let url = self.transport.endpoint(LIST_PATH)?;
        let response = authorize(self.http.get(&url), &self.transport).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let listing: FileListing = response.json().await?;
        tracing::debug!(count = listing.count, "Listed files");
        Ok(listing)
    }
}
