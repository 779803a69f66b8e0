//! Image storage: signed upload-by-URL to a Cloudinary-compatible service.

use crate::config::StorageCredentials;
use crate::error::{ArticleError, AssetError};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

/// Somewhere images can be copied to by URL.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Copy the image at `source` and return its new public URL.
    async fn upload(&self, source: &str) -> Result<String, AssetError>;
}

/// Cloudinary upload client. Built only from complete credentials.
#[derive(Clone)]
pub struct CloudinaryStore {
    cloud_name: String,
    api_key: String,
    api_secret: String,
    endpoint: String,
    folder: String,
    timeout_secs: u64,
}

impl CloudinaryStore {
    /// # Errors
    /// [`ArticleError::Configuration`] naming every missing credential field.
    pub fn from_credentials(
        credentials: &StorageCredentials,
        endpoint: &str,
        folder: &str,
        timeout_secs: u64,
    ) -> Result<Self, ArticleError> {
        let missing = credentials.missing_fields();
        if !missing.is_empty() {
            return Err(ArticleError::configuration(
                "Image storage",
                format!("missing {}", missing.join(", ")),
            ));
        }
        let field = |v: &Option<String>| v.as_deref().unwrap_or_default().trim().to_string();

        Ok(Self {
            cloud_name: field(&credentials.cloud_name),
            api_key: field(&credentials.api_key),
            api_secret: field(&credentials.api_secret),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            folder: folder.to_string(),
            timeout_secs,
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/{}/image/upload", self.endpoint, self.cloud_name)
    }
}

impl std::fmt::Debug for CloudinaryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryStore")
            .field("cloud_name", &self.cloud_name)
            .field("endpoint", &self.endpoint)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadErrorBody>,
}

#[derive(Deserialize)]
struct UploadErrorBody {
    message: String,
}

#[async_trait]
impl ImageStore for CloudinaryStore {
    async fn upload(&self, source: &str) -> Result<String, AssetError> {
        let fail = |detail: String| AssetError {
            location: source.to_string(),
            detail,
        };

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signed = [("folder", self.folder.as_str()), ("timestamp", timestamp.as_str())];
        let signature = sign(&signed, &self.api_secret);

        let form = [
            ("file", source),
            ("api_key", self.api_key.as_str()),
            ("folder", self.folder.as_str()),
            ("timestamp", timestamp.as_str()),
            ("signature", signature.as_str()),
            ("signature_algorithm", "sha256"),
        ];

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| fail(e.to_string()))?;

        let response = client
            .post(self.upload_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    fail(format!("upload timed out after {}s", self.timeout_secs))
                } else {
                    fail(format!("network error: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| fail(e.to_string()))?;
        debug!("Upload of {}: HTTP {}", source, status);

        match parse_upload_response(&body) {
            Ok(url) if status.is_success() => Ok(url),
            Ok(_) => Err(fail(format!("HTTP {}", status.as_u16()))),
            Err(detail) if status.is_success() => Err(fail(detail)),
            Err(detail) => Err(fail(format!("HTTP {}: {}", status.as_u16(), detail))),
        }
    }
}

/// Request signature: `k1=v1&k2=v2…` over the sorted signed params, with
/// the secret appended, SHA-256, lowercase hex.
pub fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// `secure_url` from an upload response; a missing or blank one is an error.
pub fn parse_upload_response(body: &str) -> Result<String, String> {
    let parsed: UploadResponse =
        serde_json::from_str(body).map_err(|e| format!("malformed upload response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(err.message);
    }
    match parsed.secure_url {
        Some(url) if !url.trim().is_empty() => Ok(url),
        _ => Err("upload response has no secure_url".to_string()),
    }
}
