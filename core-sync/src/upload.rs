//! # Upload Client
//!
//! Single-attempt transport for one asset. Retries are the caller's job.

use crate::credentials::Credentials;
use crate::multipart::MultipartEncoder;
use crate::{Result, SyncError};
use bridge_traits::{
    http::{HttpClient, HttpMethod, HttpRequest},
    library::{AssetPayload, AssetRef},
};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

/// Path segment of the asset-ingest endpoint
pub const ASSETS_PATH: &str = "assets";

/// Path segment of the key introspection endpoint
pub const API_KEY_PATH: &str = "api-keys/me";

pub const API_KEY_HEADER: &str = "x-api-key";

/// Validated server base URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    base: String,
}

impl ServerEndpoint {
    pub fn parse(base: &str) -> Result<Self> {
        let base = base.trim();
        if base.is_empty() {
            return Err(SyncError::Configuration("server URL is not set".to_string()));
        }

        let url = Url::parse(base)
            .map_err(|e| SyncError::Configuration(format!("invalid server URL '{}': {}", base, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SyncError::Configuration(format!(
                "server URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(Self {
            base: base.to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Append a path, adding a `/` only when the base lacks one.
    pub fn join(&self, path: &str) -> String {
        if self.base.ends_with('/') {
            format!("{}{}", self.base, path)
        } else {
            format!("{}/{}", self.base, path)
        }
    }

    pub fn assets_url(&self) -> String {
        self.join(ASSETS_PATH)
    }

    pub fn api_key_url(&self) -> String {
        self.join(API_KEY_PATH)
    }
}

/// Result of one transmission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Success(u16),
    Failure(String),
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success(_))
    }
}

/// A fully encoded upload, ready to send or to hand to a job queue
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Check credentials without touching the network.
pub fn validate_credentials(credentials: &Credentials) -> Result<ServerEndpoint> {
    if credentials.api_key.trim().is_empty() {
        return Err(SyncError::Configuration("API key is not set".to_string()));
    }
    ServerEndpoint::parse(&credentials.server_url)
}

pub struct UploadClient {
    http_client: Arc<dyn HttpClient>,
    encoder: MultipartEncoder,
}

impl UploadClient {
    pub fn new(http_client: Arc<dyn HttpClient>, encoder: MultipartEncoder) -> Self {
        Self {
            http_client,
            encoder,
        }
    }

    pub fn encoder(&self) -> &MultipartEncoder {
        &self.encoder
    }

    /// Encode an asset and build the request headers.
    ///
    /// Fails with a configuration error before encoding when the key or URL
    /// is unusable.
    pub fn prepare(
        &self,
        asset: &AssetRef,
        payload: &AssetPayload,
        credentials: &Credentials,
    ) -> Result<PreparedUpload> {
        let endpoint = validate_credentials(credentials)?;
        let encoded = self.encoder.encode(asset, payload)?;

        let mut headers = HashMap::new();
        headers.insert(API_KEY_HEADER.to_string(), credentials.api_key.clone());
        headers.insert("Content-Type".to_string(), encoded.content_type());

        Ok(PreparedUpload {
            url: endpoint.assets_url(),
            headers,
            body: encoded.body,
        })
    }

    /// Upload one asset with a single request.
    ///
    /// `Err` means nothing was sent (configuration or encoding problem).
    /// Transport errors and non-200/201 statuses come back as
    /// [`UploadOutcome::Failure`].
    #[instrument(skip(self, payload, credentials), fields(asset_id = %asset.id))]
    pub async fn upload(
        &self,
        asset: &AssetRef,
        payload: &AssetPayload,
        credentials: &Credentials,
    ) -> Result<UploadOutcome> {
        let prepared = self.prepare(asset, payload, credentials)?;

        let mut request = HttpRequest::new(HttpMethod::Post, prepared.url).body(prepared.body);
        for (key, value) in prepared.headers {
            request = request.header(key, value);
        }

        match self.http_client.execute(request).await {
            Ok(response) if matches!(response.status, 200 | 201) => {
                debug!(status = response.status, "Asset uploaded");
                Ok(UploadOutcome::Success(response.status))
            }
            Ok(response) => {
                warn!(status = response.status, "Server rejected upload");
                Ok(UploadOutcome::Failure(format!("HTTP {}", response.status)))
            }
            Err(e) => {
                warn!(error = %e, "Upload request failed");
                Ok(UploadOutcome::Failure(e.to_string()))
            }
        }
    }
}
