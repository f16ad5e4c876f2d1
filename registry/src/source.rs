//! Package sources — remote repositories serving indexes, binaries and updates
//!
//! The HTTP transport is a thin wrapper: it maps status codes and timeouts to
//! `EngineError` and leaves retry policy to callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::manifest::PluginPackage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Progress callback: `(bytes_received, bytes_total)`
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Kind of release described by an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Major,
    Minor,
    #[default]
    Patch,
    Security,
    Hotfix,
}

/// Response of the update-check endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub changelog: String,
    pub download_url: String,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub release_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_security_update: bool,
    #[serde(default)]
    pub is_breaking_change: bool,
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(rename = "type", default)]
    pub update_type: UpdateType,
}

impl UpdateInfo {
    /// Package description of the update target for `base`
    pub fn to_package(&self, base: &PluginPackage) -> PluginPackage {
        let mut package = base.clone();
        package.version = self.version.clone();
        package.download_url = self.download_url.clone();
        package.checksum = self.checksum.clone();
        package.size = self.size;
        package.publish_date = self.release_date;
        package.install_path = None;
        if !self.description.is_empty() {
            package.description = self.description.clone();
        }
        package
    }
}

/// A repository that serves package metadata and binaries
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Human-readable location, used in logs
    fn name(&self) -> &str;

    /// List every package the repository offers
    async fn fetch_index(&self) -> Result<Vec<PluginPackage>, EngineError>;

    /// Download a package binary, reporting progress
    async fn download(
        &self,
        package: &PluginPackage,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>, EngineError>;

    /// Ask whether a newer release exists on `channel`
    async fn check_update(
        &self,
        package_id: &str,
        channel: &str,
    ) -> Result<Option<UpdateInfo>, EngineError>;
}

/// HTTP repository source
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source rooted at `base_url` with a per-request timeout
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("plexus-registry/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn map_error(context: &str, e: reqwest::Error) -> EngineError {
        if e.is_timeout() {
            EngineError::Timeout(context.to_string())
        } else {
            EngineError::Network(format!("{}: {}", context, e))
        }
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl PackageSource for HttpSource {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch_index(&self) -> Result<Vec<PluginPackage>, EngineError> {
        let url = format!("{}/plugins", self.base_url);
        tracing::debug!("Fetching package index from {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_error("fetch index", e))?
            .error_for_status()
            .map_err(|e| Self::map_error("fetch index", e))?;

        response
            .json::<Vec<PluginPackage>>()
            .await
            .map_err(|e| EngineError::InvalidFormat(format!("package index: {}", e)))
    }

    async fn download(
        &self,
        package: &PluginPackage,
        progress: ProgressFn<'_>,
    ) -> Result<Vec<u8>, EngineError> {
        if package.download_url.is_empty() {
            return Err(EngineError::InvalidFormat(format!(
                "package {} has no download URL",
                package.key()
            )));
        }
        let url = self.resolve_url(&package.download_url);
        tracing::info!("Downloading {} from {}", package.key(), url);

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::map_error("download", e))?
            .error_for_status()
            .map_err(|e| Self::map_error("download", e))?;

        let total = response
            .content_length()
            .or((package.size > 0).then_some(package.size));
        let mut bytes = Vec::with_capacity(total.unwrap_or(0) as usize);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Self::map_error("download", e))?
        {
            bytes.extend_from_slice(&chunk);
            progress(bytes.len() as u64, total);
        }

        Ok(bytes)
    }

    async fn check_update(
        &self,
        package_id: &str,
        channel: &str,
    ) -> Result<Option<UpdateInfo>, EngineError> {
        let url = format!("{}/plugins/{}/updates", self.base_url, package_id);

        let response = self
            .client
            .get(&url)
            .query(&[("channel", channel)])
            .send()
            .await
            .map_err(|e| Self::map_error("update check", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = response
            .error_for_status()
            .map_err(|e| Self::map_error("update check", e))?;

        let info = response
            .json::<UpdateInfo>()
            .await
            .map_err(|e| EngineError::InvalidFormat(format!("update response: {}", e)))?;
        Ok(Some(info))
    }
}
