//! npm registry metadata client.

use super::error::PkgError;
use super::lockfile::BinField;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Default npm registry URL.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Environment variable overriding the registry URL.
pub const REGISTRY_ENV: &str = "LIFFEY_NPM_REGISTRY";

/// Registry metadata for a package: every published version plus dist-tags.
#[derive(Debug, Clone, Deserialize)]
pub struct Packument {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "dist-tags")]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionMetadata>,
}

impl Packument {
    /// All published version strings.
    #[must_use]
    pub fn version_names(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }
}

/// Metadata for a single published version.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionMetadata {
    pub version: String,
    #[serde(default)]
    pub dist: Option<DistInfo>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "peerDependencies")]
    pub peer_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub os: Vec<String>,
    #[serde(default)]
    pub cpu: Vec<String>,
    #[serde(default)]
    pub bin: Option<BinField>,
}

/// Distribution info for a published version.
#[derive(Debug, Clone, Deserialize)]
pub struct DistInfo {
    #[serde(default)]
    pub tarball: Option<String>,
    #[serde(default)]
    pub integrity: Option<String>,
}

/// Registry client for fetching package metadata.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
}

impl RegistryClient {
    /// Create a client against the given registry base URL.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str) -> Result<Self, PkgError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PkgError::registry(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("liffey/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::registry(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, http })
    }

    /// Create a client using the registry URL from the environment, or the
    /// default public registry.
    ///
    /// # Errors
    /// Returns an error if the client cannot be created.
    pub fn from_env() -> Result<Self, PkgError> {
        let url = std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        Self::new(&url)
    }

    /// Fetch the packument for a package.
    ///
    /// # Errors
    /// Returns `PKG_REGISTRY_ERROR` for request failures, non-success
    /// statuses, and undecodable bodies.
    pub async fn fetch_packument(&self, name: &str) -> Result<Packument, PkgError> {
        // Scoped names keep their @ but encode the separator.
        let encoded_name = if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        };

        let url = self
            .base_url
            .join(&encoded_name)
            .map_err(|e| PkgError::registry(format!("Failed to build URL for '{name}': {e}")))?;

        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| PkgError::registry(format!("Failed to fetch metadata for '{name}': {e}")))?;

        if !response.status().is_success() {
            return Err(PkgError::registry(format!(
                "npm registry returned status {} for '{name}'",
                response.status().as_u16()
            )));
        }

        let packument: Packument = response
            .json()
            .await
            .map_err(|e| PkgError::registry(format!("Invalid metadata for '{name}': {e}")))?;
        Ok(packument)
    }
}
