//! Public location of stored artifacts.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::upload::ArtifactKey;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no public base URL configured")]
    NotConfigured,
}

/// Maps an artifact key to the URL uploaders and dashboards fetch it from.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, key: &ArtifactKey) -> Result<String, ResolveError>;
}

/// Resolves against a fixed base URL, e.g. the exposed download service.
#[derive(Debug, Clone)]
pub struct StaticLocationResolver {
    base_url: String,
}

impl StaticLocationResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url }
    }
}

#[async_trait]
impl LocationResolver for StaticLocationResolver {
    async fn resolve(&self, key: &ArtifactKey) -> Result<String, ResolveError> {
        if self.base_url.is_empty() {
            return Err(ResolveError::NotConfigured);
        }
        Ok(format!("{}/{}", self.base_url, key.url_path()))
    }
}
