use crate::model::{ArtifactPayload, Override, PackageVersion};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Remote query failed: {0}")]
    QueryFailed(String),
    #[error("Artifact download failed for {package}: {message}")]
    DownloadFailed { package: String, message: String },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Remote service collaborator. Transport, authentication and pagination
/// cursors are opaque to this crate; only the returned values matter.
///
/// All bulk methods receive one chunk of ids at a time; chunking and
/// concurrency are owned by the dispatcher, not by implementations.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Looks up scan results for the given dependency ids. Ids unknown to
    /// the service are simply absent from the returned page.
    async fn query_package_versions(
        &self,
        ids: &[String],
    ) -> Result<Vec<PackageVersion>, BackendError>;

    /// Looks up the remotely approved override configuration for the given
    /// dependency ids.
    async fn query_remote_overrides(&self, ids: &[String])
        -> Result<Vec<Override>, BackendError>;

    /// Downloads the patched artifact for a replacement package version.
    async fn fetch_artifact(
        &self,
        package: &PackageVersion,
    ) -> Result<ArtifactPayload, BackendError>;
}
