//! The artifact-storage plug-point.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from artifact storage.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Underlying storage failed.
    #[error("artifact storage failure: {0}")]
    Storage(String),
}

/// Opaque blob storage keyed by session and name, with versions.
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Save a blob, returning the new version number.
    async fn save_artifact(
        &self,
        session_id: &str,
        name: &str,
        data: Vec<u8>,
    ) -> Result<u64, ArtifactError>;

    /// Load a blob at `version`, or the latest when `None`.
    async fn load_artifact(
        &self,
        session_id: &str,
        name: &str,
        version: Option<u64>,
    ) -> Result<Option<Vec<u8>>, ArtifactError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_service_is_object_safe() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn ArtifactService>();
    }
}
