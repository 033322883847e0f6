//! Contract with the search backend.

use thiserror::Error;

use crate::status::SearchEvents;
use crate::types::{DetectedFace, RecentSearch, SystemStats};
use crate::upload::UploadedImage;

/// Failure of one backend call, by operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("face detection failed: {0}")]
    Detection(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("failed to load stats: {0}")]
    StatsLoad(String),
    #[error("failed to load recent searches: {0}")]
    HistoryLoad(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Gateway to the detection / search / statistics service.
///
/// Implementations must report failures with the variant matching the
/// operation, so callers can tell a failed detection from one that found
/// no faces.
#[allow(async_fn_in_trait)]
pub trait FaceVaultApi {
    /// Detect faces in an uploaded image. Zero faces is a valid result.
    async fn detect_faces(&self, image: &UploadedImage) -> Result<Vec<DetectedFace>, ApiError>;

    /// Start an identity search for one face of `image`.
    ///
    /// Returns immediately; the request runs in the background and reports
    /// through the returned stream, ending with [`SearchEvent::Finished`].
    /// Failures must be preceded by a progress event in the `Error` phase.
    ///
    /// [`SearchEvent::Finished`]: crate::status::SearchEvent::Finished
    fn search_identity(&self, image: &UploadedImage, face_id: &str) -> SearchEvents;

    /// Recent queries, as the backend orders them.
    async fn recent_searches(&self) -> Result<Vec<RecentSearch>, ApiError>;

    async fn stats(&self) -> Result<SystemStats, ApiError>;

    /// Zip archive of the given result photos.
    async fn download_results(&self, face_ids: &[String]) -> Result<Vec<u8>, ApiError>;

    async fn health(&self) -> Result<(), ApiError>;
}
