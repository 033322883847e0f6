//! facevault-core: search session state machine and backend contract.
//!
//! Holds the domain types shared with the backend, the [`FaceVaultApi`]
//! gateway trait, and the [`SessionController`] that drives one
//! upload → detect → select → search session. No HTTP lives here.

pub mod api;
pub mod dashboard;
pub mod session;
pub mod settings;
pub mod status;
pub mod types;
pub mod upload;

pub use api::{ApiError, FaceVaultApi};
pub use session::{DetectionState, SearchTicket, SessionController, SessionError, SessionSnapshot};
pub use settings::{DeveloperSetting, DeveloperSettings};
pub use status::{SearchEvent, SearchEvents, SearchPhase, SearchStatus};
pub use types::{
    BoundingBox, ClusterInfo, DetectedFace, RecentSearch, ResultGroup, RoutingInfo, RoutingStatus,
    SearchResponse, SearchResult, SystemStats,
};
pub use upload::{ImageError, ImageInfo, UploadedImage};
