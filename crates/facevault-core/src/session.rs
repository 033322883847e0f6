//! Search session controller.
//!
//! Owns every piece of state for one upload-to-results session and is the
//! only writer of it. Face detection and the phased search are tracked as
//! two separate sub-machines, so a failed detection never looks like a failed
//! search (or like an image with no faces).
//!
//! Renderers read [`SessionSnapshot`]s, either on demand or through
//! [`SessionController::subscribe`]. Every search-status change is also
//! broadcast in order on [`SessionController::subscribe_status`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::api::{ApiError, FaceVaultApi};
use crate::settings::{DeveloperSetting, DeveloperSettings, SettingsError};
use crate::status::{SearchEvent, SearchEvents, SearchPhase, SearchStatus};
use crate::types::{DetectedFace, SearchResponse};
use crate::upload::{ImageInfo, UploadedImage};

pub const SEARCH_FAILED_MESSAGE: &str = "Search failed. Please try again.";
const SEARCH_STARTING_MESSAGE: &str = "Starting search…";
const SEARCH_COMPLETE_MESSAGE: &str = "Search complete";
/// Progress never reaches 100 before the response is in hand.
const MAX_PENDING_PROGRESS: f32 = 99.0;
const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no image uploaded")]
    NoImage,
    #[error("no face selected")]
    NoFaceSelected,
    #[error("face {0} is not among the detected faces")]
    UnknownFace(String),
    #[error("a search is already in progress")]
    SearchInFlight,
    #[error("no completed search results")]
    NoResults,
    #[error("invalid developer setting: {0}")]
    InvalidSetting(#[from] SettingsError),
    #[error(transparent)]
    Detection(ApiError),
    #[error(transparent)]
    Search(ApiError),
    #[error(transparent)]
    Download(ApiError),
}

/// Face-detection sub-machine.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DetectionState {
    #[default]
    Idle,
    Detecting,
    Detected(Vec<DetectedFace>),
    Failed(String),
}

impl DetectionState {
    pub fn faces(&self) -> &[DetectedFace] {
        match self {
            DetectionState::Detected(faces) => faces,
            _ => &[],
        }
    }
}

/// Read-only view of a session at one point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    pub image: Option<ImageInfo>,
    pub detection: DetectionState,
    pub selected_face: Option<String>,
    pub status: SearchStatus,
    pub response: Option<Arc<SearchResponse>>,
    pub settings: DeveloperSettings,
    pub save_query: bool,
}

impl SessionSnapshot {
    pub fn faces(&self) -> &[DetectedFace] {
        self.detection.faces()
    }

    pub fn is_searching(&self) -> bool {
        self.status.phase.is_active()
    }

    pub fn has_results(&self) -> bool {
        self.response.is_some() && self.status.phase == SearchPhase::Complete
    }

    pub fn show_dashboard(&self) -> bool {
        !self.is_searching() && !self.has_results()
    }

    pub fn can_search(&self) -> bool {
        self.selected_face.is_some() && !self.is_searching() && !self.faces().is_empty()
    }

    /// Detection succeeded but found nothing to search for.
    pub fn no_faces_found(&self) -> bool {
        matches!(&self.detection, DetectionState::Detected(faces) if faces.is_empty())
    }
}

/// Handle to a started search: its attempt id and the events to feed back.
#[derive(Debug)]
pub struct SearchTicket {
    pub attempt: u64,
    pub events: SearchEvents,
}

/// Drives one session against a backend gateway.
pub struct SessionController<A> {
    api: A,
    image: Option<UploadedImage>,
    detection: DetectionState,
    selected_face: Option<String>,
    status: SearchStatus,
    response: Option<Arc<SearchResponse>>,
    last_error: Option<ApiError>,
    settings: DeveloperSettings,
    save_query: bool,
    /// Bumped on every new search, upload and reset; events tagged with an
    /// older value are dropped.
    attempt: u64,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    status_tx: broadcast::Sender<SearchStatus>,
}

impl<A: FaceVaultApi> SessionController<A> {
    pub fn new(api: A) -> Self {
        Self::build(api, DeveloperSettings::default())
    }

    /// Start with caller-supplied settings. The threshold is clamped into
    /// range; a non-finite one is rejected.
    pub fn with_settings(api: A, settings: DeveloperSettings) -> Result<Self, SessionError> {
        Ok(Self::build(api, settings.validated()?))
    }

    fn build(api: A, settings: DeveloperSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot {
            settings,
            ..Default::default()
        });
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            api,
            image: None,
            detection: DetectionState::Idle,
            selected_face: None,
            status: SearchStatus::idle(),
            response: None,
            last_error: None,
            settings,
            save_query: false,
            attempt: 0,
            snapshot_tx,
            status_tx,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn image(&self) -> Option<&UploadedImage> {
        self.image.as_ref()
    }

    pub fn faces(&self) -> &[DetectedFace] {
        self.detection.faces()
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    pub fn response(&self) -> Option<&Arc<SearchResponse>> {
        self.response.as_ref()
    }

    pub fn settings(&self) -> DeveloperSettings {
        self.settings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            image: self.image.as_ref().map(UploadedImage::info),
            detection: self.detection.clone(),
            selected_face: self.selected_face.clone(),
            status: self.status.clone(),
            response: self.response.clone(),
            settings: self.settings,
            save_query: self.save_query,
        }
    }

    /// Latest snapshot, updated after every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Every search status, in the order it was entered.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SearchStatus> {
        self.status_tx.subscribe()
    }

    /// Store a new image and detect faces in it.
    ///
    /// Clears the previous faces, selection, results and search status. A
    /// single detected face is selected automatically. Detection failure
    /// leaves the face list empty and the search phase untouched.
    pub async fn upload(&mut self, image: UploadedImage) -> Result<&[DetectedFace], SessionError> {
        if self.status.phase.is_active() {
            return Err(SessionError::SearchInFlight);
        }

        tracing::info!(
            file = image.file_name(),
            size = image.len(),
            mime = image.mime_type(),
            "image uploaded"
        );

        self.attempt += 1;
        self.image = Some(image.clone());
        self.detection = DetectionState::Detecting;
        self.selected_face = None;
        self.response = None;
        self.last_error = None;
        self.set_status(SearchStatus::idle());

        match self.api.detect_faces(&image).await {
            Ok(faces) => {
                tracing::info!(count = faces.len(), "faces detected");
                if let [only] = faces.as_slice() {
                    tracing::debug!(face = %only.id, "auto-selecting the only face");
                    self.selected_face = Some(only.id.clone());
                }
                self.detection = DetectionState::Detected(faces);
                self.publish();
                Ok(self.detection.faces())
            }
            Err(err) => {
                tracing::warn!(error = %err, "face detection failed");
                self.detection = DetectionState::Failed(err.to_string());
                self.publish();
                Err(SessionError::Detection(err))
            }
        }
    }

    /// Choose which detected face to search for.
    pub fn select_face(&mut self, face_id: &str) -> Result<(), SessionError> {
        if self.status.phase.is_active() {
            return Err(SessionError::SearchInFlight);
        }
        if !self.faces().iter().any(|f| f.id == face_id) {
            return Err(SessionError::UnknownFace(face_id.to_string()));
        }
        self.selected_face = Some(face_id.to_string());
        self.publish();
        Ok(())
    }

    /// Start a search and hand back its event stream without consuming it.
    ///
    /// Feed every event to [`apply_event`](Self::apply_event) with the
    /// ticket's attempt id. [`search`](Self::search) does both.
    pub fn begin_search(&mut self) -> Result<SearchTicket, SessionError> {
        if self.status.phase.is_active() {
            return Err(SessionError::SearchInFlight);
        }
        let image = self.image.clone().ok_or(SessionError::NoImage)?;
        let face_id = self.selected_face.clone().ok_or(SessionError::NoFaceSelected)?;

        self.attempt += 1;
        self.response = None;
        self.last_error = None;
        self.set_status(SearchStatus::new(
            SearchPhase::Uploading,
            0.0,
            SEARCH_STARTING_MESSAGE,
        ));

        tracing::info!(attempt = self.attempt, face = %face_id, "search started");
        let events = self.api.search_identity(&image, &face_id);

        Ok(SearchTicket {
            attempt: self.attempt,
            events,
        })
    }

    /// Apply one event of attempt `attempt`. Returns `false` if it was
    /// dropped (stale attempt, phase regression, or arrived after the
    /// attempt had already settled).
    pub fn apply_event(&mut self, attempt: u64, event: SearchEvent) -> bool {
        if attempt != self.attempt {
            tracing::debug!(attempt, current = self.attempt, "dropping event from stale search");
            return false;
        }

        match event {
            SearchEvent::Progress(status) => self.apply_progress(status),
            SearchEvent::Finished(Ok(response)) => {
                if self.status.phase == SearchPhase::Error {
                    tracing::warn!("search result arrived after failure; ignoring");
                    return false;
                }
                tracing::info!(
                    query = %response.query_id,
                    routing = ?response.routing.status,
                    results = response.results.len(),
                    "search complete"
                );
                self.response = Some(Arc::new(response));
                self.set_status(SearchStatus::new(
                    SearchPhase::Complete,
                    100.0,
                    SEARCH_COMPLETE_MESSAGE,
                ));
                true
            }
            SearchEvent::Finished(Err(err)) => {
                if self.status.phase == SearchPhase::Complete {
                    return false;
                }
                self.fail_search(err);
                true
            }
        }
    }

    fn apply_progress(&mut self, status: SearchStatus) -> bool {
        let current = self.status.phase;
        if !current.is_active() {
            tracing::debug!(phase = ?status.phase, "progress after search settled; ignoring");
            return false;
        }

        match status.phase {
            SearchPhase::Error => {
                let detail = if status.message.is_empty() {
                    "backend reported an error".to_string()
                } else {
                    status.message
                };
                self.fail_search(ApiError::Search(detail));
                true
            }
            // Only a delivered response completes a search.
            SearchPhase::Idle | SearchPhase::Complete => {
                tracing::debug!(phase = ?status.phase, "ignoring non-progress phase in stream");
                false
            }
            phase if phase.rank() < current.rank() => {
                tracing::warn!(from = ?current, to = ?phase, "ignoring phase regression");
                false
            }
            phase => {
                let progress = status
                    .progress
                    .max(self.status.progress)
                    .clamp(0.0, MAX_PENDING_PROGRESS);
                tracing::debug!(phase = ?phase, progress, "search progress");
                self.set_status(SearchStatus::new(phase, progress, status.message));
                true
            }
        }
    }

    fn fail_search(&mut self, err: ApiError) {
        tracing::warn!(error = %err, attempt = self.attempt, "search failed");
        self.response = None;
        // keep the first failure cause; a later Finished(Err) only refines it
        self.last_error = Some(err);
        if self.status.phase != SearchPhase::Error {
            self.set_status(SearchStatus::failed(SEARCH_FAILED_MESSAGE));
        }
    }

    /// Run a search to completion.
    ///
    /// On failure the session ends in the `Error` phase with no results.
    pub async fn search(&mut self) -> Result<Arc<SearchResponse>, SessionError> {
        let SearchTicket { attempt, mut events } = self.begin_search()?;

        while let Some(event) = events.next().await {
            let finished = matches!(event, SearchEvent::Finished(_));
            self.apply_event(attempt, event);
            if finished {
                break;
            }
        }

        if self.status.phase.is_active() {
            self.fail_search(ApiError::Search("search ended without a result".into()));
        }

        match &self.response {
            Some(response) if self.status.phase == SearchPhase::Complete => {
                Ok(Arc::clone(response))
            }
            _ => Err(SessionError::Search(self.last_error.clone().unwrap_or_else(|| {
                ApiError::Search(SEARCH_FAILED_MESSAGE.to_string())
            }))),
        }
    }

    /// Return to the initial state. Developer settings and the save-query
    /// choice survive; any in-flight search is abandoned, not cancelled.
    pub fn reset(&mut self) {
        tracing::info!(phase = ?self.status.phase, "session reset");
        self.attempt += 1;
        self.image = None;
        self.detection = DetectionState::Idle;
        self.selected_face = None;
        self.response = None;
        self.last_error = None;
        self.set_status(SearchStatus::idle());
    }

    pub fn update_developer_setting(
        &mut self,
        setting: DeveloperSetting,
    ) -> Result<DeveloperSettings, SessionError> {
        self.settings = self.settings.with(setting)?;
        tracing::debug!(?setting, "developer setting updated");
        self.publish();
        Ok(self.settings)
    }

    pub fn set_save_query(&mut self, save: bool) {
        self.save_query = save;
        self.publish();
    }

    /// Fetch a zip of every photo in the current results.
    pub async fn download_results(&self) -> Result<Vec<u8>, SessionError> {
        let response = match &self.response {
            Some(r) if self.status.phase == SearchPhase::Complete => r,
            _ => return Err(SessionError::NoResults),
        };
        let face_ids = response.face_ids();
        if face_ids.is_empty() {
            return Err(SessionError::NoResults);
        }

        let archive = self
            .api
            .download_results(&face_ids)
            .await
            .map_err(SessionError::Download)?;
        tracing::info!(faces = face_ids.len(), bytes = archive.len(), "results archive downloaded");
        Ok(archive)
    }

    fn set_status(&mut self, status: SearchStatus) {
        self.status = status;
        let _ = self.status_tx.send(self.status.clone());
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }
}
