//! HTTP gateway to the FaceVault backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use facevault_core::status::{SearchEvent, SearchEvents, SearchPhase, SearchStatus};
use facevault_core::{
    ApiError, DetectedFace, FaceVaultApi, RecentSearch, SearchResponse, SystemStats, UploadedImage,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::Config;

const MAX_ERROR_BODY: usize = 200;

/// [`FaceVaultApi`] over HTTP. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    config: Arc<Config>,
}

#[derive(Deserialize)]
struct Health {
    status: String,
}

impl HttpApi {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("facevault/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn image_form(image: &UploadedImage) -> Result<Form, String> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name().to_string())
            .mime_str(image.mime_type())
            .map_err(|e| e.to_string())?;
        Ok(Form::new().part("image", part))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let url = self.config.endpoint(path);
        let started = Instant::now();
        let resp = self.client.get(&url).send().await.map_err(describe)?;
        let resp = check_status(resp, started).await?;
        resp.json().await.map_err(describe)
    }

    async fn post_search(
        &self,
        image: &UploadedImage,
        face_id: &str,
        tx: &tokio::sync::mpsc::Sender<SearchEvent>,
    ) -> Result<SearchResponse, String> {
        let url = self.config.endpoint("/search");
        // the backend re-detects and uses the most confident face; face_id rides along
        let form = Self::image_form(image)?.text("face_id", face_id.to_string());

        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(describe)?;
        let resp = check_status(resp, started).await?;

        let _ = tx
            .send(SearchEvent::Progress(SearchStatus::new(
                SearchPhase::Processing,
                60.0,
                "Processing results…",
            )))
            .await;

        resp.json().await.map_err(describe)
    }
}

impl FaceVaultApi for HttpApi {
    async fn detect_faces(&self, image: &UploadedImage) -> Result<Vec<DetectedFace>, ApiError> {
        let url = self.config.endpoint("/detect-faces");
        let form = Self::image_form(image).map_err(ApiError::Detection)?;

        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Detection(describe(e)))?;
        let resp = check_status(resp, started).await.map_err(ApiError::Detection)?;
        let faces: Vec<DetectedFace> = resp
            .json()
            .await
            .map_err(|e| ApiError::Detection(describe(e)))?;

        let (width, height) = image.dimensions();
        Ok(normalize_faces(faces, width, height))
    }

    /// Must be called from inside a tokio runtime.
    fn search_identity(&self, image: &UploadedImage, face_id: &str) -> SearchEvents {
        let (tx, events) = SearchEvents::channel();
        let api = self.clone();
        let image = image.clone();
        let face_id = face_id.to_string();

        tokio::spawn(async move {
            let _ = tx
                .send(SearchEvent::Progress(SearchStatus::new(
                    SearchPhase::Uploading,
                    20.0,
                    "Uploading image…",
                )))
                .await;

            let result = api
                .post_search(&image, &face_id, &tx)
                .await
                .map_err(ApiError::Search);
            if let Err(err) = &result {
                tracing::debug!(error = %err, "search request failed");
                let _ = tx
                    .send(SearchEvent::Progress(SearchStatus::failed("Search failed")))
                    .await;
            }
            let _ = tx.send(SearchEvent::Finished(result)).await;
        });

        events
    }

    async fn recent_searches(&self) -> Result<Vec<RecentSearch>, ApiError> {
        self.get_json("/recent-searches").await.map_err(ApiError::HistoryLoad)
    }

    async fn stats(&self) -> Result<SystemStats, ApiError> {
        self.get_json("/stats").await.map_err(ApiError::StatsLoad)
    }

    async fn download_results(&self, face_ids: &[String]) -> Result<Vec<u8>, ApiError> {
        let url = self.config.endpoint("/download-results");
        let started = Instant::now();
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "face_ids": face_ids }))
            .send()
            .await
            .map_err(|e| ApiError::Download(describe(e)))?;
        let resp = check_status(resp, started).await.map_err(ApiError::Download)?;
        let body = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Download(describe(e)))?;
        Ok(body.to_vec())
    }

    async fn health(&self) -> Result<(), ApiError> {
        let health: Health = self.get_json("/health").await.map_err(ApiError::Unavailable)?;
        if health.status != "ok" {
            return Err(ApiError::Unavailable(format!("backend reports {:?}", health.status)));
        }
        Ok(())
    }
}

/// Bring detector boxes into fractional form. Pixel boxes are scaled by the
/// image size; boxes with nothing left inside the image are dropped.
pub fn normalize_faces(faces: Vec<DetectedFace>, width: u32, height: u32) -> Vec<DetectedFace> {
    faces
        .into_iter()
        .filter_map(|mut face| {
            if face.bounding_box.is_normalized() {
                return Some(face);
            }
            match face.bounding_box.to_fractions(width, height) {
                Some(bbox) => {
                    face.bounding_box = bbox;
                    Some(face)
                }
                None => {
                    tracing::warn!(
                        face = %face.id,
                        bbox = ?face.bounding_box,
                        width,
                        height,
                        "dropping face with box outside the image"
                    );
                    None
                }
            }
        })
        .collect()
}

async fn check_status(resp: Response, started: Instant) -> Result<Response, String> {
    let status = resp.status();
    tracing::debug!(
        url = %resp.url(),
        status = status.as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "backend response"
    );
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let body: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    if body.is_empty() {
        Err(format!("HTTP {status}"))
    } else {
        Err(format!("HTTP {status}: {body}"))
    }
}

fn describe(err: reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("could not connect: {err}")
    } else if err.is_decode() {
        format!("unexpected response body: {err}")
    } else {
        err.to_string()
    }
}
