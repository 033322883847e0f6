//! HttpApi against an in-process axum server shaped like the backend.

use axum::extract::Multipart;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use facevault_client::{Config, HttpApi};
use facevault_core::dashboard::{load_recent_searches, load_stats};
use facevault_core::status::{SearchEvent, SearchPhase};
use facevault_core::upload::test_png;
use facevault_core::{
    ApiError, FaceVaultApi, RoutingStatus, SessionController, SessionError, UploadedImage,
};
use serde_json::{json, Value};

const EMPTY_ZIP: &[u8] = b"PK\x05\x06\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0";

struct Form {
    image_len: usize,
    face_id: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<Form, StatusCode> {
    let mut form = Form {
        image_len: 0,
        face_id: None,
    };
    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                form.image_len = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?.len();
            }
            Some("face_id") => form.face_id = field.text().await.ok(),
            _ => {}
        }
    }
    if form.image_len == 0 {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    Ok(form)
}

async fn detect_faces(multipart: Multipart) -> Result<Json<Value>, StatusCode> {
    read_form(multipart).await?;
    // pixel boxes, as the MTCNN backend reports them
    Ok(Json(json!([
        {"id": "2b7c", "confidence": 0.99,
         "boundingBox": {"x": 160, "y": 120, "width": 64, "height": 96}},
        {"id": "off-frame", "confidence": 0.71,
         "boundingBox": {"x": 900, "y": 10, "width": 40, "height": 40}}
    ])))
}

async fn search(multipart: Multipart) -> Result<Json<Value>, StatusCode> {
    let form = read_form(multipart).await?;
    let face_id = form.face_id.unwrap_or_default();
    Ok(Json(json!({
        "query_id": format!("q-{face_id}"),
        "faces_detected": 1,
        "routing": {
            "status": "accepted",
            "identity_id": "n000231",
            "similarity": 0.83,
            "margin": 0.12,
            "best_sim": 0.83
        },
        "cluster": {
            "centroid_similarity": 0.74,
            "threshold_used": 0.55,
            "precision_estimate": 0.96,
            "flagged_unreliable": false,
            "flags": []
        },
        "results": [
            {"face_id": "1042", "photo_url": "/api/v1/photo/1042", "cosine_similarity": 0.91,
             "centroid_similarity": 0.8, "identity_id": "n000231", "group": "high_confidence"},
            {"face_id": "1043", "photo_url": "/api/v1/photo/1043", "cosine_similarity": 0.58,
             "centroid_similarity": 0.5, "identity_id": "n000231", "group": "borderline"}
        ]
    })))
}

async fn recent_searches() -> Json<Value> {
    Json(json!([
        {"timestamp": "2026-03-10T09:00:00.000001", "status": "accepted",
         "precision": 0.97, "identity": "n000231"},
        {"timestamp": "2026-03-10T11:00:00.000001", "status": "gray_zone",
         "precision": 0.61, "identity": "n000017"},
        {"timestamp": "2026-03-10T10:00:00.000001", "status": "new_identity",
         "precision": 0.0, "identity": null}
    ]))
}

async fn stats() -> Json<Value> {
    Json(json!({
        "total_queries": 3,
        "avg_precision": 0.527,
        "ambiguous_rate": 0.0,
        "new_identities": 1
    }))
}

async fn download_results(Json(body): Json<Value>) -> impl IntoResponse {
    let ids = body["face_ids"].as_array().map(Vec::len).unwrap_or(0);
    if ids == 0 {
        return (StatusCode::BAD_REQUEST, "no_face_ids_provided").into_response();
    }
    ([(header::CONTENT_TYPE, "application/zip")], EMPTY_ZIP.to_vec()).into_response()
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn broken() -> impl IntoResponse {
    (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded")
}

fn backend() -> Router {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .route("/detect-faces", post(detect_faces))
            .route("/search", post(search))
            .route("/recent-searches", get(recent_searches))
            .route("/stats", get(stats))
            .route("/download-results", post(download_results))
            .route("/health", get(health)),
    )
}

fn broken_backend() -> Router {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .route("/detect-faces", post(broken))
            .route("/search", post(broken))
            .route("/stats", get(broken))
            .route("/health", get(broken)),
    )
}

async fn serve(router: Router) -> HttpApi {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    http_api(format!("http://{addr}/api/v1/"))
}

fn http_api(url: String) -> HttpApi {
    let config = Config {
        api_root: facevault_client::config::normalize_api_root(&url).unwrap(),
        request_timeout_secs: 5,
        ..Default::default()
    };
    HttpApi::new(config).unwrap()
}

/// A root nothing listens on.
async fn dead_api() -> HttpApi {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    http_api(format!("http://{addr}"))
}

fn query_image() -> UploadedImage {
    UploadedImage::from_bytes("query.png", test_png(640, 480)).unwrap()
}

#[tokio::test]
async fn test_detect_normalizes_pixel_boxes() {
    let api = serve(backend()).await;
    let faces = api.detect_faces(&query_image()).await.unwrap();

    assert_eq!(faces.len(), 1, "the off-frame box is dropped");
    let b = faces[0].bounding_box;
    assert!(b.is_normalized());
    assert!((b.x - 0.25).abs() < 1e-6);
    assert!((b.y - 0.25).abs() < 1e-6);
    assert!((b.width - 0.1).abs() < 1e-6);
    assert!((b.height - 0.2).abs() < 1e-6);
}

#[tokio::test]
async fn test_search_event_sequence() {
    let api = serve(backend()).await;
    let mut events = api.search_identity(&query_image(), "2b7c");

    let mut progress = Vec::new();
    let mut finished = None;
    while let Some(event) = events.next().await {
        match event {
            SearchEvent::Progress(s) => progress.push((s.phase, s.progress)),
            SearchEvent::Finished(r) => finished = Some(r),
        }
    }

    assert_eq!(
        progress,
        [(SearchPhase::Uploading, 20.0), (SearchPhase::Processing, 60.0)]
    );
    let response = finished.unwrap().unwrap();
    assert_eq!(response.query_id, "q-2b7c", "face_id rides along in the form");
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn test_search_failure_reports_error_then_finishes() {
    let api = serve(broken_backend()).await;
    let mut events = api.search_identity(&query_image(), "2b7c");

    let mut seen = Vec::new();
    while let Some(event) = events.next().await {
        seen.push(event);
    }

    assert_eq!(seen.len(), 3);
    assert!(matches!(&seen[0], SearchEvent::Progress(s) if s.phase == SearchPhase::Uploading));
    assert!(matches!(&seen[1], SearchEvent::Progress(s)
        if s.phase == SearchPhase::Error && s.progress == 0.0 && s.message == "Search failed"));
    match &seen[2] {
        SearchEvent::Finished(Err(ApiError::Search(msg))) => assert!(msg.contains("500"), "{msg}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_full_session_over_http() {
    let api = serve(backend()).await;
    let mut session = SessionController::new(api);
    let mut statuses = session.subscribe_status();

    session.upload(query_image()).await.unwrap();
    assert_eq!(session.snapshot().selected_face.as_deref(), Some("2b7c"));

    let response = session.search().await.unwrap();
    assert_eq!(response.routing.status, RoutingStatus::Accepted);

    let mut phases = Vec::new();
    while let Ok(s) = statuses.try_recv() {
        phases.push((s.phase, s.progress));
    }
    assert_eq!(
        phases,
        [
            (SearchPhase::Idle, 0.0),
            (SearchPhase::Uploading, 0.0),
            (SearchPhase::Uploading, 20.0),
            (SearchPhase::Processing, 60.0),
            (SearchPhase::Complete, 100.0),
        ]
    );

    let archive = session.download_results().await.unwrap();
    assert_eq!(archive, EMPTY_ZIP);

    let photo = session.api().config().photo_url(&response.results[0].photo_url);
    assert!(photo.starts_with("http://127.0.0.1:"));
    assert!(photo.ends_with("/api/v1/photo/1042"));
}

#[tokio::test]
async fn test_detection_failure_over_http() {
    let api = serve(broken_backend()).await;
    let mut session = SessionController::new(api);
    let err = session.upload(query_image()).await.unwrap_err();
    assert!(matches!(err, SessionError::Detection(ApiError::Detection(_))));
    assert!(!session.snapshot().no_faces_found());
}

#[tokio::test]
async fn test_dashboard_data() {
    let api = serve(backend()).await;

    let recent = load_recent_searches(&api).await;
    let statuses: Vec<_> = recent.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        [RoutingStatus::LowConfidence, RoutingStatus::NoMatch, RoutingStatus::Accepted]
    );

    let stats = load_stats(&api).await.unwrap();
    assert_eq!(stats.total_queries, 3);
    assert_eq!(stats.new_identities, 1);

    api.health().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_degrades() {
    let api = dead_api().await;
    assert!(load_recent_searches(&api).await.is_empty());
    assert!(load_stats(&api).await.is_none());
    assert!(matches!(api.recent_searches().await, Err(ApiError::HistoryLoad(_))));
    assert!(matches!(api.health().await, Err(ApiError::Unavailable(_))));
}

#[tokio::test]
async fn test_error_statuses_map_to_operation() {
    let api = serve(broken_backend()).await;
    assert!(matches!(
        api.stats().await,
        Err(ApiError::StatsLoad(msg)) if msg.contains("model not loaded")
    ));
    assert!(matches!(api.health().await, Err(ApiError::Unavailable(_))));
    // no route at all is still a history error, not a panic
    assert!(matches!(api.recent_searches().await, Err(ApiError::HistoryLoad(_))));
}

#[tokio::test]
async fn test_download_empty_ids_rejected_by_backend() {
    let api = serve(backend()).await;
    let err = api.download_results(&[]).await.unwrap_err();
    assert!(matches!(err, ApiError::Download(msg) if msg.contains("400")));
}
