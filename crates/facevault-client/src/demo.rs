//! Offline gateway that stands in for the backend.
//!
//! Detection returns fixed fractional boxes, search walks the six backend
//! stages with a configurable delay, and every completed search is logged
//! newest first in an in-memory history that feeds `recent_searches` and
//! `stats`. Stats follow the backend's rules: the ambiguous rate counts
//! ambiguous and low-confidence routings, and new identities counts the
//! distinct identities searches were routed to.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use facevault_core::status::{SearchEvent, SearchEvents, SearchPhase, SearchStatus};
use facevault_core::{
    ApiError, BoundingBox, ClusterInfo, DetectedFace, FaceVaultApi, RecentSearch, ResultGroup,
    RoutingInfo, RoutingStatus, SearchResponse, SearchResult, SystemStats, UploadedImage,
};
use uuid::Uuid;

/// Rows kept in the demo history, matching the backend's log size.
const HISTORY_LIMIT: usize = 100;
const DEMO_IDENTITY: &str = "n000231";
const DEMO_THRESHOLD: f32 = 0.48;
const DEMO_CONFIDENCES: [f32; 3] = [0.95, 0.93, 0.91];

#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Faces "found" in every image, clamped to 1..=3.
    pub face_count: usize,
    /// Pause after detection and after each search stage.
    pub stage_delay: Duration,
    /// Routing outcome of every search.
    pub routing: RoutingStatus,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            face_count: 1,
            stage_delay: Duration::from_millis(400),
            routing: RoutingStatus::Accepted,
        }
    }
}

/// One logged search. `row.identity` is hidden for no-match routings, so
/// the routing identity is kept alongside it for stats.
#[derive(Debug, Clone)]
struct LogEntry {
    row: RecentSearch,
    routed_to: String,
}

#[derive(Debug, Clone)]
pub struct DemoApi {
    options: DemoOptions,
    history: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl DemoApi {
    pub fn new(options: DemoOptions) -> Self {
        Self {
            options,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Zero delays, for tests.
    pub fn instant(face_count: usize, routing: RoutingStatus) -> Self {
        Self::new(DemoOptions {
            face_count,
            stage_delay: Duration::ZERO,
            routing,
        })
    }

    pub fn options(&self) -> &DemoOptions {
        &self.options
    }

    fn record(&self, response: &SearchResponse) {
        let row = RecentSearch {
            timestamp: Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            status: response.routing.status,
            precision: response
                .cluster
                .as_ref()
                .map_or(0.0, |c| f64::from(c.precision_estimate)),
            identity: match response.routing.status {
                RoutingStatus::NoMatch => None,
                _ => Some(response.routing.identity_id.clone()),
            },
        };
        let entry = LogEntry {
            row,
            routed_to: response.routing.identity_id.clone(),
        };
        let Ok(mut history) = self.history.lock() else {
            tracing::warn!("demo history lock poisoned; search not recorded");
            return;
        };
        if history.len() == HISTORY_LIMIT {
            history.pop_back();
        }
        history.push_front(entry);
    }
}

impl Default for DemoApi {
    fn default() -> Self {
        Self::new(DemoOptions::default())
    }
}

impl FaceVaultApi for DemoApi {
    async fn detect_faces(&self, image: &UploadedImage) -> Result<Vec<DetectedFace>, ApiError> {
        tokio::time::sleep(self.options.stage_delay).await;
        let count = self.options.face_count.clamp(1, 3);
        tracing::debug!(file = image.file_name(), count, "demo detection");
        Ok(demo_faces(count))
    }

    fn search_identity(&self, image: &UploadedImage, face_id: &str) -> SearchEvents {
        let (tx, events) = SearchEvents::channel();
        let api = self.clone();
        tracing::debug!(file = image.file_name(), face = face_id, "demo search");

        tokio::spawn(async move {
            let step = 100.0 / SearchPhase::STAGES.len() as f32;
            for (i, stage) in SearchPhase::STAGES.into_iter().enumerate() {
                let message = format!("{}...", stage.label());
                let status = SearchStatus::new(stage, i as f32 * step, message);
                if tx.send(SearchEvent::Progress(status)).await.is_err() {
                    return;
                }
                tokio::time::sleep(api.options.stage_delay).await;
            }

            let response = demo_response(api.options.routing);
            api.record(&response);
            let _ = tx.send(SearchEvent::Finished(Ok(response))).await;
        });

        events
    }

    async fn recent_searches(&self) -> Result<Vec<RecentSearch>, ApiError> {
        let history = self
            .history
            .lock()
            .map_err(|_| ApiError::HistoryLoad("demo history unavailable".into()))?;
        Ok(history.iter().map(|entry| entry.row.clone()).collect())
    }

    async fn stats(&self) -> Result<SystemStats, ApiError> {
        let history = self
            .history
            .lock()
            .map_err(|_| ApiError::StatsLoad("demo history unavailable".into()))?;
        Ok(summarize(history.iter()))
    }

    async fn download_results(&self, _face_ids: &[String]) -> Result<Vec<u8>, ApiError> {
        Err(ApiError::Download("photo archives are not available in demo mode".into()))
    }

    async fn health(&self) -> Result<(), ApiError> {
        Ok(())
    }
}

fn demo_faces(count: usize) -> Vec<DetectedFace> {
    DEMO_CONFIDENCES
        .into_iter()
        .take(count)
        .enumerate()
        .map(|(i, confidence)| DetectedFace {
            id: format!("face-{}", i + 1),
            bounding_box: BoundingBox {
                x: 0.2 + i as f32 * 0.25,
                y: 0.15 + (i % 2) as f32 * 0.05,
                width: 0.2,
                height: 0.28,
            },
            confidence,
        })
        .collect()
}

fn demo_response(status: RoutingStatus) -> SearchResponse {
    let cluster = match status {
        RoutingStatus::NoMatch => None,
        _ => Some(ClusterInfo {
            centroid_similarity: 0.78,
            threshold_used: DEMO_THRESHOLD,
            precision_estimate: if status == RoutingStatus::Accepted { 0.97 } else { 0.78 },
            flagged_unreliable: status == RoutingStatus::LowConfidence,
            flags: match status {
                RoutingStatus::Ambiguous => vec!["multiple_close_identities".to_string()],
                RoutingStatus::LowConfidence => {
                    vec!["low_confidence_identity_assignment".to_string()]
                }
                _ => Vec::new(),
            },
        }),
    };

    SearchResponse {
        query_id: Uuid::new_v4().to_string(),
        faces_detected: 1,
        routing: RoutingInfo {
            identity_id: DEMO_IDENTITY.to_string(),
            status,
            similarity: match status {
                RoutingStatus::Accepted => 0.84,
                RoutingStatus::Ambiguous => 0.71,
                RoutingStatus::LowConfidence => 0.52,
                RoutingStatus::NoMatch => 0.31,
            },
            margin: if status == RoutingStatus::Ambiguous { 0.02 } else { 0.08 },
        },
        cluster,
        results: demo_results(status),
    }
}

/// 60% high confidence, 30% borderline, 10% rejected, strongest first.
fn demo_results(status: RoutingStatus) -> Vec<SearchResult> {
    let total = match status {
        RoutingStatus::Accepted => 25,
        RoutingStatus::Ambiguous => 15,
        RoutingStatus::LowConfidence => 5,
        RoutingStatus::NoMatch => return Vec::new(),
    };

    let buckets = [
        (ResultGroup::HighConfidence, total * 6 / 10, 0.94_f32, 0.82_f32),
        (ResultGroup::Borderline, total * 3 / 10, 0.70, 0.55),
        (ResultGroup::Rejected, total / 10, 0.50, 0.35),
    ];

    let mut results = Vec::new();
    for (group, count, hi, lo) in buckets {
        for i in 0..count {
            let t = if count > 1 { i as f32 / (count - 1) as f32 } else { 0.0 };
            let cosine = hi - (hi - lo) * t;
            let face_id = format!("demo-{:04}", results.len() + 1);
            results.push(SearchResult {
                photo_url: format!("/api/v1/photo/{face_id}"),
                face_id,
                cosine_similarity: cosine,
                centroid_similarity: cosine - 0.06,
                identity_id: if group == ResultGroup::Rejected {
                    format!("n000{}", 232 + i)
                } else {
                    DEMO_IDENTITY.to_string()
                },
                group,
            });
        }
    }
    results
}

fn summarize<'a>(entries: impl Iterator<Item = &'a LogEntry>) -> SystemStats {
    let mut total = 0u64;
    let mut precision_sum = 0.0;
    let mut ambiguous = 0u64;
    let mut identities = HashSet::new();
    for entry in entries {
        total += 1;
        precision_sum += entry.row.precision;
        if matches!(
            entry.row.status,
            RoutingStatus::Ambiguous | RoutingStatus::LowConfidence
        ) {
            ambiguous += 1;
        }
        identities.insert(entry.routed_to.as_str());
    }

    if total == 0 {
        return SystemStats {
            total_queries: 0,
            avg_precision: 0.0,
            ambiguous_rate: 0.0,
            new_identities: 0,
        };
    }
    SystemStats {
        total_queries: total,
        avg_precision: precision_sum / total as f64,
        ambiguous_rate: ambiguous as f64 * 100.0 / total as f64,
        new_identities: identities.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facevault_core::upload::test_png;
    use facevault_core::SessionController;

    fn image() -> UploadedImage {
        UploadedImage::from_bytes("demo.png", test_png(16, 16)).unwrap()
    }

    #[tokio::test]
    async fn test_demo_faces() {
        let api = DemoApi::instant(3, RoutingStatus::Accepted);
        let faces = api.detect_faces(&image()).await.unwrap();
        let confidences: Vec<f32> = faces.iter().map(|f| f.confidence).collect();
        assert_eq!(confidences, [0.95, 0.93, 0.91]);
        assert!(faces.iter().all(|f| f.bounding_box.is_normalized()));

        let api = DemoApi::instant(9, RoutingStatus::Accepted);
        assert_eq!(api.detect_faces(&image()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_demo_search_walks_stages() {
        let api = DemoApi::instant(1, RoutingStatus::Accepted);
        let mut events = api.search_identity(&image(), "face-1");

        let mut phases = Vec::new();
        let mut last_progress = -1.0;
        let mut response = None;
        while let Some(event) = events.next().await {
            match event {
                SearchEvent::Progress(s) => {
                    assert!(s.progress > last_progress);
                    last_progress = s.progress;
                    phases.push(s.phase);
                }
                SearchEvent::Finished(r) => response = Some(r.unwrap()),
            }
        }
        assert_eq!(phases, SearchPhase::STAGES);
        assert!(last_progress < 100.0);
        assert_eq!(response.unwrap().routing.status, RoutingStatus::Accepted);
    }

    #[test]
    fn test_demo_result_split() {
        let groups = |status| {
            let r = demo_results(status);
            let count = |g| r.iter().filter(|x| x.group == g).count();
            (
                count(ResultGroup::HighConfidence),
                count(ResultGroup::Borderline),
                count(ResultGroup::Rejected),
            )
        };
        assert_eq!(groups(RoutingStatus::Accepted), (15, 7, 2));
        assert_eq!(groups(RoutingStatus::Ambiguous), (9, 4, 1));
        assert_eq!(groups(RoutingStatus::LowConfidence), (3, 1, 0));
        assert_eq!(groups(RoutingStatus::NoMatch), (0, 0, 0));
    }

    #[test]
    fn test_no_match_has_no_cluster() {
        let resp = demo_response(RoutingStatus::NoMatch);
        assert!(resp.cluster.is_none());
        assert!(resp.results.is_empty());
    }

    #[tokio::test]
    async fn test_history_feeds_stats() {
        let api = DemoApi::instant(1, RoutingStatus::Ambiguous);
        let empty = api.stats().await.unwrap();
        assert_eq!(empty.total_queries, 0);

        let mut session = SessionController::new(api.clone());
        session.upload(image()).await.unwrap();
        session.search().await.unwrap();
        session.search().await.unwrap();

        let recent = api.recent_searches().await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, RoutingStatus::Ambiguous);
        assert_eq!(recent[0].identity.as_deref(), Some(DEMO_IDENTITY));

        let stats = api.stats().await.unwrap();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.ambiguous_rate, 100.0);
        assert!((stats.avg_precision - 0.78).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let api = DemoApi::instant(1, RoutingStatus::Accepted);
        for _ in 0..HISTORY_LIMIT + 5 {
            api.record(&demo_response(RoutingStatus::Accepted));
        }
        assert_eq!(api.recent_searches().await.unwrap().len(), HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let api = DemoApi::instant(1, RoutingStatus::Accepted);
        api.record(&demo_response(RoutingStatus::Accepted));
        api.record(&demo_response(RoutingStatus::NoMatch));

        let recent = api.recent_searches().await.unwrap();
        let statuses: Vec<_> = recent.iter().map(|r| r.status).collect();
        assert_eq!(statuses, [RoutingStatus::NoMatch, RoutingStatus::Accepted]);
        assert_eq!(recent[0].identity, None);
        assert_eq!(recent[1].identity.as_deref(), Some(DEMO_IDENTITY));
    }

    #[tokio::test]
    async fn test_full_history_drops_oldest() {
        let api = DemoApi::instant(1, RoutingStatus::Accepted);
        api.record(&demo_response(RoutingStatus::NoMatch));
        for _ in 0..HISTORY_LIMIT {
            api.record(&demo_response(RoutingStatus::Accepted));
        }
        let recent = api.recent_searches().await.unwrap();
        assert_eq!(recent.len(), HISTORY_LIMIT);
        assert!(recent.iter().all(|r| r.status == RoutingStatus::Accepted));
    }

    #[tokio::test]
    async fn test_stats_follow_backend_rules() {
        let api = DemoApi::instant(1, RoutingStatus::Accepted);
        let routed = |status, identity: &str| {
            let mut response = demo_response(status);
            response.routing.identity_id = identity.to_string();
            response
        };
        api.record(&routed(RoutingStatus::Accepted, "n000231"));
        api.record(&routed(RoutingStatus::Ambiguous, "n000231"));
        api.record(&routed(RoutingStatus::LowConfidence, "n000487"));
        api.record(&routed(RoutingStatus::NoMatch, "n000900"));

        let stats = api.stats().await.unwrap();
        assert_eq!(stats.total_queries, 4);
        assert_eq!(stats.ambiguous_rate, 50.0);
        assert_eq!(stats.new_identities, 3);
    }

    #[tokio::test]
    async fn test_download_unavailable() {
        let api = DemoApi::default();
        let err = api.download_results(&["demo-0001".into()]).await.unwrap_err();
        assert!(matches!(err, ApiError::Download(_)));
    }
}
