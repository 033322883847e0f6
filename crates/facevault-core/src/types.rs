use serde::{Deserialize, Serialize};

use crate::settings::DeveloperSettings;

/// Face bounding box as fractions of the image dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// True when every field lies in [0, 1] and the box has a non-zero area.
    pub fn is_normalized(&self) -> bool {
        let unit = |v: f32| (0.0..=1.0).contains(&v);
        unit(self.x)
            && unit(self.y)
            && unit(self.width)
            && unit(self.height)
            && self.width > 0.0
            && self.height > 0.0
    }

    /// Convert a pixel-space box into fractions of a `width`×`height` image.
    ///
    /// The box is clipped to the image first, so a detector box that spills
    /// over an edge still yields a valid fractional box. Returns `None` when
    /// the image has no area or nothing of the box remains after clipping.
    pub fn to_fractions(self, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let (w, h) = (width as f32, height as f32);

        let x0 = self.x.clamp(0.0, w);
        let y0 = self.y.clamp(0.0, h);
        let x1 = (self.x + self.width).clamp(0.0, w);
        let y1 = (self.y + self.height).clamp(0.0, h);

        let normalized = Self {
            x: x0 / w,
            y: y0 / h,
            width: (x1 - x0) / w,
            height: (y1 - y0) / h,
        };
        normalized.is_normalized().then_some(normalized)
    }
}

/// A face found by the backend detector.
///
/// Ids are unique within one detection result, not globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub id: String,
    #[serde(rename = "boundingBox")]
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// Backend decision on which identity (if any) a face belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStatus {
    Accepted,
    Ambiguous,
    #[serde(alias = "gray_zone")]
    LowConfidence,
    #[serde(alias = "new_identity")]
    NoMatch,
}

impl RoutingStatus {
    /// Short label for tables.
    pub fn label(self) -> &'static str {
        match self {
            RoutingStatus::Accepted => "Accepted",
            RoutingStatus::Ambiguous => "Ambiguous",
            RoutingStatus::LowConfidence => "Low Conf.",
            RoutingStatus::NoMatch => "No Match",
        }
    }

    /// Caveat shown next to a result set, `None` for accepted routings.
    pub fn warning(self) -> Option<(&'static str, &'static str)> {
        match self {
            RoutingStatus::Accepted => None,
            RoutingStatus::Ambiguous => Some((
                "Ambiguous Results",
                "Results may include visually similar identities. Manual review is recommended.",
            )),
            RoutingStatus::LowConfidence => Some((
                "Low Confidence",
                "Identity confidence is weak; treat results as exploratory.",
            )),
            RoutingStatus::NoMatch => Some((
                "No Match Found",
                "This face does not match any known identity in the database.",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub identity_id: String,
    pub status: RoutingStatus,
    pub similarity: f32,
    pub margin: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub centroid_similarity: f32,
    pub threshold_used: f32,
    pub precision_estimate: f32,
    pub flagged_unreliable: bool,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Confidence bucket assigned by the backend. Never recomputed client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultGroup {
    HighConfidence,
    Borderline,
    Rejected,
}

/// One matched photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub face_id: String,
    /// Usually relative to the API root, e.g. `/api/v1/photo/<face_id>`.
    pub photo_url: String,
    pub cosine_similarity: f32,
    pub centroid_similarity: f32,
    pub identity_id: String,
    pub group: ResultGroup,
}

/// Snapshot of one completed search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query_id: String,
    pub faces_detected: u32,
    pub routing: RoutingInfo,
    /// Absent when routing found no identity to search within.
    #[serde(default)]
    pub cluster: Option<ClusterInfo>,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    /// Partition results by their backend group, preserving order.
    pub fn grouped(&self) -> ResultGroups<'_> {
        let mut groups = ResultGroups::default();
        for result in &self.results {
            match result.group {
                ResultGroup::HighConfidence => groups.high_confidence.push(result),
                ResultGroup::Borderline => groups.borderline.push(result),
                ResultGroup::Rejected => groups.rejected.push(result),
            }
        }
        groups
    }

    /// Results a renderer should list under the given developer settings.
    pub fn visible_results(&self, settings: &DeveloperSettings) -> Vec<&SearchResult> {
        self.results
            .iter()
            .filter(|r| settings.show_rejected_results || r.group != ResultGroup::Rejected)
            .collect()
    }

    /// Face ids eligible for archive export.
    pub fn face_ids(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| !r.face_id.is_empty())
            .map(|r| r.face_id.clone())
            .collect()
    }
}

/// Borrowed view of a response's results, split by group.
#[derive(Debug, Default)]
pub struct ResultGroups<'a> {
    pub high_confidence: Vec<&'a SearchResult>,
    pub borderline: Vec<&'a SearchResult>,
    pub rejected: Vec<&'a SearchResult>,
}

/// One row of the backend's recent-query log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentSearch {
    pub timestamp: String,
    pub status: RoutingStatus,
    pub precision: f64,
    #[serde(default)]
    pub identity: Option<String>,
}

/// Aggregate query statistics over the backend's reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub total_queries: u64,
    /// Fraction in [0, 1].
    pub avg_precision: f64,
    /// Already a percentage.
    pub ambiguous_rate: f64,
    pub new_identities: u64,
}
