//! Client-local developer settings.
//!
//! These only affect what a renderer shows. The similarity threshold is
//! adjustable but not sent to the backend and not applied to results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SIMILARITY_THRESHOLD_MIN: f32 = 0.2;
pub const SIMILARITY_THRESHOLD_MAX: f32 = 0.9;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.48;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    #[error("similarity threshold must be a finite number, got {0}")]
    NonFiniteThreshold(f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeveloperSettings {
    pub show_similarity_values: bool,
    pub show_routing_candidates: bool,
    pub show_rejected_results: bool,
    pub similarity_threshold: f32,
}

impl Default for DeveloperSettings {
    fn default() -> Self {
        Self {
            show_similarity_values: false,
            show_routing_candidates: false,
            show_rejected_results: false,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// A single named setting together with its new value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeveloperSetting {
    ShowSimilarityValues(bool),
    ShowRoutingCandidates(bool),
    ShowRejectedResults(bool),
    SimilarityThreshold(f32),
}

impl DeveloperSettings {
    /// Return a copy with exactly one field replaced.
    ///
    /// Thresholds outside [0.2, 0.9] are clamped into range.
    pub fn with(self, setting: DeveloperSetting) -> Result<Self, SettingsError> {
        let mut next = self;
        match setting {
            DeveloperSetting::ShowSimilarityValues(v) => next.show_similarity_values = v,
            DeveloperSetting::ShowRoutingCandidates(v) => next.show_routing_candidates = v,
            DeveloperSetting::ShowRejectedResults(v) => next.show_rejected_results = v,
            DeveloperSetting::SimilarityThreshold(v) => {
                next.similarity_threshold = clamp_threshold(v)?;
            }
        }
        Ok(next)
    }

    /// Bring settings from outside (a config file, a caller) into range.
    pub fn validated(self) -> Result<Self, SettingsError> {
        Ok(Self {
            similarity_threshold: clamp_threshold(self.similarity_threshold)?,
            ..self
        })
    }
}

fn clamp_threshold(value: f32) -> Result<f32, SettingsError> {
    if !value.is_finite() {
        return Err(SettingsError::NonFiniteThreshold(value));
    }
    Ok(value.clamp(SIMILARITY_THRESHOLD_MIN, SIMILARITY_THRESHOLD_MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = DeveloperSettings::default();
        assert!(!s.show_similarity_values);
        assert!(!s.show_routing_candidates);
        assert!(!s.show_rejected_results);
        assert_eq!(s.similarity_threshold, 0.48);
    }

    #[test]
    fn test_threshold_update_leaves_others_unchanged() {
        let before = DeveloperSettings {
            show_rejected_results: true,
            ..Default::default()
        };
        let after = before.with(DeveloperSetting::SimilarityThreshold(0.6)).unwrap();
        assert_eq!(after.similarity_threshold, 0.6);
        assert_eq!(after.show_similarity_values, before.show_similarity_values);
        assert_eq!(after.show_routing_candidates, before.show_routing_candidates);
        assert_eq!(after.show_rejected_results, before.show_rejected_results);
        // the original value is untouched
        assert_eq!(before.similarity_threshold, 0.48);
    }

    #[test]
    fn test_bool_updates() {
        let s = DeveloperSettings::default()
            .with(DeveloperSetting::ShowSimilarityValues(true))
            .unwrap()
            .with(DeveloperSetting::ShowRoutingCandidates(true))
            .unwrap();
        assert!(s.show_similarity_values);
        assert!(s.show_routing_candidates);
        assert!(!s.show_rejected_results);
    }

    #[test]
    fn test_threshold_clamped() {
        let s = DeveloperSettings::default();
        let low = s.with(DeveloperSetting::SimilarityThreshold(0.05)).unwrap();
        assert_eq!(low.similarity_threshold, SIMILARITY_THRESHOLD_MIN);
        let high = s.with(DeveloperSetting::SimilarityThreshold(1.5)).unwrap();
        assert_eq!(high.similarity_threshold, SIMILARITY_THRESHOLD_MAX);
    }

    #[test]
    fn test_validated_clamps_external_values() {
        let loaded = DeveloperSettings {
            show_rejected_results: true,
            similarity_threshold: 5.0,
            ..Default::default()
        };
        let s = loaded.validated().unwrap();
        assert_eq!(s.similarity_threshold, SIMILARITY_THRESHOLD_MAX);
        assert!(s.show_rejected_results);

        let ok = DeveloperSettings {
            similarity_threshold: 0.6,
            ..Default::default()
        };
        assert_eq!(ok.validated().unwrap(), ok);
    }

    #[test]
    fn test_validated_rejects_nan() {
        let loaded = DeveloperSettings {
            similarity_threshold: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            loaded.validated(),
            Err(SettingsError::NonFiniteThreshold(_))
        ));
    }

    #[test]
    fn test_threshold_nan_rejected() {
        let err = DeveloperSettings::default()
            .with(DeveloperSetting::SimilarityThreshold(f32::NAN))
            .unwrap_err();
        assert!(matches!(err, SettingsError::NonFiniteThreshold(_)));
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let s: DeveloperSettings =
            serde_json::from_str(r#"{"show_rejected_results": true}"#).unwrap();
        assert!(s.show_rejected_results);
        assert_eq!(s.similarity_threshold, DEFAULT_SIMILARITY_THRESHOLD);
    }
}
