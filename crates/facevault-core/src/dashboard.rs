//! Recent-search history and system statistics for the idle dashboard.
//!
//! Both are best effort: a failed load is logged and shown as empty or as
//! placeholders, never surfaced as an error.

use chrono::{DateTime, Utc};

use crate::api::FaceVaultApi;
use crate::types::{RecentSearch, SystemStats};

/// Shown wherever a value is missing or unparseable.
pub const PLACEHOLDER: &str = "—";

/// Recent searches, newest first. Empty when the backend can't be reached.
pub async fn load_recent_searches<A: FaceVaultApi>(api: &A) -> Vec<RecentSearch> {
    match api.recent_searches().await {
        Ok(mut rows) => {
            // unparseable timestamps sink to the bottom
            rows.sort_by(|a, b| {
                let ta = parse_utc_timestamp(&a.timestamp);
                let tb = parse_utc_timestamp(&b.timestamp);
                tb.cmp(&ta)
            });
            tracing::debug!(count = rows.len(), "recent searches loaded");
            rows
        }
        Err(err) => {
            tracing::warn!(error = %err, "recent searches unavailable");
            Vec::new()
        }
    }
}

/// System statistics, or `None` when they can't be loaded.
pub async fn load_stats<A: FaceVaultApi>(api: &A) -> Option<SystemStats> {
    match api.stats().await {
        Ok(stats) => Some(stats),
        Err(err) => {
            tracing::warn!(error = %err, "system stats unavailable");
            None
        }
    }
}

/// Parse a backend timestamp. Timestamps without a zone are UTC.
pub fn parse_utc_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    if ts.ends_with('Z') || ts.contains('+') {
        return None;
    }
    DateTime::parse_from_rfc3339(&format!("{ts}Z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Coarse relative age such as "5 mins ago".
pub fn time_ago(ts: &str, now: DateTime<Utc>) -> String {
    let Some(then) = parse_utc_timestamp(ts) else {
        return PLACEHOLDER.to_string();
    };

    let mins = (now - then).num_minutes();
    if mins < 1 {
        return "just now".to_string();
    }
    if mins < 60 {
        return format!("{mins} mins ago");
    }
    let hours = mins / 60;
    if hours < 24 {
        return format!("{hours} hours ago");
    }
    format!("{} days ago", hours / 24)
}

/// A fraction in [0, 1] as a whole percentage, e.g. `0.974` → "97%".
pub fn whole_percent(fraction: f64) -> String {
    format!("{:.0}%", (fraction * 100.0).round())
}

/// Display strings for the four stat cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsView {
    pub total_queries: String,
    pub avg_precision: String,
    pub ambiguous_rate: String,
    pub new_identities: String,
}

impl StatsView {
    pub fn placeholder() -> Self {
        Self {
            total_queries: PLACEHOLDER.to_string(),
            avg_precision: PLACEHOLDER.to_string(),
            ambiguous_rate: PLACEHOLDER.to_string(),
            new_identities: PLACEHOLDER.to_string(),
        }
    }

    pub fn from_stats(stats: Option<&SystemStats>) -> Self {
        let Some(stats) = stats else {
            return Self::placeholder();
        };
        Self {
            total_queries: group_thousands(stats.total_queries),
            // avg_precision is a fraction, ambiguous_rate is already a percentage
            avg_precision: format!("{:.1}%", stats.avg_precision * 100.0),
            ambiguous_rate: format!("{:.1}%", stats.ambiguous_rate),
            new_identities: stats.new_identities.to_string(),
        }
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
