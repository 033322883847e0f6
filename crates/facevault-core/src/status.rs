//! Search progress: phases, status snapshots, and the event stream a gateway
//! hands back for one search.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::api::ApiError;
use crate::types::SearchResponse;

/// Buffer between a gateway task and the consuming controller.
pub const SEARCH_EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchPhase {
    Idle,
    Uploading,
    Detecting,
    Computing,
    Routing,
    Searching,
    Filtering,
    Preparing,
    /// Coarse "backend is working" stage for gateways without stage detail.
    Processing,
    Complete,
    Error,
}

impl SearchPhase {
    /// The six backend stages, in the order a detailed gateway reports them.
    pub const STAGES: [SearchPhase; 6] = [
        SearchPhase::Detecting,
        SearchPhase::Computing,
        SearchPhase::Routing,
        SearchPhase::Searching,
        SearchPhase::Filtering,
        SearchPhase::Preparing,
    ];

    /// Position within one attempt. `Error` has no rank: it may follow any phase.
    pub fn rank(self) -> Option<u8> {
        Some(match self {
            SearchPhase::Idle => 0,
            SearchPhase::Uploading => 1,
            SearchPhase::Detecting => 2,
            SearchPhase::Computing => 3,
            SearchPhase::Routing => 4,
            SearchPhase::Searching => 5,
            SearchPhase::Filtering => 6,
            SearchPhase::Preparing => 7,
            SearchPhase::Processing => 8,
            SearchPhase::Complete => 9,
            SearchPhase::Error => return None,
        })
    }

    /// True while a search attempt is in flight.
    pub fn is_active(self) -> bool {
        !matches!(self, SearchPhase::Idle | SearchPhase::Complete | SearchPhase::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            SearchPhase::Idle => "Idle",
            SearchPhase::Uploading => "Uploading image",
            SearchPhase::Detecting => "Detecting face",
            SearchPhase::Computing => "Computing embedding",
            SearchPhase::Routing => "Routing to identity",
            SearchPhase::Searching => "Searching identity pool",
            SearchPhase::Filtering => "Filtering results",
            SearchPhase::Preparing => "Preparing results",
            SearchPhase::Processing => "Processing results",
            SearchPhase::Complete => "Complete",
            SearchPhase::Error => "Error",
        }
    }
}

/// Phase, percentage, and a user-facing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub phase: SearchPhase,
    /// Percentage in [0, 100].
    pub progress: f32,
    pub message: String,
}

impl SearchStatus {
    pub fn new(phase: SearchPhase, progress: f32, message: impl Into<String>) -> Self {
        Self {
            phase,
            progress,
            message: message.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new(SearchPhase::Idle, 0.0, "")
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(SearchPhase::Error, 0.0, message)
    }
}

impl Default for SearchStatus {
    fn default() -> Self {
        Self::idle()
    }
}

/// One item of a search's event stream.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Progress(SearchStatus),
    /// Always the last event of a well-behaved stream.
    Finished(Result<SearchResponse, ApiError>),
}

/// Ordered, lazily produced events for one search request.
///
/// Dropping the stream does not cancel the request behind it; the producer
/// just finds nobody listening.
#[derive(Debug)]
pub struct SearchEvents {
    rx: mpsc::Receiver<SearchEvent>,
}

impl SearchEvents {
    /// Create a connected sender/stream pair.
    pub fn channel() -> (mpsc::Sender<SearchEvent>, Self) {
        let (tx, rx) = mpsc::channel(SEARCH_EVENT_BUFFER);
        (tx, Self { rx })
    }

    /// A stream that replays a fixed list of events.
    pub fn from_events(events: Vec<SearchEvent>) -> Self {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // capacity covers every event, so try_send cannot fill up
            let _ = tx.try_send(event);
        }
        Self { rx }
    }

    /// Next event, or `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<SearchEvent> {
        self.rx.recv().await
    }
}
