// Progress event types broadcast to subscribers
//
// Events are totally ordered per session. Progress is monotonically
// non-decreasing until the terminal event, except that an error event may
// appear at any time without advancing progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ErrorKind;
use super::session::ResearchStage;

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    /// Stage/percentage advanced
    ProgressUpdate,
    /// The engine is waiting on an LLM call
    ProgressThinking,
    /// A researcher slot is querying the web
    ProgressSearching,
    /// Terminal: the final report is ready
    ResearchComplete,
    /// Terminal (or informational): something went wrong
    Error,
}

impl ProgressEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventType::ProgressUpdate => "progress_update",
            ProgressEventType::ProgressThinking => "progress_thinking",
            ProgressEventType::ProgressSearching => "progress_searching",
            ProgressEventType::ResearchComplete => "research_complete",
            ProgressEventType::Error => "error",
        }
    }
}

impl std::fmt::Display for ProgressEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Free-form narration attached to thinking/searching events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    /// Short human-readable message, localized to the session language
    pub message: String,
    /// Longer description, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 1-based index of the item being worked on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<usize>,
    /// Total items in the current batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<usize>,
    /// Number of search results found, for searching events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_found: Option<usize>,
}

impl EventDetail {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Error payload carried on error events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventError {
    pub kind: ErrorKind,
    pub message: String,
}

/// A structured progress record published on the progress bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Session this event belongs to
    pub session_id: String,
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    /// Stage at publish time
    pub stage: ResearchStage,
    /// Overall progress percentage, 0..=100
    pub progress: u8,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    /// Optional narration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<EventDetail>,
    /// Error payload, present on error events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
}

impl ProgressEvent {
    pub fn new(
        session_id: impl Into<String>,
        event_type: ProgressEventType,
        stage: ResearchStage,
        progress: u8,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            event_type,
            stage,
            progress,
            timestamp: Utc::now(),
            detail: None,
            error: None,
        }
    }

    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn with_error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error = Some(EventError {
            kind,
            message: message.into(),
        });
        self
    }

    /// Terminal events are never dropped by the bus and end the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            ProgressEventType::ResearchComplete | ProgressEventType::Error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&ProgressEventType::ProgressSearching).unwrap(),
            "\"progress_searching\""
        );
        assert_eq!(
            serde_json::to_string(&ProgressEventType::ResearchComplete).unwrap(),
            "\"research_complete\""
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = ProgressEvent::new(
            "research-1",
            ProgressEventType::ProgressUpdate,
            ResearchStage::Brief,
            40,
        )
        .with_detail(EventDetail::message("writing brief"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sessionId"], "research-1");
        assert_eq!(json["type"], "progress_update");
        assert_eq!(json["stage"], "brief");
        assert_eq!(json["progress"], 40);
        assert_eq!(json["detail"]["message"], "writing brief");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_terminal_detection() {
        let complete = ProgressEvent::new(
            "s",
            ProgressEventType::ResearchComplete,
            ResearchStage::Completed,
            100,
        );
        assert!(complete.is_terminal());

        let fatal = ProgressEvent::new("s", ProgressEventType::Error, ResearchStage::Error, 50);
        assert!(fatal.is_terminal());

        let update =
            ProgressEvent::new("s", ProgressEventType::ProgressUpdate, ResearchStage::Brief, 30);
        assert!(!update.is_terminal());
    }
}
