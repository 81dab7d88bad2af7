// Session and research state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ErrorKind;

// ============================================================================
// Language & Depth
// ============================================================================

/// Supported output languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Ko,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ko => "ko",
            Language::En => "en",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ko" => Ok(Language::Ko),
            "en" => Ok(Language::En),
            _ => Err(format!(
                "Invalid language: '{}'. Expected 'ko' or 'en'",
                s
            )),
        }
    }
}

/// How deep the supervisor loop is allowed to go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Shallow,
    Medium,
    Deep,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Shallow => "shallow",
            Depth::Medium => "medium",
            Depth::Deep => "deep",
        }
    }

    /// Supervisor iteration cap implied by this depth
    pub fn max_iterations(&self) -> u32 {
        match self {
            Depth::Shallow => 3,
            Depth::Medium => 4,
            Depth::Deep => 6,
        }
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::Deep
    }
}

impl std::fmt::Display for Depth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Depth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shallow" => Ok(Depth::Shallow),
            "medium" => Ok(Depth::Medium),
            "deep" => Ok(Depth::Deep),
            _ => Err(format!(
                "Invalid depth: '{}'. Expected 'shallow', 'medium', or 'deep'",
                s
            )),
        }
    }
}

// ============================================================================
// Workflow Stage
// ============================================================================

/// Stage of the research workflow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStage {
    Intake,
    Clarify,
    Brief,
    Supervise,
    Research,
    Compress,
    Finalize,
    Completed,
    Error,
}

impl ResearchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStage::Intake => "intake",
            ResearchStage::Clarify => "clarify",
            ResearchStage::Brief => "brief",
            ResearchStage::Supervise => "supervise",
            ResearchStage::Research => "research",
            ResearchStage::Compress => "compress",
            ResearchStage::Finalize => "finalize",
            ResearchStage::Completed => "completed",
            ResearchStage::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStage::Completed | ResearchStage::Error)
    }
}

impl Default for ResearchStage {
    fn default() -> Self {
        ResearchStage::Intake
    }
}

impl std::fmt::Display for ResearchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Research State
// ============================================================================

/// A focused research question proposed by the supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    /// The research question to investigate
    pub question: String,
    /// Scope and expectations for this question
    pub description: String,
}

impl Subtask {
    /// Key used for duplicate collapsing (trim + casefold)
    pub fn dedup_key(&self) -> String {
        self.question.trim().to_lowercase()
    }
}

/// The artefact a researcher slot produces for one subtask
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Index into `ResearchState::subtasks`
    pub subtask_index: usize,
    /// The subtask question, denormalized for display
    pub question: String,
    /// Summarized findings
    pub text: String,
    /// Source URLs backing the findings
    pub sources: Vec<String>,
}

impl Summary {
    /// Empty summary used when a slot fails recoverably
    pub fn empty(subtask_index: usize, question: String) -> Self {
        Self {
            subtask_index,
            question,
            text: String::new(),
            sources: Vec::new(),
        }
    }
}

/// A non-fatal failure recorded against the session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageError {
    /// Stage the failure occurred in
    pub stage: ResearchStage,
    /// Error classification
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
    /// Whether the session continued past this failure
    pub recoverable: bool,
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
}

/// The single mutable document driven by the workflow engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchState {
    /// Written once after Clarify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarified_goal: Option<String>,
    /// Written once after Brief
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief: Option<String>,
    /// Appended by the supervisor, up to L per iteration
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Appended in subtask-submission order as slots complete
    #[serde(default)]
    pub summaries: Vec<Summary>,
    /// Supervisor cycle counter, capped by max_iterations
    #[serde(default)]
    pub iteration: u32,
    /// Written once in Finalize
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    /// Non-fatal failures observed along the way
    #[serde(default)]
    pub errors: Vec<StageError>,
}

impl ResearchState {
    /// True when a proposed subtask duplicates an existing one
    pub fn has_subtask(&self, candidate: &Subtask) -> bool {
        let key = candidate.dedup_key();
        self.subtasks.iter().any(|t| t.dedup_key() == key)
    }

    pub fn record_error(
        &mut self,
        stage: ResearchStage,
        kind: ErrorKind,
        message: impl Into<String>,
        recoverable: bool,
    ) {
        self.errors.push(StageError {
            stage,
            kind,
            message: message.into(),
            recoverable,
            timestamp: Utc::now(),
        });
    }
}

// ============================================================================
// Session
// ============================================================================

/// Terminal error attached to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Immutable session metadata, written once at creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Opaque, URL-safe session id
    pub id: String,
    /// The raw user question
    pub research_question: String,
    /// Detected or requested language
    pub language: Language,
    /// Depth knob
    pub depth: Depth,
    /// Researcher concurrency limit L, 1..=5
    pub max_researchers: usize,
    /// Supervisor iteration cap (depth default, or configured override)
    pub max_iterations: u32,
    /// When the session was created
    pub created_at: DateTime<Utc>,
}

/// Mutable portion of a session, persisted with a monotonic version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Current workflow stage
    pub stage: ResearchStage,
    /// Overall completion percentage, 0..=100
    pub progress: u8,
    /// Terminal error, if the session failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionError>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// The evolving research document
    pub state: ResearchState,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self {
            stage: ResearchStage::Intake,
            progress: 0,
            error: None,
            updated_at: Utc::now(),
            state: ResearchState::default(),
        }
    }

    pub fn set_stage(&mut self, stage: ResearchStage, progress: u8) {
        self.stage = stage;
        self.progress = progress;
        self.updated_at = Utc::now();
    }

    pub fn set_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.stage = ResearchStage::Error;
        self.error = Some(SessionError {
            kind,
            message: message.into(),
        });
        self.updated_at = Utc::now();
    }
}

impl Default for SessionRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// A complete session view: immutable metadata plus the current record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(flatten)]
    pub meta: SessionMeta,
    #[serde(flatten)]
    pub record: SessionRecord,
    /// Monotonic state version, bumped on every update
    pub version: u64,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn is_terminal(&self) -> bool {
        self.record.stage.is_terminal()
    }
}

// ============================================================================
// Constants
// ============================================================================

/// Maximum parallel researcher slots per session
pub const MAX_RESEARCHERS: usize = 5;

/// Default researcher concurrency when the request omits it
pub const DEFAULT_RESEARCHERS: usize = 3;

/// Maximum accepted query length in characters
pub const MAX_QUERY_CHARS: usize = 1000;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_iteration_caps() {
        assert_eq!(Depth::Shallow.max_iterations(), 3);
        assert_eq!(Depth::Medium.max_iterations(), 4);
        assert_eq!(Depth::Deep.max_iterations(), 6);
        assert_eq!(Depth::default(), Depth::Deep);
    }

    #[test]
    fn test_stage_is_terminal() {
        assert!(!ResearchStage::Intake.is_terminal());
        assert!(!ResearchStage::Research.is_terminal());
        assert!(ResearchStage::Completed.is_terminal());
        assert!(ResearchStage::Error.is_terminal());
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(
            serde_json::to_string(&ResearchStage::Supervise).unwrap(),
            "\"supervise\""
        );
        assert_eq!(
            serde_json::to_string(&ResearchStage::Finalize).unwrap(),
            "\"finalize\""
        );
    }

    #[test]
    fn test_subtask_dedup_key() {
        let a = Subtask {
            question: "  What is Quantum Error Correction? ".to_string(),
            description: String::new(),
        };
        let b = Subtask {
            question: "what is quantum error correction?".to_string(),
            description: "different description".to_string(),
        };
        assert_eq!(a.dedup_key(), b.dedup_key());

        let mut state = ResearchState::default();
        state.subtasks.push(a);
        assert!(state.has_subtask(&b));
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("ko".parse::<Language>().unwrap(), Language::Ko);
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert!("fr".parse::<Language>().is_err());
    }

    #[test]
    fn test_record_error_appends() {
        let mut state = ResearchState::default();
        state.record_error(
            ResearchStage::Research,
            ErrorKind::SearchDegraded,
            "no search provider configured",
            true,
        );
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].recoverable);
    }

    #[test]
    fn test_session_record_set_error() {
        let mut record = SessionRecord::new();
        record.set_error(ErrorKind::LlmUnavailable, "all providers failed");
        assert_eq!(record.stage, ResearchStage::Error);
        assert!(record.error.is_some());
    }

    #[test]
    fn test_session_serialization_is_flat() {
        let session = Session {
            meta: SessionMeta {
                id: "research-1".to_string(),
                research_question: "test".to_string(),
                language: Language::En,
                depth: Depth::Deep,
                max_researchers: 3,
                max_iterations: 6,
                created_at: Utc::now(),
            },
            record: SessionRecord::new(),
            version: 1,
        };

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["id"], "research-1");
        assert_eq!(json["stage"], "intake");
        assert_eq!(json["version"], 1);
    }
}
