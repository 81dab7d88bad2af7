// User-visible error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::session::Language;

/// Classification of everything that can go wrong in a session.
///
/// The wire representation is the SCREAMING_SNAKE_CASE code the clients
/// switch on; the `Display` impl carries the English description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ErrorKind {
    /// Request did not validate; session not created
    #[serde(rename = "INVALID_INPUT")]
    #[error("invalid input")]
    InvalidInput,
    /// Unknown session id
    #[serde(rename = "NOT_FOUND")]
    #[error("session not found")]
    NotFound,
    /// All LLM providers failed for a generative stage
    #[serde(rename = "LLM_UNAVAILABLE")]
    #[error("all LLM providers failed")]
    LlmUnavailable,
    /// Search returned empty or is unconfigured; never fatal
    #[serde(rename = "SEARCH_DEGRADED")]
    #[error("search unavailable or returned no results")]
    SearchDegraded,
    /// Slot or stage exceeded its budget
    #[serde(rename = "TIMEOUT")]
    #[error("operation timed out")]
    Timeout,
    /// Iteration cap reached without any summary
    #[serde(rename = "NO_PROGRESS")]
    #[error("iteration cap reached without any research summary")]
    NoProgress,
    /// User-initiated termination
    #[serde(rename = "CANCELLED")]
    #[error("research cancelled")]
    Cancelled,
    /// Assertion or invariant violation
    #[serde(rename = "INTERNAL")]
    #[error("internal error")]
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorKind::SearchDegraded => "SEARCH_DEGRADED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NoProgress => "NO_PROGRESS",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Localized message shown on terminal error events
    pub fn localized_message(&self, language: Language) -> &'static str {
        match language {
            Language::En => match self {
                ErrorKind::InvalidInput => "The request was invalid.",
                ErrorKind::NotFound => "The research session was not found.",
                ErrorKind::LlmUnavailable => {
                    "No language model backend is currently available."
                }
                ErrorKind::SearchDegraded => {
                    "Web search is unavailable; results may lack sources."
                }
                ErrorKind::Timeout => "The research stage exceeded its time budget.",
                ErrorKind::NoProgress => {
                    "Research stopped: no findings were produced within the iteration limit."
                }
                ErrorKind::Cancelled => "The research session was cancelled.",
                ErrorKind::Internal => "An internal error occurred.",
            },
            Language::Ko => match self {
                ErrorKind::InvalidInput => "요청이 유효하지 않습니다.",
                ErrorKind::NotFound => "연구 세션을 찾을 수 없습니다.",
                ErrorKind::LlmUnavailable => "사용 가능한 언어 모델 백엔드가 없습니다.",
                ErrorKind::SearchDegraded => {
                    "웹 검색을 사용할 수 없어 출처가 누락될 수 있습니다."
                }
                ErrorKind::Timeout => "연구 단계가 시간 제한을 초과했습니다.",
                ErrorKind::NoProgress => {
                    "반복 한도 내에 연구 결과가 생성되지 않아 중단되었습니다."
                }
                ErrorKind::Cancelled => "연구 세션이 취소되었습니다.",
                ErrorKind::Internal => "내부 오류가 발생했습니다.",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_codes() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::LlmUnavailable).unwrap(),
            "\"LLM_UNAVAILABLE\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::NoProgress).unwrap(),
            "\"NO_PROGRESS\""
        );
        let parsed: ErrorKind = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(parsed, ErrorKind::Cancelled);
    }

    #[test]
    fn test_localized_messages_differ() {
        let en = ErrorKind::Cancelled.localized_message(Language::En);
        let ko = ErrorKind::Cancelled.localized_message(Language::Ko);
        assert_ne!(en, ko);
        assert!(ko.contains("취소"));
    }

    #[test]
    fn test_code_matches_serde() {
        for kind in [
            ErrorKind::InvalidInput,
            ErrorKind::NotFound,
            ErrorKind::LlmUnavailable,
            ErrorKind::SearchDegraded,
            ErrorKind::Timeout,
            ErrorKind::NoProgress,
            ErrorKind::Cancelled,
            ErrorKind::Internal,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.code()));
        }
    }
}
