// API request/response types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::{
    Depth, Language, ResearchStage, Session, DEFAULT_RESEARCHERS, MAX_QUERY_CHARS,
    MAX_RESEARCHERS,
};

// ============================================================================
// Start Research
// ============================================================================

/// Request to start a research session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResearchRequest {
    /// Research question or topic, 1..=1000 characters
    pub query: String,
    /// Preferred language; auto-detected when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    /// Research depth; defaults to deep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<Depth>,
    /// Maximum parallel researchers, 1..=5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_researchers: Option<usize>,
}

impl StartResearchRequest {
    /// Validate the request before a session is created
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("Query must not be empty".to_string());
        }
        if self.query.chars().count() > MAX_QUERY_CHARS {
            return Err(format!(
                "Query must be at most {} characters",
                MAX_QUERY_CHARS
            ));
        }
        if let Some(n) = self.max_researchers {
            if n < 1 || n > MAX_RESEARCHERS {
                return Err(format!(
                    "maxResearchers must be between 1 and {}",
                    MAX_RESEARCHERS
                ));
            }
        }
        Ok(())
    }

    pub fn depth_or_default(&self) -> Depth {
        self.depth.unwrap_or_default()
    }

    pub fn researchers_or_default(&self) -> usize {
        self.max_researchers.unwrap_or(DEFAULT_RESEARCHERS)
    }
}

/// Response after a session has been accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResearchResponse {
    pub session_id: String,
    pub status: String,
    pub language: Language,
}

// ============================================================================
// Listing
// ============================================================================

/// Query parameters for listing sessions
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsQuery {
    /// Only include sessions in this stage
    #[serde(default)]
    pub stage: Option<ResearchStage>,
    /// Pagination offset
    #[serde(default)]
    pub offset: Option<usize>,
    /// Page size; defaults to 50
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Paginated session listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResponse {
    pub sessions: Vec<Session>,
    pub total: usize,
}

// ============================================================================
// Report
// ============================================================================

/// The final report with its citations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub session_id: String,
    pub research_question: String,
    pub language: Language,
    pub report: String,
    /// One source list per research summary
    pub sources: Vec<Vec<String>>,
    pub generated_at: DateTime<Utc>,
}

// ============================================================================
// Health
// ============================================================================

/// Health probe result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub llm_available: bool,
    pub search_available: bool,
}

/// Error body returned by failing routes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub kind: super::error::ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: &str) -> StartResearchRequest {
        StartResearchRequest {
            query: query.to_string(),
            language: None,
            depth: None,
            max_researchers: None,
        }
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        assert!(request("").validate().is_err());
        assert!(request("   ").validate().is_err());
        assert!(request("valid question").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_long_query() {
        let long = "x".repeat(MAX_QUERY_CHARS + 1);
        assert!(request(&long).validate().is_err());
        let max = "x".repeat(MAX_QUERY_CHARS);
        assert!(request(&max).validate().is_ok());
    }

    #[test]
    fn test_validate_researcher_bounds() {
        let mut req = request("q");
        req.max_researchers = Some(0);
        assert!(req.validate().is_err());
        req.max_researchers = Some(6);
        assert!(req.validate().is_err());
        req.max_researchers = Some(5);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let req = request("q");
        assert_eq!(req.depth_or_default(), Depth::Deep);
        assert_eq!(req.researchers_or_default(), DEFAULT_RESEARCHERS);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{"query":"AI trends","maxResearchers":2,"depth":"shallow"}"#;
        let req: StartResearchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.max_researchers, Some(2));
        assert_eq!(req.depth, Some(Depth::Shallow));
    }
}
