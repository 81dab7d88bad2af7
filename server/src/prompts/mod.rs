// Multilingual prompt registry
//
// Templates use `{{placeholder}}` markers. Every template is checked at
// construction time against the set of placeholders its stage is allowed to
// use; an unknown marker is a fatal configuration error.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Language;

mod templates_en;
mod templates_ko;

// ============================================================================
// Template identity
// ============================================================================

/// The prompt templates consumed by the workflow engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateId {
    Clarification,
    ResearchBrief,
    Supervisor,
    Researcher,
    Compression,
    FinalReport,
}

impl TemplateId {
    pub fn all() -> &'static [TemplateId] {
        &[
            TemplateId::Clarification,
            TemplateId::ResearchBrief,
            TemplateId::Supervisor,
            TemplateId::Researcher,
            TemplateId::Compression,
            TemplateId::FinalReport,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateId::Clarification => "clarification",
            TemplateId::ResearchBrief => "research_brief",
            TemplateId::Supervisor => "supervisor",
            TemplateId::Researcher => "researcher",
            TemplateId::Compression => "compression",
            TemplateId::FinalReport => "final_report",
        }
    }

    /// Placeholders this template may reference
    fn allowed_placeholders(&self) -> &'static [&'static str] {
        match self {
            TemplateId::Clarification => &["research_question"],
            TemplateId::ResearchBrief => &["clarified_research_goal"],
            TemplateId::Supervisor => &["research_brief", "completed_research", "max_subtasks"],
            TemplateId::Researcher => &["research_question", "description", "search_context"],
            TemplateId::Compression => &["research_summaries"],
            TemplateId::FinalReport => &["research_question", "compressed_research"],
        }
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Registry
// ============================================================================

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([a-z_]+)\}\}").unwrap())
}

/// Resolves per-stage prompt templates by language
pub struct PromptRegistry;

impl PromptRegistry {
    /// Build the registry, validating every template in both languages
    pub fn new() -> Result<Self, String> {
        for id in TemplateId::all() {
            for language in [Language::En, Language::Ko] {
                let template = Self::template(*id, language);
                let allowed = id.allowed_placeholders();
                for cap in placeholder_regex().captures_iter(template) {
                    let name = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
                    if !allowed.contains(&name) {
                        return Err(format!(
                            "Template '{}' ({}) references unknown placeholder '{{{{{}}}}}'",
                            id, language, name
                        ));
                    }
                }
            }
        }
        Ok(Self)
    }

    fn template(id: TemplateId, language: Language) -> &'static str {
        match language {
            Language::En => templates_en::template(id),
            Language::Ko => templates_ko::template(id),
        }
    }

    /// Render a template, substituting every `{{name}}` marker.
    /// A marker left unfilled is an error.
    pub fn render(
        &self,
        id: TemplateId,
        language: Language,
        vars: &[(&str, &str)],
    ) -> Result<String, String> {
        let mut rendered = Self::template(id, language).to_string();
        for (name, value) in vars {
            rendered = rendered.replace(&format!("{{{{{}}}}}", name), value);
        }

        if let Some(cap) = placeholder_regex().captures(&rendered) {
            let missing = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Err(format!(
                "Template '{}' is missing a value for '{{{{{}}}}}'",
                id, missing
            ));
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_validates_cleanly() {
        assert!(PromptRegistry::new().is_ok());
    }

    #[test]
    fn test_render_clarification() {
        let registry = PromptRegistry::new().unwrap();
        let prompt = registry
            .render(
                TemplateId::Clarification,
                Language::En,
                &[("research_question", "What is RISC-V?")],
            )
            .unwrap();
        assert!(prompt.contains("What is RISC-V?"));
        assert!(!prompt.contains("{{"));
    }

    #[test]
    fn test_render_korean_template() {
        let registry = PromptRegistry::new().unwrap();
        let prompt = registry
            .render(
                TemplateId::Researcher,
                Language::Ko,
                &[
                    ("research_question", "양자 오류 정정"),
                    ("description", "최근 발전 조사"),
                    ("search_context", "(no results)"),
                ],
            )
            .unwrap();
        assert!(prompt.contains("양자 오류 정정"));
        assert!(prompt.contains("연구"));
    }

    #[test]
    fn test_render_missing_variable_is_error() {
        let registry = PromptRegistry::new().unwrap();
        let result = registry.render(TemplateId::Supervisor, Language::En, &[]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.contains("supervisor"));
    }

    #[test]
    fn test_supervisor_template_keeps_json_example() {
        // Literal single-brace JSON in the template must survive rendering
        let registry = PromptRegistry::new().unwrap();
        let prompt = registry
            .render(
                TemplateId::Supervisor,
                Language::En,
                &[
                    ("research_brief", "brief"),
                    ("completed_research", "(none)"),
                    ("max_subtasks", "3"),
                ],
            )
            .unwrap();
        assert!(prompt.contains("\"research_question\""));
    }

    #[test]
    fn test_all_templates_render_in_both_languages() {
        let registry = PromptRegistry::new().unwrap();
        let filled: Vec<(&str, &str)> = vec![
            ("research_question", "q"),
            ("clarified_research_goal", "goal"),
            ("research_brief", "brief"),
            ("completed_research", "(none)"),
            ("max_subtasks", "3"),
            ("description", "d"),
            ("search_context", "ctx"),
            ("research_summaries", "s"),
            ("compressed_research", "c"),
        ];
        for id in TemplateId::all() {
            for language in [Language::En, Language::Ko] {
                let rendered = registry.render(*id, language, &filled);
                assert!(rendered.is_ok(), "{} / {} failed", id, language);
            }
        }
    }
}
