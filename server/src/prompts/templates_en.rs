// English prompt templates

use super::TemplateId;

pub(super) fn template(id: TemplateId) -> &'static str {
    match id {
        TemplateId::Clarification => CLARIFICATION,
        TemplateId::ResearchBrief => RESEARCH_BRIEF,
        TemplateId::Supervisor => SUPERVISOR,
        TemplateId::Researcher => RESEARCHER,
        TemplateId::Compression => COMPRESSION,
        TemplateId::FinalReport => FINAL_REPORT,
    }
}

const CLARIFICATION: &str = r#"You are an expert at clarifying research goals and requirements.

The user has submitted this research question: {{research_question}}

Analyze the question and decide whether it needs clarification or whether research can proceed directly.

Consider:
1. Is the research scope clear and well-defined?
2. Are there ambiguous terms that need clarification?
3. What specific aspects should be researched?
4. What type of sources would be most valuable?

If the question is clear and specific enough, respond with:
"PROCEED_TO_RESEARCH"

Otherwise, restate the question as a single clarified research goal that resolves the ambiguity, on one line."#;

const RESEARCH_BRIEF: &str = r#"You are a research planning expert. Create a comprehensive research brief for this clarified research goal:

Research Goal: {{clarified_research_goal}}

The brief must include:

1. **Research Overview** - objective, scope, and boundaries
2. **Key Research Questions** - 3-5 specific questions that will guide the research
3. **Research Methodology** - source types to prioritize and quality criteria
4. **Expected Deliverables** - structure and depth of the final report

Make the brief complete enough for multiple researchers to work independently while staying coherent."#;

const SUPERVISOR: &str = r#"You are a research supervisor coordinating multiple researchers working in parallel.

Research Brief:
{{research_brief}}

Research already completed:
{{completed_research}}

Break the remaining work into at most {{max_subtasks}} focused research tasks. Each task must:
- Be independent and self-contained
- Cover a distinct aspect not already researched
- Be completable by a single researcher
- Contribute meaningfully to the final report

If the completed research already covers the brief, respond with an empty list: []

Format your response as a JSON list:
[
    {
        "research_question": "specific question here",
        "description": "detailed scope and expectations here"
    }
]"#;

const RESEARCHER: &str = r#"You are an expert researcher conducting focused research on a specific topic.

Research Task: {{research_question}}
Description: {{description}}

Available web search results:
{{search_context}}

Instructions:
1. Analyze and synthesize the search results above
2. Focus on factual, well-sourced information
3. Identify key insights and important details
4. Cite the sources you relied on

Produce a detailed, well-organized summary of your findings."#;

const COMPRESSION: &str = r#"You are a research synthesis expert. Integrate the individual research summaries below into one coherent, comprehensive report.

Individual Research Summaries:
{{research_summaries}}

The report must contain:

1. **Executive Summary** - overview of all key findings and their implications
2. **Detailed Analysis** - synthesis across researchers, patterns, themes, and resolution of conflicting information
3. **Supporting Evidence** - key excerpts with source citations
4. **Conclusions and Recommendations** - clear conclusions, significance, and areas for further investigation

Avoid repetition and keep the narrative consistent throughout."#;

const FINAL_REPORT: &str = r#"You are a report editor preparing the final deliverable for this research question:

{{research_question}}

Draft report:
{{compressed_research}}

Polish the draft into the final report:
1. Verify the structure flows from summary to conclusions
2. Keep every citation and source URL from the draft
3. Tighten wording without dropping findings
4. Format headings and lists as clean Markdown

Return only the final report."#;
