// End-to-end workflow tests against scripted gateways
//
// The LLM gateway runs over a scripted provider that recognises which
// prompt template it received; search is a canned backend. No network.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use deep_research_server::config::{EngineConfig, LlmProviderKind};
use deep_research_server::file_storage::SessionStore;
use deep_research_server::llm::providers::{GenerateRequest, LlmProvider};
use deep_research_server::llm::LlmGateway;
use deep_research_server::models::{
    Depth, ErrorKind, Language, ProgressEventType, ResearchStage, StartResearchRequest, Subtask,
};
use deep_research_server::progress::ProgressBus;
use deep_research_server::prompts::PromptRegistry;
use deep_research_server::search::{SearchOutcome, SearchResult, WebSearch};
use deep_research_server::workflow::{
    run_batch, start_session, CancelRegistry, SlotBudget, SlotContext, SlotResult,
    WorkflowContext,
};

// ============================================================================
// Scripted gateways
// ============================================================================

/// Which template a prompt came from, recognised by its fixed wording
fn stage_of(prompt: &str) -> &'static str {
    if prompt.contains("PROCEED_TO_RESEARCH") {
        "clarify"
    } else if prompt.contains("research planning expert") || prompt.contains("연구 계획 전문가") {
        "brief"
    } else if prompt.contains("research supervisor") || prompt.contains("연구 감독자") {
        "supervisor"
    } else if prompt.contains("expert researcher") || prompt.contains("전문 연구원") {
        "researcher"
    } else if prompt.contains("research synthesis expert") || prompt.contains("연구 종합 전문가")
    {
        "compress"
    } else if prompt.contains("report editor") || prompt.contains("보고서 편집자") {
        "final"
    } else {
        "unknown"
    }
}

struct ScriptedLlm {
    supervisor_round: AtomicUsize,
    fail_stages: HashSet<&'static str>,
    researcher_delay: Option<Duration>,
    korean: bool,
    /// Supervisor reply used for every round instead of the default script
    supervisor_override: Option<String>,
}

impl ScriptedLlm {
    fn new() -> Self {
        Self {
            supervisor_round: AtomicUsize::new(0),
            fail_stages: HashSet::new(),
            researcher_delay: None,
            korean: false,
            supervisor_override: None,
        }
    }

    fn with_supervisor_reply(reply: &str) -> Self {
        let mut llm = Self::new();
        llm.supervisor_override = Some(reply.to_string());
        llm
    }

    fn failing_in(stages: &[&'static str]) -> Self {
        let mut llm = Self::new();
        llm.fail_stages = stages.iter().copied().collect();
        llm
    }

    fn with_researcher_delay(delay: Duration) -> Self {
        let mut llm = Self::new();
        llm.researcher_delay = Some(delay);
        llm
    }

    fn korean() -> Self {
        let mut llm = Self::new();
        llm.korean = true;
        llm
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, String> {
        let stage = stage_of(&request.prompt);
        if self.fail_stages.contains(stage) {
            return Err(format!("scripted failure in {}", stage));
        }

        match stage {
            "clarify" => Ok("PROCEED_TO_RESEARCH".to_string()),
            "brief" => Ok(if self.korean {
                "범위와 방법론을 다루는 계획서입니다.".to_string()
            } else {
                "A brief covering scope and methodology.".to_string()
            }),
            "supervisor" => {
                if let Some(reply) = &self.supervisor_override {
                    return Ok(reply.clone());
                }
                let round = self.supervisor_round.fetch_add(1, Ordering::SeqCst);
                if round == 0 {
                    Ok(r#"[
                        {"research_question": "Current hardware progress", "description": "Survey recent results"},
                        {"research_question": "Error correction advances", "description": "Survey codes"}
                    ]"#
                    .to_string())
                } else {
                    Ok("[]".to_string())
                }
            }
            "researcher" => {
                if let Some(delay) = self.researcher_delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(if self.korean {
                    "주제에 대한 상세한 연구 요약입니다.".to_string()
                } else {
                    "Detailed findings on the assigned question.".to_string()
                })
            }
            "compress" => Ok(if self.korean {
                "통합된 연구 보고서 초안입니다.".to_string()
            } else {
                "Consolidated draft of all findings.".to_string()
            }),
            "final" => Ok(if self.korean {
                "# 최종 보고서\n\n연구 결과가 정리되었습니다.".to_string()
            } else {
                "# Final Report\n\nFindings with citations.".to_string()
            }),
            _ => Ok("ok".to_string()),
        }
    }

    async fn health_check(&self, _model: &str, _timeout: Duration) -> bool {
        true
    }
}

struct FixedSearch {
    results: Vec<SearchResult>,
}

impl FixedSearch {
    fn with_hits() -> Self {
        Self {
            results: vec![
                SearchResult {
                    title: "Quantum review".to_string(),
                    url: "https://example.com/quantum".to_string(),
                    snippet: "Recent progress in qubit counts.".to_string(),
                    score: 0.9,
                },
                SearchResult {
                    title: "Error correction".to_string(),
                    url: "https://example.com/qec".to_string(),
                    snippet: "Surface code milestones.".to_string(),
                    score: 0.8,
                },
            ],
        }
    }
}

#[async_trait]
impl WebSearch for FixedSearch {
    async fn search(
        &self,
        _query: &str,
        _language: Language,
        _max_results: Option<usize>,
    ) -> SearchOutcome {
        SearchOutcome {
            results: self.results.clone(),
            degraded: false,
        }
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn health_check(&self) -> bool {
        true
    }
}

struct DegradedSearch;

#[async_trait]
impl WebSearch for DegradedSearch {
    async fn search(
        &self,
        _query: &str,
        _language: Language,
        _max_results: Option<usize>,
    ) -> SearchOutcome {
        SearchOutcome {
            results: Vec::new(),
            degraded: true,
        }
    }

    fn is_configured(&self) -> bool {
        false
    }

    async fn health_check(&self) -> bool {
        false
    }
}

// ============================================================================
// Harness
// ============================================================================

fn make_context(
    llm: ScriptedLlm,
    search: Arc<dyn WebSearch>,
    storage: &TempDir,
    slot_timeout_ms: u64,
) -> (Arc<WorkflowContext>, Arc<CancelRegistry>) {
    let gateway = LlmGateway::with_providers(
        vec![(LlmProviderKind::Local, Box::new(llm))],
        "test-model",
        Duration::from_secs(30),
    )
    .unwrap();

    let context = WorkflowContext {
        llm: Arc::new(gateway),
        search,
        prompts: Arc::new(PromptRegistry::new().unwrap()),
        store: Arc::new(SessionStore::new(storage.path()).unwrap()),
        bus: Arc::new(ProgressBus::new()),
        engine: EngineConfig {
            max_iterations: None,
            slot_timeout_ms,
            content_truncation: 500,
        },
        stream_enabled: false,
    };
    (Arc::new(context), Arc::new(CancelRegistry::new()))
}

fn request(query: &str) -> StartResearchRequest {
    StartResearchRequest {
        query: query.to_string(),
        language: None,
        depth: Some(Depth::Deep),
        max_researchers: Some(3),
    }
}

/// Drain a subscription until the terminal event, with a test timeout
async fn collect_until_terminal(
    mut subscription: deep_research_server::progress::ProgressSubscription,
) -> Vec<deep_research_server::models::ProgressEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), subscription.recv())
            .await
            .expect("timed out waiting for events");
        match event {
            Some(event) => {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    return events;
                }
            }
            None => return events,
        }
    }
}

// ============================================================================
// S1: happy path, English, deep
// ============================================================================

#[tokio::test]
async fn happy_path_produces_final_report_with_sources() {
    let storage = TempDir::new().unwrap();
    let (ctx, cancels) = make_context(
        ScriptedLlm::new(),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let session = start_session(
        ctx.clone(),
        cancels.clone(),
        request("Latest trends in quantum computing"),
    )
    .await
    .unwrap();
    assert_eq!(session.meta.language, Language::En);

    let subscription = ctx.bus.subscribe(&session.meta.id);
    let events = collect_until_terminal(subscription).await;

    // Terminal is research_complete at 100%
    let terminal = events.last().unwrap();
    assert_eq!(terminal.event_type, ProgressEventType::ResearchComplete);
    assert_eq!(terminal.progress, 100);

    // Progress never decreases (property 1)
    let mut last = 0;
    for event in &events {
        assert!(event.progress >= last, "progress regressed: {:?}", event);
        last = event.progress;
    }

    // The workflow passed through every generative stage
    let stages: HashSet<ResearchStage> = events.iter().map(|e| e.stage).collect();
    for expected in [
        ResearchStage::Clarify,
        ResearchStage::Brief,
        ResearchStage::Supervise,
        ResearchStage::Research,
        ResearchStage::Compress,
        ResearchStage::Finalize,
    ] {
        assert!(stages.contains(&expected), "missing stage {:?}", expected);
    }

    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    assert_eq!(stored.record.stage, ResearchStage::Completed);
    assert_eq!(stored.record.progress, 100);
    assert!(stored.record.state.final_report.is_some());
    assert!(stored.record.state.iteration <= 6);
    assert_eq!(stored.record.state.summaries.len(), 2);
    assert!(stored
        .record
        .state
        .summaries
        .iter()
        .any(|s| s.sources.contains(&"https://example.com/quantum".to_string())));

    // Summaries line up with subtasks in submission order (invariant)
    assert!(stored.record.state.summaries.len() <= stored.record.state.subtasks.len());
    for (i, summary) in stored.record.state.summaries.iter().enumerate() {
        assert_eq!(summary.subtask_index, i);
    }

    // Report artefact was written
    assert!(ctx.store.read_report(&session.meta.id).unwrap().is_some());
}

// ============================================================================
// S2: Korean auto-detect
// ============================================================================

#[tokio::test]
async fn korean_query_is_detected_and_answered_in_korean() {
    let storage = TempDir::new().unwrap();
    let (ctx, cancels) = make_context(
        ScriptedLlm::korean(),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let session = start_session(ctx.clone(), cancels.clone(), request("AI 기술의 최신 동향"))
        .await
        .unwrap();
    assert_eq!(session.meta.language, Language::Ko);

    let events = collect_until_terminal(ctx.bus.subscribe(&session.meta.id)).await;
    assert_eq!(
        events.last().unwrap().event_type,
        ProgressEventType::ResearchComplete
    );

    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    let report = stored.record.state.final_report.unwrap();
    assert!(report.contains("최종 보고서"));
}

// ============================================================================
// S3: degraded search
// ============================================================================

#[tokio::test]
async fn degraded_search_completes_without_sources() {
    let storage = TempDir::new().unwrap();
    let (ctx, cancels) =
        make_context(ScriptedLlm::new(), Arc::new(DegradedSearch), &storage, 120_000);

    let session = start_session(
        ctx.clone(),
        cancels.clone(),
        request("History of container orchestration"),
    )
    .await
    .unwrap();

    let events = collect_until_terminal(ctx.bus.subscribe(&session.meta.id)).await;
    assert_eq!(
        events.last().unwrap().event_type,
        ProgressEventType::ResearchComplete
    );

    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    assert_eq!(stored.record.stage, ResearchStage::Completed);
    assert!(stored.record.error.is_none());
    assert!(!stored.record.state.summaries.is_empty());
    for summary in &stored.record.state.summaries {
        assert!(summary.sources.is_empty());
    }
    assert!(stored
        .record
        .state
        .errors
        .iter()
        .any(|e| e.kind == ErrorKind::SearchDegraded && e.recoverable));
}

// ============================================================================
// S4: LLM fatal during Brief
// ============================================================================

#[tokio::test]
async fn llm_failure_in_brief_is_fatal() {
    let storage = TempDir::new().unwrap();
    let (ctx, cancels) = make_context(
        ScriptedLlm::failing_in(&["brief"]),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let session = start_session(ctx.clone(), cancels.clone(), request("Anything at all"))
        .await
        .unwrap();

    let events = collect_until_terminal(ctx.bus.subscribe(&session.meta.id)).await;
    let terminal = events.last().unwrap();
    assert_eq!(terminal.event_type, ProgressEventType::Error);
    assert_eq!(
        terminal.error.as_ref().unwrap().kind,
        ErrorKind::LlmUnavailable
    );

    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    assert_eq!(stored.record.stage, ResearchStage::Error);
    assert!(stored.record.state.final_report.is_none());
    assert_eq!(
        stored.record.error.as_ref().unwrap().kind,
        ErrorKind::LlmUnavailable
    );
    // The failing stage is recorded in the error log
    assert!(stored
        .record
        .state
        .errors
        .iter()
        .any(|e| e.stage == ResearchStage::Brief && !e.recoverable));
}

// ============================================================================
// S5: cancellation mid-research
// ============================================================================

#[tokio::test]
async fn cancel_during_research_terminates_with_cancelled() {
    let storage = TempDir::new().unwrap();
    let slot_timeout_ms = 5_000;
    let (ctx, cancels) = make_context(
        ScriptedLlm::with_researcher_delay(Duration::from_secs(60)),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        slot_timeout_ms,
    );

    let session = start_session(ctx.clone(), cancels.clone(), request("Slow research topic"))
        .await
        .unwrap();
    let mut subscription = ctx.bus.subscribe(&session.meta.id);

    // Cancel as soon as the first researcher starts searching
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), subscription.recv())
            .await
            .expect("timed out waiting for progress_searching")
            .expect("stream ended before searching began");
        let searching = event.event_type == ProgressEventType::ProgressSearching;
        events.push(event);
        if searching {
            break;
        }
    }
    assert!(cancels.cancel(&session.meta.id));
    // A second cancel is a harmless no-op (property 8)
    cancels.cancel(&session.meta.id);

    // Terminal arrives well within 2x the slot timeout
    let deadline = Duration::from_millis(slot_timeout_ms * 2);
    let terminal = tokio::time::timeout(deadline, async {
        loop {
            match subscription.recv().await {
                Some(event) => {
                    if event.is_terminal() {
                        return event;
                    }
                }
                None => panic!("stream closed without a terminal event"),
            }
        }
    })
    .await
    .expect("cancellation did not terminate in time");

    assert_eq!(terminal.event_type, ProgressEventType::Error);
    assert_eq!(terminal.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert!(subscription.recv().await.is_none());

    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    assert_eq!(stored.record.stage, ResearchStage::Error);
    assert_eq!(stored.record.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    // No slot completed, so no summaries were appended
    assert!(stored.record.state.summaries.is_empty());
}

// ============================================================================
// S6: slow subscriber never consumes
// ============================================================================

#[tokio::test]
async fn slow_subscriber_drops_but_still_gets_terminal() {
    let storage = TempDir::new().unwrap();
    let (ctx, cancels) = make_context(
        ScriptedLlm::new(),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let session = start_session(
        ctx.clone(),
        cancels.clone(),
        request("Busy event stream topic"),
    )
    .await
    .unwrap();

    // This subscriber never consumes while the session runs
    let mut slow = ctx.bus.subscribe_with_capacity(&session.meta.id, 4);

    // A healthy subscriber observes the session to completion
    let events = collect_until_terminal(ctx.bus.subscribe(&session.meta.id)).await;
    assert_eq!(
        events.last().unwrap().event_type,
        ProgressEventType::ResearchComplete
    );
    assert!(events.len() > 4, "test needs more events than the slow buffer");

    assert!(slow.dropped() > 0);

    // Draining now still ends with the terminal event
    let mut drained = Vec::new();
    while let Some(event) = slow.recv().await {
        drained.push(event);
    }
    assert!(drained.len() <= 5);
    assert_eq!(
        drained.last().unwrap().event_type,
        ProgressEventType::ResearchComplete
    );

    // Observed events are in publish order (timestamps never regress)
    for pair in drained.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

// ============================================================================
// Supervisor edge cases
// ============================================================================

#[tokio::test]
async fn empty_supervisor_rounds_end_in_no_progress() {
    let storage = TempDir::new().unwrap();
    let (ctx, cancels) = make_context(
        ScriptedLlm::with_supervisor_reply("Nothing left to plan: []"),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let session = start_session(ctx.clone(), cancels.clone(), request("Unplannable topic"))
        .await
        .unwrap();

    let events = collect_until_terminal(ctx.bus.subscribe(&session.meta.id)).await;
    let terminal = events.last().unwrap();
    assert_eq!(terminal.event_type, ProgressEventType::Error);
    assert_eq!(terminal.error.as_ref().unwrap().kind, ErrorKind::NoProgress);

    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    assert_eq!(stored.record.stage, ResearchStage::Error);
    assert!(stored.record.state.summaries.is_empty());
    // The iteration counter never exceeds the cap
    assert!(stored.record.state.iteration <= stored.meta.max_iterations);
}

#[tokio::test]
async fn duplicate_subtasks_collapse_to_one() {
    let storage = TempDir::new().unwrap();
    // Same question twice, differing only in case and whitespace
    let reply = r#"[
        {"research_question": "What changed recently?", "description": "a"},
        {"research_question": "  what changed RECENTLY? ", "description": "b"}
    ]"#;
    let (ctx, cancels) = make_context(
        ScriptedLlm::with_supervisor_reply(reply),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let session = start_session(ctx.clone(), cancels.clone(), request("Repetitive topic"))
        .await
        .unwrap();

    let events = collect_until_terminal(ctx.bus.subscribe(&session.meta.id)).await;
    assert_eq!(
        events.last().unwrap().event_type,
        ProgressEventType::ResearchComplete
    );

    // Round one accepted a single deduplicated task; round two re-proposed
    // the same question, which collapsed to nothing and ended the loop
    let stored = ctx.store.load(&session.meta.id).await.unwrap().unwrap();
    assert_eq!(stored.record.state.subtasks.len(), 1);
    assert_eq!(stored.record.state.summaries.len(), 1);
    assert_eq!(stored.record.state.iteration, 1);
}

// ============================================================================
// Scheduler properties
// ============================================================================

fn slot_context(ctx: &Arc<WorkflowContext>, session_id: &str) -> SlotContext {
    SlotContext {
        llm: ctx.llm.clone(),
        search: ctx.search.clone(),
        prompts: ctx.prompts.clone(),
        bus: ctx.bus.clone(),
        session_id: session_id.to_string(),
        language: Language::En,
        stream_enabled: false,
    }
}

fn batch_of(questions: &[&str]) -> Vec<(usize, Subtask)> {
    questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            (
                i,
                Subtask {
                    question: q.to_string(),
                    description: "scoped".to_string(),
                },
            )
        })
        .collect()
}

#[tokio::test]
async fn run_batch_returns_results_in_input_order() {
    let storage = TempDir::new().unwrap();
    let (ctx, _) = make_context(
        ScriptedLlm::new(),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let budget = SlotBudget {
        slot_timeout: Duration::from_secs(30),
        max_results: None,
        content_truncation: 500,
    };
    let results = run_batch(
        slot_context(&ctx, "batch-test"),
        batch_of(&["first", "second", "third"]),
        budget,
        2,
        50,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(results.len(), 3);
    for (i, (result, expected)) in results.iter().zip(["first", "second", "third"]).enumerate() {
        match result {
            SlotResult::Summary { summary, .. } => {
                assert_eq!(summary.subtask_index, i);
                assert_eq!(summary.question, expected);
            }
            other => panic!("slot {} did not complete: {:?}", i, other),
        }
    }
}

#[tokio::test]
async fn run_batch_slot_timeout_is_isolated() {
    let storage = TempDir::new().unwrap();
    let (ctx, _) = make_context(
        ScriptedLlm::with_researcher_delay(Duration::from_secs(60)),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let budget = SlotBudget {
        slot_timeout: Duration::from_millis(200),
        max_results: None,
        content_truncation: 500,
    };
    let results = run_batch(
        slot_context(&ctx, "timeout-test"),
        batch_of(&["slow one"]),
        budget,
        1,
        50,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(results.len(), 1);
    match &results[0] {
        SlotResult::Error { kind, .. } => assert_eq!(*kind, ErrorKind::Timeout),
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn run_batch_cancellation_cancels_every_slot() {
    let storage = TempDir::new().unwrap();
    let (ctx, _) = make_context(
        ScriptedLlm::with_researcher_delay(Duration::from_secs(60)),
        Arc::new(FixedSearch::with_hits()),
        &storage,
        120_000,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let budget = SlotBudget {
        slot_timeout: Duration::from_secs(30),
        max_results: None,
        content_truncation: 500,
    };
    let results = run_batch(
        slot_context(&ctx, "cancel-test"),
        batch_of(&["a", "b", "c"]),
        budget,
        2,
        50,
        cancel,
    )
    .await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert!(matches!(result, SlotResult::Cancelled));
    }
}
