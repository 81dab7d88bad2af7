// Researcher scheduler
//
// Executes a batch of subtasks with bounded parallelism and strict slot
// isolation. Results come back in input order regardless of completion
// order. A failure in one slot never affects another slot or the engine.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::llm::{LlmError, LlmGateway, LlmStage};
use crate::models::{
    ErrorKind, EventDetail, Language, ProgressEvent, ProgressEventType, ResearchStage, Subtask,
    Summary,
};
use crate::progress::ProgressBus;
use crate::prompts::{PromptRegistry, TemplateId};
use crate::search::WebSearch;

/// Minimum accumulated characters between streamed preview events
const PREVIEW_CHUNK_CHARS: usize = 200;

/// Trailing characters of the draft shown in preview events
const PREVIEW_TAIL_CHARS: usize = 300;

/// Per-batch resource limits
#[derive(Debug, Clone)]
pub struct SlotBudget {
    /// Wall-clock budget per researcher slot
    pub slot_timeout: Duration,
    /// Search results requested per subtask; None means the gateway default
    pub max_results: Option<usize>,
    /// Per-snippet character cap fed into the researcher prompt
    pub content_truncation: usize,
}

/// What one researcher slot produced
#[derive(Debug, Clone)]
pub enum SlotResult {
    /// A summary; `degraded` marks a slot whose search came back empty
    Summary { summary: Summary, degraded: bool },
    /// The slot failed; the engine records this and keeps going
    Error { kind: ErrorKind, message: String },
    /// The session was cancelled while the slot was in flight
    Cancelled,
}

/// Shared handles a slot needs; cheap to clone per slot
#[derive(Clone)]
pub struct SlotContext {
    pub llm: Arc<LlmGateway>,
    pub search: Arc<dyn WebSearch>,
    pub prompts: Arc<PromptRegistry>,
    pub bus: Arc<ProgressBus>,
    pub session_id: String,
    pub language: Language,
    pub stream_enabled: bool,
}

/// Run a batch of subtasks across at most `concurrency` parallel slots.
/// The returned vector matches the input order and length.
pub async fn run_batch(
    ctx: SlotContext,
    batch: Vec<(usize, Subtask)>,
    budget: SlotBudget,
    concurrency: usize,
    progress: u8,
    cancel: CancellationToken,
) -> Vec<SlotResult> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let total = batch.len();
    let mut handles = Vec::with_capacity(total);

    for (position, (subtask_index, subtask)) in batch.into_iter().enumerate() {
        let ctx = ctx.clone();
        let budget = budget.clone();
        let cancel = cancel.clone();
        let semaphore = semaphore.clone();

        handles.push(tokio::spawn(async move {
            // FIFO admission: slots beyond the concurrency limit wait here
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return SlotResult::Cancelled,
            };
            if cancel.is_cancelled() {
                return SlotResult::Cancelled;
            }

            let work = run_slot(&ctx, subtask_index, &subtask, &budget, &cancel, position, total, progress);
            tokio::select! {
                _ = cancel.cancelled() => SlotResult::Cancelled,
                result = tokio::time::timeout(budget.slot_timeout, work) => match result {
                    Ok(slot_result) => slot_result,
                    Err(_) => SlotResult::Error {
                        kind: ErrorKind::Timeout,
                        message: format!(
                            "Researcher slot exceeded {}ms for '{}'",
                            budget.slot_timeout.as_millis(),
                            subtask.question
                        ),
                    },
                },
            }
        }));
    }

    let mut results = Vec::with_capacity(total);
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            // A panicked slot is contained here; the engine records it
            Err(e) => SlotResult::Error {
                kind: ErrorKind::Internal,
                message: format!("Researcher slot panicked: {}", e),
            },
        });
    }
    results
}

#[allow(clippy::too_many_arguments)]
async fn run_slot(
    ctx: &SlotContext,
    subtask_index: usize,
    subtask: &Subtask,
    budget: &SlotBudget,
    cancel: &CancellationToken,
    position: usize,
    total: usize,
    progress: u8,
) -> SlotResult {
    emit_searching(ctx, subtask, position, total, progress, None);

    let outcome = ctx
        .search
        .search(&subtask.question, ctx.language, budget.max_results)
        .await;
    let degraded = outcome.degraded || outcome.results.is_empty();

    if !outcome.results.is_empty() {
        emit_searching(
            ctx,
            subtask,
            position,
            total,
            progress,
            Some(outcome.results.len()),
        );
    }

    let search_context = build_search_context(&outcome.results, budget.content_truncation, ctx.language);
    let sources: Vec<String> = outcome.results.iter().map(|r| r.url.clone()).collect();

    let prompt = match ctx.prompts.render(
        TemplateId::Researcher,
        ctx.language,
        &[
            ("research_question", subtask.question.as_str()),
            ("description", subtask.description.as_str()),
            ("search_context", search_context.as_str()),
        ],
    ) {
        Ok(prompt) => prompt,
        Err(e) => {
            return SlotResult::Error {
                kind: ErrorKind::Internal,
                message: e,
            }
        }
    };

    let generated = if ctx.stream_enabled {
        stream_with_previews(ctx, &prompt, cancel, progress).await
    } else {
        ctx.llm
            .generate(LlmStage::Research, &prompt, cancel)
            .await
            .map(|outcome| outcome.text)
    };

    match generated {
        Ok(text) => SlotResult::Summary {
            summary: Summary {
                subtask_index,
                question: subtask.question.clone(),
                text,
                sources,
            },
            degraded,
        },
        Err(LlmError::Cancelled) => SlotResult::Cancelled,
        Err(LlmError::Unavailable(message)) => SlotResult::Error {
            kind: ErrorKind::LlmUnavailable,
            message,
        },
    }
}

/// Stream the researcher generation, publishing preview events as chunks
/// accumulate. Falls back to the assembled text either way.
async fn stream_with_previews(
    ctx: &SlotContext,
    prompt: &str,
    cancel: &CancellationToken,
    progress: u8,
) -> Result<String, LlmError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let bus = ctx.bus.clone();
    let session_id = ctx.session_id.clone();
    let language = ctx.language;
    let preview_task = tokio::spawn(async move {
        let mut draft = String::new();
        let mut since_preview = 0usize;
        while let Some(chunk) = rx.recv().await {
            since_preview += chunk.len();
            draft.push_str(&chunk);
            if since_preview >= PREVIEW_CHUNK_CHARS {
                since_preview = 0;
                let tail_start = draft
                    .char_indices()
                    .rev()
                    .nth(PREVIEW_TAIL_CHARS.saturating_sub(1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                let message = match language {
                    Language::Ko => "연구 내용을 작성하고 있습니다...",
                    Language::En => "Writing up research findings...",
                };
                let detail = EventDetail {
                    message: message.to_string(),
                    description: Some(draft[tail_start..].to_string()),
                    ..Default::default()
                };
                bus.publish(
                    ProgressEvent::new(
                        &session_id,
                        ProgressEventType::ProgressThinking,
                        ResearchStage::Research,
                        progress,
                    )
                    .with_detail(detail),
                );
            }
        }
    });

    let result = ctx.llm.stream(LlmStage::Research, prompt, cancel, tx).await;
    let _ = preview_task.await;
    result.map(|outcome| outcome.text)
}

fn emit_searching(
    ctx: &SlotContext,
    subtask: &Subtask,
    position: usize,
    total: usize,
    progress: u8,
    sources_found: Option<usize>,
) {
    let query_preview: String = subtask.question.chars().take(50).collect();
    let message = match (ctx.language, sources_found) {
        (Language::Ko, None) => format!("웹 검색 중: {}...", query_preview),
        (Language::En, None) => format!("Searching the web: {}...", query_preview),
        (Language::Ko, Some(n)) => format!("{}개의 검색 결과를 분석하고 있습니다...", n),
        (Language::En, Some(n)) => format!("Analyzing {} search results...", n),
    };

    let detail = EventDetail {
        message,
        description: None,
        current_item: Some(position + 1),
        total_items: Some(total),
        sources_found,
    };
    ctx.bus.publish(
        ProgressEvent::new(
            &ctx.session_id,
            ProgressEventType::ProgressSearching,
            ResearchStage::Research,
            progress,
        )
        .with_detail(detail),
    );
}

/// Render search hits into the researcher prompt context, truncating each
/// snippet to the configured cap
fn build_search_context(
    results: &[crate::search::SearchResult],
    content_truncation: usize,
    language: Language,
) -> String {
    if results.is_empty() {
        return match language {
            Language::Ko => "(검색 결과 없음)".to_string(),
            Language::En => "(no search results available)".to_string(),
        };
    }

    results
        .iter()
        .map(|result| {
            let snippet: String = result.snippet.chars().take(content_truncation).collect();
            format!(
                "Source: {}\nURL: {}\nContent: {}\n",
                result.title, result.url, snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
