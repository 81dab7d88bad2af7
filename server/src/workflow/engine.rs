// The session state machine
//
// Intake -> Clarify -> Brief -> Supervise <-> Research -> Compress ->
// Finalize -> Completed, with Error as the single other terminal state.
// Every external call is cancellable; exactly one terminal transition is
// published per session.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use tokio_util::sync::CancellationToken;

use super::scheduler::{self, SlotBudget, SlotContext, SlotResult};
use super::{CancelRegistry, WorkflowContext};
use crate::language;
use crate::llm::{LlmError, LlmStage};
use crate::models::{
    ErrorKind, EventDetail, Language, ProgressEvent, ProgressEventType, ResearchStage, Session,
    SessionMeta, StartResearchRequest, Subtask, Summary,
};
use crate::prompts::TemplateId;

// Progress milestones for the fixed stages
const PROGRESS_INTAKE: u8 = 2;
const PROGRESS_CLARIFY_START: u8 = 10;
const PROGRESS_CLARIFY_DONE: u8 = 20;
const PROGRESS_BRIEF_DONE: u8 = 40;
const PROGRESS_RESEARCH_START: u8 = 40;
const PROGRESS_RESEARCH_DONE: u8 = 80;
const PROGRESS_COMPRESS_DONE: u8 = 90;

/// Characters of each summary shown back to the supervisor
const SUPERVISOR_SUMMARY_PREVIEW: usize = 600;

/// Validate a request, create the session, and spawn its workflow.
/// Returns once intake has been persisted.
pub async fn start_session(
    ctx: Arc<WorkflowContext>,
    cancels: Arc<CancelRegistry>,
    request: StartResearchRequest,
) -> Result<Session, String> {
    request.validate()?;

    let language = request
        .language
        .unwrap_or_else(|| language::detect(&request.query));
    let depth = request.depth_or_default();
    let max_iterations = ctx
        .engine
        .max_iterations
        .unwrap_or_else(|| depth.max_iterations());

    let meta = SessionMeta {
        id: format!("research-{}", Uuid::new_v4()),
        research_question: request.query.trim().to_string(),
        language,
        depth,
        max_researchers: request.researchers_or_default(),
        max_iterations,
        created_at: Utc::now(),
    };

    let session = ctx.store.create(meta).await?;
    let session_id = session.meta.id.clone();

    // Intake: persist first, then announce
    let session = ctx
        .store
        .update(&session_id, |record| {
            record.set_stage(ResearchStage::Intake, PROGRESS_INTAKE);
        })
        .await?;
    ctx.bus.publish(ProgressEvent::new(
        &session_id,
        ProgressEventType::ProgressUpdate,
        ResearchStage::Intake,
        PROGRESS_INTAKE,
    ));

    let cancel = cancels.register(&session_id);
    let engine_ctx = ctx.clone();
    let engine_cancels = cancels.clone();
    let engine_session = session.clone();
    tokio::spawn(async move {
        run_session(engine_ctx, engine_cancels, engine_session, cancel).await;
    });

    Ok(session)
}

/// Drive one session from Clarify to a terminal state
pub async fn run_session(
    ctx: Arc<WorkflowContext>,
    cancels: Arc<CancelRegistry>,
    session: Session,
    cancel: CancellationToken,
) {
    let engine = Engine {
        ctx,
        cancels,
        cancel,
        session_id: session.meta.id.clone(),
        question: session.meta.research_question.clone(),
        language: session.meta.language,
        max_researchers: session.meta.max_researchers,
        max_iterations: session.meta.max_iterations,
    };

    log::info!(
        "Starting research workflow for session {} ({}, depth {})",
        engine.session_id,
        engine.language,
        session.meta.depth
    );

    match engine.run().await {
        Ok(()) => {
            log::info!("Research complete for session {}", engine.session_id);
        }
        Err(failure) => {
            engine.finish_with_error(failure).await;
        }
    }
}

// ============================================================================
// Internal machinery
// ============================================================================

/// How a stage failed, and where
struct StageFailure {
    stage: ResearchStage,
    kind: ErrorKind,
    message: String,
}

impl StageFailure {
    fn cancelled(stage: ResearchStage) -> Self {
        Self {
            stage,
            kind: ErrorKind::Cancelled,
            message: "cancel requested".to_string(),
        }
    }
}

struct Engine {
    ctx: Arc<WorkflowContext>,
    cancels: Arc<CancelRegistry>,
    cancel: CancellationToken,
    session_id: String,
    question: String,
    language: Language,
    max_researchers: usize,
    max_iterations: u32,
}

#[derive(Deserialize)]
struct SubtaskSpec {
    #[serde(alias = "question")]
    research_question: String,
    #[serde(default)]
    description: String,
}

impl Engine {
    async fn run(&self) -> Result<(), StageFailure> {
        let clarified = self.clarify().await?;
        let brief = self.brief(&clarified).await?;
        let summaries = self.supervise_loop(&clarified, &brief).await?;
        let compressed = self.compress(&summaries).await?;
        self.finalize(&compressed).await
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    async fn clarify(&self) -> Result<String, StageFailure> {
        self.enter_stage(ResearchStage::Clarify, PROGRESS_CLARIFY_START)
            .await?;
        self.emit_thinking(
            ResearchStage::Clarify,
            PROGRESS_CLARIFY_START,
            match self.language {
                Language::Ko => "연구 목표를 분석하고 있습니다...",
                Language::En => "Analyzing the research goal...",
            },
        );

        let prompt = self.render(
            TemplateId::Clarification,
            &[("research_question", self.question.as_str())],
            ResearchStage::Clarify,
        )?;
        let response = self
            .generate(LlmStage::Research, &prompt, ResearchStage::Clarify)
            .await?;

        // The model either waves the question through or restates it
        let clarified = if response.contains("PROCEED_TO_RESEARCH") {
            self.question.clone()
        } else {
            let restated = response.trim();
            if restated.is_empty() {
                self.question.clone()
            } else {
                restated.to_string()
            }
        };

        let stored = clarified.clone();
        self.update(ResearchStage::Clarify, move |record| {
            record.state.clarified_goal = Some(stored);
            record.set_stage(ResearchStage::Clarify, PROGRESS_CLARIFY_DONE);
        })
        .await?;
        self.emit_update(ResearchStage::Clarify, PROGRESS_CLARIFY_DONE);

        Ok(clarified)
    }

    async fn brief(&self, clarified: &str) -> Result<String, StageFailure> {
        self.enter_stage(ResearchStage::Brief, PROGRESS_CLARIFY_DONE)
            .await?;
        self.emit_thinking(
            ResearchStage::Brief,
            PROGRESS_CLARIFY_DONE,
            match self.language {
                Language::Ko => "연구 계획서를 작성하고 있습니다...",
                Language::En => "Writing the research brief...",
            },
        );

        let prompt = self.render(
            TemplateId::ResearchBrief,
            &[("clarified_research_goal", clarified)],
            ResearchStage::Brief,
        )?;
        let brief = self
            .generate(LlmStage::Research, &prompt, ResearchStage::Brief)
            .await?;

        let stored = brief.clone();
        self.update(ResearchStage::Brief, move |record| {
            record.state.brief = Some(stored);
            record.set_stage(ResearchStage::Brief, PROGRESS_BRIEF_DONE);
        })
        .await?;
        self.emit_update(ResearchStage::Brief, PROGRESS_BRIEF_DONE);

        Ok(brief)
    }

    /// Supervise <-> Research until the brief is covered or the cap hits
    async fn supervise_loop(
        &self,
        clarified: &str,
        brief: &str,
    ) -> Result<Vec<Summary>, StageFailure> {
        let mut summaries: Vec<Summary> = Vec::new();
        let mut subtask_count = 0usize;
        let mut iteration = 0u32;

        let mut all_subtasks: Vec<Subtask> = Vec::new();

        loop {
            self.check_cancel(ResearchStage::Supervise)?;

            let progress = self.research_progress(iteration);
            self.enter_stage(ResearchStage::Supervise, progress).await?;

            let new_subtasks = self
                .propose_subtasks(clarified, brief, &summaries, &all_subtasks, progress)
                .await?;

            // Stop conditions: nothing new with results in hand, or cap hit
            if (new_subtasks.is_empty() && !summaries.is_empty())
                || iteration >= self.max_iterations
            {
                if summaries.is_empty() {
                    return Err(StageFailure {
                        stage: ResearchStage::Supervise,
                        kind: ErrorKind::NoProgress,
                        message: format!(
                            "No research summaries after {} iterations",
                            iteration
                        ),
                    });
                }
                return Ok(summaries);
            }

            iteration += 1;

            let batch: Vec<(usize, Subtask)> = new_subtasks
                .iter()
                .cloned()
                .enumerate()
                .map(|(offset, task)| (subtask_count + offset, task))
                .collect();
            subtask_count += new_subtasks.len();
            all_subtasks.extend(new_subtasks.iter().cloned());

            let stored_tasks = new_subtasks.clone();
            let start_progress = self.research_progress(iteration - 1);
            self.update(ResearchStage::Research, move |record| {
                record.state.subtasks.extend(stored_tasks);
                record.state.iteration = iteration;
                record.set_stage(ResearchStage::Research, start_progress);
            })
            .await?;
            self.emit_update(ResearchStage::Research, start_progress);

            let batch_results = self.research(batch, start_progress).await?;
            let end_progress = self.research_progress(iteration);

            let new_summaries = batch_results.clone();
            self.update(ResearchStage::Research, move |record| {
                for item in new_summaries {
                    match item {
                        BatchItem::Finding { summary, degraded } => {
                            if degraded {
                                record.state.record_error(
                                    ResearchStage::Research,
                                    ErrorKind::SearchDegraded,
                                    format!(
                                        "Search returned no results for '{}'",
                                        summary.question
                                    ),
                                    true,
                                );
                            }
                            record.state.summaries.push(summary);
                        }
                        BatchItem::SlotFailure {
                            summary,
                            kind,
                            message,
                        } => {
                            record
                                .state
                                .record_error(ResearchStage::Research, kind, message, true);
                            record.state.summaries.push(summary);
                        }
                    }
                }
                record.set_stage(ResearchStage::Research, end_progress);
            })
            .await?;
            self.emit_update(ResearchStage::Research, end_progress);

            // Mirror the persisted summaries for the next supervisor round
            for item in batch_results {
                match item {
                    BatchItem::Finding { summary, .. } => summaries.push(summary),
                    BatchItem::SlotFailure { summary, .. } => summaries.push(summary),
                }
            }
        }
    }

    /// Ask the supervisor for up to L new subtasks, collapsing duplicates
    async fn propose_subtasks(
        &self,
        clarified: &str,
        brief: &str,
        summaries: &[Summary],
        existing: &[Subtask],
        progress: u8,
    ) -> Result<Vec<Subtask>, StageFailure> {
        self.emit_thinking(
            ResearchStage::Supervise,
            progress,
            match self.language {
                Language::Ko => "연구 과제를 계획하고 있습니다...",
                Language::En => "Planning research tasks...",
            },
        );

        let completed = self.completed_research_text(summaries);
        let max_subtasks = self.max_researchers.to_string();
        let prompt = self.render(
            TemplateId::Supervisor,
            &[
                ("research_brief", brief),
                ("completed_research", completed.as_str()),
                ("max_subtasks", max_subtasks.as_str()),
            ],
            ResearchStage::Supervise,
        )?;
        let response = self
            .generate(LlmStage::Research, &prompt, ResearchStage::Supervise)
            .await?;

        let proposed = match parse_subtasks(&response) {
            Some(tasks) => tasks,
            None => {
                // Unparseable response: fall back to one broad task
                log::warn!(
                    "Could not parse supervisor response for session {}, using fallback task",
                    self.session_id
                );
                vec![Subtask {
                    question: clarified.to_string(),
                    description: "Comprehensive research on the given topic".to_string(),
                }]
            }
        };

        // Collapse duplicates (trim + casefold) against earlier tasks and
        // within the batch, then cap at the researcher limit
        let mut seen: std::collections::HashSet<String> =
            existing.iter().map(|t| t.dedup_key()).collect();
        let mut accepted = Vec::new();
        for task in proposed {
            if task.question.trim().is_empty() {
                continue;
            }
            if !seen.insert(task.dedup_key()) {
                continue;
            }
            accepted.push(task);
            if accepted.len() >= self.max_researchers {
                break;
            }
        }
        Ok(accepted)
    }

    async fn research(
        &self,
        batch: Vec<(usize, Subtask)>,
        progress: u8,
    ) -> Result<Vec<BatchItem>, StageFailure> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let slot_ctx = SlotContext {
            llm: self.ctx.llm.clone(),
            search: self.ctx.search.clone(),
            prompts: self.ctx.prompts.clone(),
            bus: self.ctx.bus.clone(),
            session_id: self.session_id.clone(),
            language: self.language,
            stream_enabled: self.ctx.stream_enabled,
        };
        let budget = SlotBudget {
            slot_timeout: std::time::Duration::from_millis(self.ctx.engine.slot_timeout_ms),
            // None lets the search gateway apply its configured default
            max_results: None,
            content_truncation: self.ctx.engine.content_truncation,
        };

        let questions: Vec<(usize, String)> = batch
            .iter()
            .map(|(index, task)| (*index, task.question.clone()))
            .collect();

        let results = scheduler::run_batch(
            slot_ctx,
            batch,
            budget,
            self.max_researchers,
            progress,
            self.cancel.clone(),
        )
        .await;

        let mut items = Vec::with_capacity(results.len());
        for (result, (subtask_index, question)) in results.into_iter().zip(questions) {
            match result {
                SlotResult::Summary { summary, degraded } => {
                    items.push(BatchItem::Finding { summary, degraded });
                }
                SlotResult::Error { kind, message } => {
                    items.push(BatchItem::SlotFailure {
                        summary: Summary::empty(subtask_index, question),
                        kind,
                        message,
                    });
                }
                SlotResult::Cancelled => {
                    return Err(StageFailure::cancelled(ResearchStage::Research));
                }
            }
        }

        self.check_cancel(ResearchStage::Research)?;
        Ok(items)
    }

    async fn compress(&self, summaries: &[Summary]) -> Result<String, StageFailure> {
        self.enter_stage(ResearchStage::Compress, PROGRESS_RESEARCH_DONE)
            .await?;
        self.emit_thinking(
            ResearchStage::Compress,
            PROGRESS_RESEARCH_DONE,
            match self.language {
                Language::Ko => "연구 결과를 통합하고 있습니다...",
                Language::En => "Consolidating research findings...",
            },
        );

        let summaries_text = summaries
            .iter()
            .map(|s| {
                format!(
                    "Research Question: {}\nSummary: {}\nSources: {}",
                    s.question,
                    s.text,
                    s.sources.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let prompt = self.render(
            TemplateId::Compression,
            &[("research_summaries", summaries_text.as_str())],
            ResearchStage::Compress,
        )?;
        let compressed = self
            .generate(LlmStage::Compression, &prompt, ResearchStage::Compress)
            .await?;

        self.update(ResearchStage::Compress, |record| {
            record.set_stage(ResearchStage::Compress, PROGRESS_COMPRESS_DONE);
        })
        .await?;
        self.emit_update(ResearchStage::Compress, PROGRESS_COMPRESS_DONE);

        Ok(compressed)
    }

    async fn finalize(&self, compressed: &str) -> Result<(), StageFailure> {
        self.enter_stage(ResearchStage::Finalize, PROGRESS_COMPRESS_DONE)
            .await?;
        self.emit_thinking(
            ResearchStage::Finalize,
            PROGRESS_COMPRESS_DONE,
            match self.language {
                Language::Ko => "최종 보고서를 정리하고 있습니다...",
                Language::En => "Polishing the final report...",
            },
        );

        let prompt = self.render(
            TemplateId::FinalReport,
            &[
                ("research_question", self.question.as_str()),
                ("compressed_research", compressed),
            ],
            ResearchStage::Finalize,
        )?;
        let report = self
            .generate(LlmStage::FinalReport, &prompt, ResearchStage::Finalize)
            .await?;
        let report = if report.trim().is_empty() {
            compressed.to_string()
        } else {
            report
        };

        let stored = report.clone();
        self.update(ResearchStage::Finalize, move |record| {
            record.state.final_report = Some(stored);
            record.set_stage(ResearchStage::Completed, 100);
        })
        .await?;

        if let Err(e) = self.ctx.store.save_report(&self.session_id, &report).await {
            log::warn!(
                "Failed to write report artefact for {}: {}",
                self.session_id,
                e
            );
        }

        let message = match self.language {
            Language::Ko => "연구가 완료되었습니다.",
            Language::En => "Research completed successfully.",
        };
        self.ctx.bus.publish(
            ProgressEvent::new(
                &self.session_id,
                ProgressEventType::ResearchComplete,
                ResearchStage::Completed,
                100,
            )
            .with_detail(EventDetail::message(message)),
        );
        self.ctx.bus.close(&self.session_id);
        self.cancels.remove(&self.session_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Terminal error path
    // ------------------------------------------------------------------

    async fn finish_with_error(&self, failure: StageFailure) {
        log::error!(
            "Session {} failed in {}: {} ({})",
            self.session_id,
            failure.stage,
            failure.message,
            failure.kind.code()
        );

        let localized = failure.kind.localized_message(self.language).to_string();
        let kind = failure.kind;
        let stage = failure.stage;
        let message = failure.message.clone();
        let persist = self
            .ctx
            .store
            .update(&self.session_id, move |record| {
                record.state.record_error(stage, kind, message, false);
                record.set_error(kind, localized);
            })
            .await;
        if let Err(e) = persist {
            log::error!(
                "Failed to persist error state for {}: {}",
                self.session_id,
                e
            );
        }

        let current_progress = match self.load_session().await {
            Ok(session) => session.record.progress,
            Err(_) => 0,
        };

        let event = ProgressEvent::new(
            &self.session_id,
            ProgressEventType::Error,
            ResearchStage::Error,
            current_progress,
        )
        .with_detail(EventDetail {
            message: failure.kind.localized_message(self.language).to_string(),
            description: Some(format!("Failed during {}", failure.stage)),
            ..Default::default()
        })
        .with_error(failure.kind, failure.kind.localized_message(self.language));
        self.ctx.bus.publish(event);
        self.ctx.bus.close(&self.session_id);
        self.cancels.remove(&self.session_id);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn research_progress(&self, iteration: u32) -> u8 {
        let span = (PROGRESS_RESEARCH_DONE - PROGRESS_RESEARCH_START) as u32;
        let scaled = PROGRESS_RESEARCH_START as u32
            + (span * iteration.min(self.max_iterations)) / self.max_iterations.max(1);
        scaled as u8
    }

    fn completed_research_text(&self, summaries: &[Summary]) -> String {
        if summaries.is_empty() {
            return match self.language {
                Language::Ko => "(아직 없음)".to_string(),
                Language::En => "(none yet)".to_string(),
            };
        }
        summaries
            .iter()
            .map(|s| {
                let preview: String = s.text.chars().take(SUPERVISOR_SUMMARY_PREVIEW).collect();
                format!("### {}\n{}", s.question, preview)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn check_cancel(&self, stage: ResearchStage) -> Result<(), StageFailure> {
        if self.cancel.is_cancelled() {
            Err(StageFailure::cancelled(stage))
        } else {
            Ok(())
        }
    }

    fn render(
        &self,
        template: TemplateId,
        vars: &[(&str, &str)],
        stage: ResearchStage,
    ) -> Result<String, StageFailure> {
        self.ctx
            .prompts
            .render(template, self.language, vars)
            .map_err(|message| StageFailure {
                stage,
                kind: ErrorKind::Internal,
                message,
            })
    }

    /// Call the LLM gateway, recording recoverable fallback notes
    async fn generate(
        &self,
        llm_stage: LlmStage,
        prompt: &str,
        stage: ResearchStage,
    ) -> Result<String, StageFailure> {
        self.check_cancel(stage)?;

        match self.ctx.llm.generate(llm_stage, prompt, &self.cancel).await {
            Ok(outcome) => {
                if !outcome.fallback_errors.is_empty() {
                    let notes = outcome.fallback_errors.clone();
                    let _ = self
                        .ctx
                        .store
                        .update(&self.session_id, move |record| {
                            for note in notes {
                                record.state.record_error(
                                    stage,
                                    ErrorKind::LlmUnavailable,
                                    note,
                                    true,
                                );
                            }
                        })
                        .await;
                }
                Ok(outcome.text)
            }
            Err(LlmError::Cancelled) => Err(StageFailure::cancelled(stage)),
            Err(LlmError::Unavailable(message)) => Err(StageFailure {
                stage,
                kind: ErrorKind::LlmUnavailable,
                message,
            }),
        }
    }

    async fn enter_stage(&self, stage: ResearchStage, progress: u8) -> Result<(), StageFailure> {
        self.check_cancel(stage)?;
        self.update(stage, move |record| {
            record.set_stage(stage, progress);
        })
        .await?;
        self.emit_update(stage, progress);
        Ok(())
    }

    async fn update<F>(&self, stage: ResearchStage, mutator: F) -> Result<Session, StageFailure>
    where
        F: FnOnce(&mut crate::models::SessionRecord),
    {
        self.ctx
            .store
            .update(&self.session_id, mutator)
            .await
            .map_err(|message| StageFailure {
                stage,
                kind: ErrorKind::Internal,
                message,
            })
    }

    async fn load_session(&self) -> Result<Session, StageFailure> {
        match self.ctx.store.load(&self.session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(StageFailure {
                stage: ResearchStage::Intake,
                kind: ErrorKind::Internal,
                message: format!("Session '{}' disappeared", self.session_id),
            }),
            Err(message) => Err(StageFailure {
                stage: ResearchStage::Intake,
                kind: ErrorKind::Internal,
                message,
            }),
        }
    }

    fn emit_update(&self, stage: ResearchStage, progress: u8) {
        self.ctx.bus.publish(ProgressEvent::new(
            &self.session_id,
            ProgressEventType::ProgressUpdate,
            stage,
            progress,
        ));
    }

    fn emit_thinking(&self, stage: ResearchStage, progress: u8, message: &str) {
        self.ctx.bus.publish(
            ProgressEvent::new(
                &self.session_id,
                ProgressEventType::ProgressThinking,
                stage,
                progress,
            )
            .with_detail(EventDetail::message(message)),
        );
    }
}

/// One processed slot outcome, ready to fold into the research state
#[derive(Debug, Clone)]
enum BatchItem {
    Finding { summary: Summary, degraded: bool },
    SlotFailure {
        summary: Summary,
        kind: ErrorKind,
        message: String,
    },
}

/// Pull a JSON task list out of the supervisor's reply.
/// None means unparseable; an empty list means "nothing left to research".
fn parse_subtasks(response: &str) -> Option<Vec<Subtask>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end <= start {
        return None;
    }

    let specs: Vec<SubtaskSpec> = serde_json::from_str(&response[start..=end]).ok()?;
    Some(
        specs
            .into_iter()
            .map(|spec| Subtask {
                question: spec.research_question,
                description: if spec.description.is_empty() {
                    "Comprehensive research on the question".to_string()
                } else {
                    spec.description
                },
            })
            .collect(),
    )
}
