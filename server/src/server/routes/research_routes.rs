//! Research session routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::models::{
    ApiError, ErrorKind, ListSessionsQuery, ListSessionsResponse, ReportResponse, ResearchStage,
    StartResearchRequest, StartResearchResponse,
};
use crate::server::ServerAppState;
use crate::workflow;

/// Default page size for session listings
const DEFAULT_PAGE_SIZE: usize = 50;

type Response = axum::response::Response;

fn error_response(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiError {
            kind,
            message: message.into(),
        }),
    )
        .into_response()
}

/// POST /api/v1/research/start
pub async fn start_research(
    State(state): State<ServerAppState>,
    Json(request): Json<StartResearchRequest>,
) -> Response {
    if let Err(message) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, ErrorKind::InvalidInput, message);
    }

    match workflow::start_session(state.workflow.clone(), state.cancels.clone(), request).await {
        Ok(session) => Json(StartResearchResponse {
            session_id: session.meta.id.clone(),
            status: "started".to_string(),
            language: session.meta.language,
        })
        .into_response(),
        Err(message) => {
            log::error!("Failed to start research: {}", message);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                message,
            )
        }
    }
}

/// GET /api/v1/research
pub async fn list_sessions(
    State(state): State<ServerAppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Response {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    match state.workflow.store.list(query.stage, offset, limit).await {
        Ok((sessions, total)) => Json(ListSessionsResponse { sessions, total }).into_response(),
        Err(message) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal,
            message,
        ),
    }
}

/// GET /api/v1/research/:session_id
pub async fn get_status(
    State(state): State<ServerAppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.workflow.store.load(&session_id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::NotFound,
            format!("Session '{}' not found", session_id),
        ),
        Err(message) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal,
            message,
        ),
    }
}

/// GET /api/v1/research/:session_id/report
pub async fn get_report(
    State(state): State<ServerAppState>,
    Path(session_id): Path<String>,
) -> Response {
    let session = match state.workflow.store.load(&session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                ErrorKind::NotFound,
                format!("Session '{}' not found", session_id),
            )
        }
        Err(message) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                message,
            )
        }
    };

    let report = match (
        session.record.stage,
        session.record.state.final_report.clone(),
    ) {
        (ResearchStage::Completed, Some(report)) => report,
        _ => {
            return error_response(
                StatusCode::NOT_FOUND,
                ErrorKind::NotFound,
                "Report not yet available",
            )
        }
    };

    Json(ReportResponse {
        session_id: session.meta.id.clone(),
        research_question: session.meta.research_question.clone(),
        language: session.meta.language,
        report,
        sources: session
            .record
            .state
            .summaries
            .iter()
            .map(|s| s.sources.clone())
            .collect(),
        generated_at: session.record.updated_at,
    })
    .into_response()
}

/// POST /api/v1/research/:session_id/cancel
///
/// Idempotent: cancelling a finished session changes nothing.
pub async fn cancel_research(
    State(state): State<ServerAppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.workflow.store.load(&session_id).await {
        Ok(Some(_)) => {
            state.cancels.cancel(&session_id);
            Json(json!({ "sessionId": session_id, "status": "cancelling" })).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::NotFound,
            format!("Session '{}' not found", session_id),
        ),
        Err(message) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal,
            message,
        ),
    }
}

/// DELETE /api/v1/research/:session_id
pub async fn delete_session(
    State(state): State<ServerAppState>,
    Path(session_id): Path<String>,
) -> Response {
    // Stop any running workflow before removing its state
    state.cancels.cancel(&session_id);

    match state.workflow.store.delete(&session_id).await {
        Ok(true) => {
            state.workflow.bus.remove(&session_id);
            Json(json!({ "sessionId": session_id, "status": "deleted" })).into_response()
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            ErrorKind::NotFound,
            format!("Session '{}' not found", session_id),
        ),
        Err(message) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal,
            message,
        ),
    }
}
