//! The timetable routes: one offset, all available offsets, every non-negative offset, or the
//! next `count` offsets from the current week.

use axum::extract::{Extension, Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::config::ExtractionOptions;
use crate::error::{AdapterError, AdapterResult};
use crate::model::{TimetableData, Warning};
use crate::orchestrator;
use crate::server::middleware::CookieHeader;
use crate::server::state::AppState;

#[derive(Serialize)]
struct BatchResponse {
    weeks: Vec<TimetableData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<Warning>,
}

/// A single week's offset is a direct win/loss: either the data comes back, or the request
/// fails with the error that caused it — there's no sibling offset to attach a warning to.
pub async fn single_week(
    State(state): State<AppState>,
    Extension(cookie): Extension<CookieHeader>,
    Path((_username, offset)): Path<(String, i32)>,
    Query(options): Query<ExtractionOptions>,
) -> AdapterResult<impl IntoResponse> {
    let student_id = options.require_student_id()?.to_string();
    let fetch_opts = options.into_fetch_options(&state.config);
    let data = orchestrator::fetch_week(
        &state.transport,
        &state.teacher_cache,
        &cookie.0,
        &student_id,
        offset,
        &fetch_opts,
    )
    .await?;
    Ok(Json(data))
}

pub async fn all_weeks(
    State(state): State<AppState>,
    Extension(cookie): Extension<CookieHeader>,
    Path(_username): Path<String>,
    Query(options): Query<ExtractionOptions>,
) -> AdapterResult<impl IntoResponse> {
    let student_id = options.require_student_id()?.to_string();
    let fetch_opts = options.into_fetch_options(&state.config);
    let offsets =
        orchestrator::available_offsets(&state.transport, &cookie.0, &student_id).await?;
    let (weeks, warnings) = orchestrator::fetch_weeks(
        &state.transport,
        &state.teacher_cache,
        &cookie.0,
        &student_id,
        &offsets,
        &fetch_opts,
    )
    .await?;
    Ok(Json(BatchResponse { weeks, warnings }))
}

pub async fn current_forward(
    State(state): State<AppState>,
    Extension(cookie): Extension<CookieHeader>,
    Path(_username): Path<String>,
    Query(options): Query<ExtractionOptions>,
) -> AdapterResult<impl IntoResponse> {
    let student_id = options.require_student_id()?.to_string();
    let fetch_opts = options.into_fetch_options(&state.config);
    let all_offsets =
        orchestrator::available_offsets(&state.transport, &cookie.0, &student_id).await?;
    let offsets: Vec<i32> = all_offsets.into_iter().filter(|&o| o >= 0).collect();
    let (weeks, warnings) = orchestrator::fetch_weeks(
        &state.transport,
        &state.teacher_cache,
        &cookie.0,
        &student_id,
        &offsets,
        &fetch_opts,
    )
    .await?;
    Ok(Json(BatchResponse { weeks, warnings }))
}

pub async fn forward_count(
    State(state): State<AppState>,
    Extension(cookie): Extension<CookieHeader>,
    Path((_username, count)): Path<(String, i32)>,
    Query(options): Query<ExtractionOptions>,
) -> AdapterResult<impl IntoResponse> {
    if count < 0 {
        return Err(AdapterError::InputError(
            "count must not be negative".to_string(),
        ));
    }
    let student_id = options.require_student_id()?.to_string();
    let fetch_opts = options.into_fetch_options(&state.config);
    let offsets: Vec<i32> = (0..=count).collect();
    let (weeks, warnings) = orchestrator::fetch_weeks(
        &state.transport,
        &state.teacher_cache,
        &cookie.0,
        &student_id,
        &offsets,
        &fetch_opts,
    )
    .await?;
    Ok(Json(BatchResponse { weeks, warnings }))
}
