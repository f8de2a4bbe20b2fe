//! Execution agent API
//!
//! The agent polls for staged work, claims it, reports progress and moves
//! machine-owned migrations to their next status.

use crate::error::ApiResult;
use crate::migration::{Migration, RunProgress, StagedMigration};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    #[serde(default)]
    pub error_message: Option<String>,
}

type MigrationResponse = ApiResult<Json<SuccessResponse<Migration>>>;

pub async fn staged(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<Vec<StagedMigration>>>> {
    let staged = state.engine.staged().await?;
    debug!("{} staged migrations handed out", staged.len());
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} staged migrations", staged.len()),
        staged,
    )))
}

pub async fn unstage(State(state): State<SharedState>, Path(id): Path<Uuid>) -> MigrationResponse {
    let migration = state.engine.unstage(id).await?;
    Ok(Json(SuccessResponse::with_data("Migration unstaged", migration)))
}

pub async fn next_step(State(state): State<SharedState>, Path(id): Path<Uuid>) -> MigrationResponse {
    let migration = state.engine.next_step(id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Migration moved to {}", migration.status),
        migration,
    )))
}

pub async fn offer(State(state): State<SharedState>, Path(id): Path<Uuid>) -> MigrationResponse {
    let migration = state.engine.offer(id).await?;
    Ok(Json(SuccessResponse::with_data("Migration offered", migration)))
}

pub async fn update(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(progress): Json<RunProgress>,
) -> MigrationResponse {
    let migration = state.engine.update_progress(id, progress).await?;
    Ok(Json(SuccessResponse::with_data("Migration updated", migration)))
}

pub async fn complete(State(state): State<SharedState>, Path(id): Path<Uuid>) -> MigrationResponse {
    let migration = state.engine.complete(id).await?;
    Ok(Json(SuccessResponse::with_data("Migration completed", migration)))
}

pub async fn cancel(State(state): State<SharedState>, Path(id): Path<Uuid>) -> MigrationResponse {
    let migration = state.engine.cancel(id).await?;
    Ok(Json(SuccessResponse::with_data("Migration canceled", migration)))
}

pub async fn fail(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(report): Json<FailureReport>,
) -> MigrationResponse {
    let migration = state.engine.fail(id, report.error_message).await?;
    Ok(Json(SuccessResponse::with_data("Migration failed", migration)))
}

pub async fn error(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(report): Json<FailureReport>,
) -> MigrationResponse {
    let migration = state.engine.error(id, report.error_message).await?;
    Ok(Json(SuccessResponse::with_data("Migration errored", migration)))
}
