//! Migration route handlers
//!
//! The human-facing API: request, inspect, edit and act on one migration.

use crate::auth::Principal;
use crate::error::{validation_error, ApiResult, AppError};
use crate::migration::models::parse_status;
use crate::migration::requests::{EditMigrationRequest, MigrationRequest};
use crate::migration::{Migration, MigrationView, RunType, WorkflowAction};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Status name or code
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockQuery {
    pub lock_version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default)]
    pub lock_version: Option<i64>,
    /// Picks the approval for `approve`
    #[serde(default)]
    pub runtype: Option<RunType>,
}

/// Resolve the action path segment; `approve` needs a run type
fn resolve_action(name: &str, runtype: Option<RunType>) -> Result<WorkflowAction, AppError> {
    if name == "approve" {
        return runtype
            .and_then(WorkflowAction::approval_for)
            .ok_or_else(|| AppError::BadRequest("approve needs a runtype of long, short or nocheckalter".to_string()));
    }
    name.parse()
        .map_err(|_| AppError::BadRequest(format!("Unknown action '{}'", name)))
}

pub async fn create_migration(
    State(state): State<SharedState>,
    principal: Principal,
    Json(payload): Json<MigrationRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Migration>>)> {
    let migration = state.engine.create(&principal, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Migration requested", migration)),
    ))
}

pub async fn list_migrations(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SuccessResponse<Vec<Migration>>>> {
    let status = match query.state.as_deref() {
        Some(s) => Some(parse_status(s).ok_or_else(|| validation_error(format!("Unknown state '{}'", s)))?),
        None => None,
    };
    let migrations = state.engine.list(status).await?;
    debug!("Listed {} migrations", migrations.len());

    Ok(Json(SuccessResponse::with_data(
        format!("Found {} migrations", migrations.len()),
        migrations,
    )))
}

pub async fn get_migration(
    State(state): State<SharedState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<MigrationView>>> {
    let view = state.engine.view(&principal, id).await?;
    Ok(Json(SuccessResponse::with_data("Migration retrieved", view)))
}

pub async fn edit_migration(
    State(state): State<SharedState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<EditMigrationRequest>,
) -> ApiResult<Json<SuccessResponse<Migration>>> {
    let migration = state.engine.edit(&principal, id, payload).await?;
    Ok(Json(SuccessResponse::with_data("Migration updated", migration)))
}

pub async fn delete_migration(
    State(state): State<SharedState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Query(query): Query<LockQuery>,
) -> ApiResult<Json<SuccessResponse<Migration>>> {
    let migration = state
        .engine
        .perform(&principal, id, WorkflowAction::Delete, query.lock_version)
        .await?;
    Ok(Json(SuccessResponse::with_data("Migration deleted", migration)))
}

pub async fn perform_action(
    State(state): State<SharedState>,
    principal: Principal,
    Path((id, action)): Path<(Uuid, String)>,
    Json(payload): Json<ActionRequest>,
) -> ApiResult<Json<SuccessResponse<Migration>>> {
    let action = resolve_action(&action, payload.runtype)?;
    let migration = state
        .engine
        .perform(&principal, id, action, payload.lock_version)
        .await?;
    Ok(Json(SuccessResponse::with_data(format!("{} applied", action), migration)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_action() {
        assert_eq!(resolve_action("start", None).unwrap(), WorkflowAction::Start);
        assert_eq!(
            resolve_action("approve", Some(RunType::NoCheckAlter)).unwrap(),
            WorkflowAction::ApproveNoCheckAlter
        );
        assert!(resolve_action("approve", Some(RunType::Undecided)).is_err());
        assert!(resolve_action("approve", None).is_err());
        assert!(resolve_action("explode", None).is_err());
    }
}
