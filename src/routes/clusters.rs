//! Cluster registration and the standalone parser endpoint

use crate::auth::Principal;
use crate::ddl::Classification;
use crate::error::{ApiResult, AppError};
use crate::migration::Cluster;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClusterRequest {
    pub name: String,
    pub rw_host: String,
    #[serde(default = "default_port")]
    pub port: i32,
    #[serde(default)]
    pub admin_review_required: bool,
    #[serde(default)]
    pub owners: Vec<String>,
}

fn default_port() -> i32 {
    3306
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseRequest {
    pub ddl_statement: String,
}

/// Admins only
pub async fn register_cluster(
    State(state): State<SharedState>,
    principal: Principal,
    Json(payload): Json<RegisterClusterRequest>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<Cluster>>)> {
    if !principal.is_admin() {
        return Err(AppError::Forbidden("Only admins may register clusters".to_string()));
    }
    let cluster = state
        .engine
        .register_cluster(Cluster {
            name: payload.name.trim().to_string(),
            rw_host: payload.rw_host.trim().to_string(),
            port: payload.port,
            admin_review_required: payload.admin_review_required,
            owners: payload.owners,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data("Cluster registered", cluster)),
    ))
}

pub async fn list_clusters(State(state): State<SharedState>) -> ApiResult<Json<SuccessResponse<Vec<Cluster>>>> {
    let clusters = state.engine.list_clusters().await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Found {} clusters", clusters.len()),
        clusters,
    )))
}

/// Classify a statement without consulting any cluster
pub async fn parse_statement(
    State(state): State<SharedState>,
    Json(payload): Json<ParseRequest>,
) -> ApiResult<Json<SuccessResponse<Classification>>> {
    let classification = state.engine.classify_statement(&payload.ddl_statement)?;
    Ok(Json(SuccessResponse::with_data("Statement classified", classification)))
}
