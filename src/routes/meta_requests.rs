//! Meta request route handlers

use crate::auth::Principal;
use crate::error::ApiResult;
use crate::migration::requests::{BulkActionRequest, EditMetaRequest, MetaRequestForm};
use crate::migration::{BulkResult, MetaRequest, MetaRequestView, Migration};
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRequestResponse {
    #[serde(flatten)]
    pub meta_request: MetaRequest,
    pub members: Vec<Migration>,
}

pub async fn create_meta_request(
    State(state): State<SharedState>,
    principal: Principal,
    Json(payload): Json<MetaRequestForm>,
) -> ApiResult<(StatusCode, Json<SuccessResponse<MetaRequestResponse>>)> {
    let (meta_request, members) = state.engine.create_meta_request(&principal, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::with_data(
            format!("Meta request created with {} migrations", members.len()),
            MetaRequestResponse { meta_request, members },
        )),
    ))
}

pub async fn get_meta_request(
    State(state): State<SharedState>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<MetaRequestView>>> {
    let view = state.engine.view_meta_request(&principal, id).await?;
    Ok(Json(SuccessResponse::with_data("Meta request retrieved", view)))
}

pub async fn edit_meta_request(
    State(state): State<SharedState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<EditMetaRequest>,
) -> ApiResult<Json<SuccessResponse<MetaRequestResponse>>> {
    let (meta_request, members) = state.engine.edit_meta_request(&principal, id, payload).await?;
    Ok(Json(SuccessResponse::with_data(
        "Meta request updated",
        MetaRequestResponse { meta_request, members },
    )))
}

pub async fn bulk_action(
    State(state): State<SharedState>,
    principal: Principal,
    Path(id): Path<Uuid>,
    Json(payload): Json<BulkActionRequest>,
) -> ApiResult<Json<SuccessResponse<BulkResult>>> {
    let result = state.engine.bulk_action(&principal, id, payload).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} applied to {} migrations", result.action, result.applied.len()),
        result,
    )))
}
