//! Admin handlers for premium requests

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use bulkmail_common::types::Plan;
use bulkmail_common::Error;
use bulkmail_storage::models::{PremiumRequest, PremiumRequestStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, ApiResult};
use crate::auth::{require_admin, AppState, AuthUser};

#[derive(Debug, Serialize)]
pub struct PremiumRequestListResponse {
    pub success: bool,
    pub requests: Vec<PremiumRequest>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub success: bool,
    pub request: PremiumRequest,
}

/// Pending premium requests
///
/// GET /api/admin/premium-requests
pub async fn list_premium_requests(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<PremiumRequestListResponse>> {
    require_admin(&auth)?;

    let requests = state
        .repos
        .premium_requests
        .list(Some(PremiumRequestStatus::Pending))
        .await
        .map_err(api_error)?;

    Ok(Json(PremiumRequestListResponse {
        success: true,
        requests,
    }))
}

/// POST /api/admin/premium-requests/:id/approve
pub async fn approve_premium_request(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<DecisionResponse>> {
    decide(&state, &auth, request_id, true).await
}

/// POST /api/admin/premium-requests/:id/reject
pub async fn reject_premium_request(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(request_id): Path<Uuid>,
) -> ApiResult<Json<DecisionResponse>> {
    decide(&state, &auth, request_id, false).await
}

async fn decide(
    state: &AppState,
    auth: &AuthUser,
    request_id: Uuid,
    approve: bool,
) -> ApiResult<Json<DecisionResponse>> {
    require_admin(auth)?;

    let Some(request) = state
        .repos
        .premium_requests
        .decide(request_id, approve, auth.user.id)
        .await
        .map_err(api_error)?
    else {
        let existing = state
            .repos
            .premium_requests
            .get(request_id)
            .await
            .map_err(api_error)?;
        return Err(api_error(match existing {
            Some(r) => Error::Conflict(format!("Request already {}", r.status)),
            None => Error::NotFound("Premium request not found".to_string()),
        }));
    };

    if approve {
        state
            .repos
            .users
            .set_plan(request.user_id, Plan::Premium)
            .await
            .map_err(api_error)?;
    }

    info!(
        request_id = %request.id,
        user_id = %request.user_id,
        admin_id = %auth.user.id,
        status = %request.status,
        "Premium request decided"
    );

    Ok(Json(DecisionResponse {
        success: true,
        request,
    }))
}
