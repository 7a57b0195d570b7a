//! Plan upgrade requests

use axum::{extract::State, http::StatusCode, Extension, Json};
use bulkmail_common::types::Plan;
use bulkmail_common::Error;
use bulkmail_storage::models::PremiumRequest;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::{api_error, ApiResult};
use crate::auth::{AppState, AuthUser};

#[derive(Debug, Serialize)]
pub struct UpgradeResponse {
    pub success: bool,
    pub message: String,
    pub plan: Plan,
    pub daily_limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<PremiumRequest>,
}

/// Ask for the premium plan
///
/// POST /api/upgrade
///
/// Applied at once when `quota.auto_approve_upgrades` is set; otherwise a
/// pending request waits for an admin and the response is 202.
pub async fn request_upgrade(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<(StatusCode, Json<UpgradeResponse>)> {
    let user = &auth.user;

    if user.plan_enum() == Plan::Premium {
        return Ok((
            StatusCode::OK,
            Json(UpgradeResponse {
                success: true,
                message: "Already on the premium plan".to_string(),
                plan: Plan::Premium,
                daily_limit: state.quota.limit_for(Plan::Premium),
                request: None,
            }),
        ));
    }

    if state.config.quota.auto_approve_upgrades {
        state
            .repos
            .users
            .set_plan(user.id, Plan::Premium)
            .await
            .map_err(api_error)?
            .ok_or_else(|| api_error(Error::NotFound("User not found".to_string())))?;

        info!(user_id = %user.id, "User upgraded to premium");

        return Ok((
            StatusCode::OK,
            Json(UpgradeResponse {
                success: true,
                message: "Upgraded to premium plan".to_string(),
                plan: Plan::Premium,
                daily_limit: state.quota.limit_for(Plan::Premium),
                request: None,
            }),
        ));
    }

    let request = state
        .repos
        .premium_requests
        .create(user.id)
        .await
        .map_err(api_error)?;

    info!(user_id = %user.id, request_id = %request.id, "Premium upgrade requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(UpgradeResponse {
            success: true,
            message: "Upgrade request submitted for approval".to_string(),
            plan: Plan::Free,
            daily_limit: state.quota.limit_for(Plan::Free),
            request: Some(request),
        }),
    ))
}
