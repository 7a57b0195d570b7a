//! Dashboard statistics

use axum::{extract::State, Extension, Json};
use bulkmail_common::types::Plan;
use serde::Serialize;
use std::sync::Arc;

use super::{api_error, ApiResult};
use crate::auth::{AppState, AuthUser};

#[derive(Debug, Serialize)]
pub struct EmailStatsResponse {
    pub total: i64,
    pub success: i64,
    pub failed: i64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub success: bool,
    pub plan: Plan,
    pub emails_today: i32,
    pub total_emails: i64,
    pub daily_limit: i32,
    pub remaining_today: i32,
    pub email_stats: EmailStatsResponse,
    pub smtp_accounts: i64,
    pub templates: i64,
}

/// Quota usage and send history summary for the current user
///
/// GET /api/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<StatsResponse>> {
    let user_id = auth.user.id;

    let usage = state.quota.usage(user_id).await.map_err(api_error)?;
    let stats = state
        .repos
        .email_logs
        .stats_by_user(user_id)
        .await
        .map_err(api_error)?;
    let smtp_accounts = state
        .repos
        .smtp_accounts
        .count(user_id)
        .await
        .map_err(api_error)?;
    let templates = state
        .repos
        .templates
        .count(user_id)
        .await
        .map_err(api_error)?;

    Ok(Json(StatsResponse {
        success: true,
        plan: usage.plan,
        emails_today: usage.emails_today,
        total_emails: usage.total_emails,
        daily_limit: usage.daily_limit,
        remaining_today: usage.remaining_today,
        email_stats: EmailStatsResponse {
            total: stats.total,
            success: stats.sent,
            failed: stats.failed,
            success_rate: stats.success_rate(),
        },
        smtp_accounts,
        templates,
    }))
}
