//! Send history

use axum::{
    extract::{Query, State},
    Extension, Json,
};
use bulkmail_common::types::PageRequest;
use bulkmail_storage::models::EmailLogView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{api_error, ApiResult};
use crate::auth::{AppState, AuthUser};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub to_email: String,
    pub subject: String,
    pub status: String,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub opened: bool,
    pub opened_at: Option<DateTime<Utc>>,
}

impl From<EmailLogView> for HistoryEntry {
    fn from(log: EmailLogView) -> Self {
        Self {
            id: log.id,
            campaign_id: log.campaign_id,
            to_email: log.to_email,
            subject: log.subject,
            status: log.status,
            error: log.error,
            sent_at: log.created_at,
            opened: log.opened_at.is_some(),
            opened_at: log.opened_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub history: Vec<HistoryEntry>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

/// Newest-first email log with open flags
///
/// GET /api/history?page=&per_page=
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let page = PageRequest::new(query.page, query.per_page);

    let logs = state
        .repos
        .email_logs
        .list_by_user(auth.user.id, page.limit(), page.offset())
        .await
        .map_err(api_error)?;
    let stats = state
        .repos
        .email_logs
        .stats_by_user(auth.user.id)
        .await
        .map_err(api_error)?;

    Ok(Json(HistoryResponse {
        success: true,
        history: logs.into_iter().map(HistoryEntry::from).collect(),
        page: page.page,
        per_page: page.per_page,
        total: stats.total,
    }))
}
