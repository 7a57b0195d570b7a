//! Campaign handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use bulkmail_common::types::PageRequest;
use bulkmail_common::Error;
use bulkmail_core::{parse_recipient_csv, CampaignError};
use bulkmail_storage::models::{Campaign, CreateCampaign, Recipient, RecipientStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, validation, ApiResult, MultipartForm};
use crate::auth::{AppState, AuthUser};

/// Query parameters for paginated lists
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageQuery {
    fn page(&self) -> PageRequest {
        PageRequest::new(self.page, self.per_page)
    }
}

/// Campaign response
#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub smtp_account_id: Option<Uuid>,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub progress_percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            subject: c.subject,
            smtp_account_id: c.smtp_account_id,
            status: c.status,
            total_recipients: c.total_recipients,
            sent_count: c.sent_count,
            failed_count: c.failed_count,
            progress_percentage: progress,
            started_at: c.started_at,
            completed_at: c.completed_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CampaignListResponse {
    pub success: bool,
    pub campaigns: Vec<CampaignResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct CreateCampaignResponse {
    pub success: bool,
    pub campaign: CampaignResponse,
    pub dropped_invalid: usize,
    pub dropped_duplicate: usize,
}

#[derive(Debug, Serialize)]
pub struct CampaignDetailResponse {
    pub success: bool,
    pub campaign: CampaignResponse,
    pub pending_recipients: i64,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct CampaignActionResponse {
    pub success: bool,
    pub message: String,
    pub campaign: CampaignResponse,
}

#[derive(Debug, Serialize)]
pub struct RecipientResponse {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub city: Option<String>,
    pub status: String,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl From<Recipient> for RecipientResponse {
    fn from(r: Recipient) -> Self {
        Self {
            id: r.id,
            email: r.email,
            name: r.name,
            company: r.company,
            city: r.city,
            status: r.status,
            last_error: r.last_error,
            sent_at: r.sent_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecipientListResponse {
    pub success: bool,
    pub recipients: Vec<RecipientResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

async fn owned_campaign(state: &AppState, auth: &AuthUser, campaign_id: Uuid) -> ApiResult<Campaign> {
    state
        .repos
        .campaigns
        .get_for_user(auth.user.id, campaign_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| api_error(CampaignError::NotFound(campaign_id)))
}

/// List campaigns, newest first
///
/// GET /api/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<CampaignListResponse>> {
    let page = query.page();

    let campaigns = state
        .repos
        .campaigns
        .list_by_user(auth.user.id, page.limit(), page.offset())
        .await
        .map_err(api_error)?;
    let total = state
        .repos
        .campaigns
        .count_by_user(auth.user.id)
        .await
        .map_err(api_error)?;

    Ok(Json(CampaignListResponse {
        success: true,
        campaigns: campaigns.into_iter().map(CampaignResponse::from).collect(),
        page: page.page,
        per_page: page.per_page,
        total,
    }))
}

/// Compose a draft campaign from a form and a recipient CSV
///
/// POST /api/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<CreateCampaignResponse>)> {
    let form = MultipartForm::read(multipart, "csv_file").await?;

    let name = form.require("name")?;
    let subject = form.require("subject")?;
    let body = form.require("body")?;
    let html_body = form.text("html_body");
    let smtp_account_id = form.uuid("smtp_account_id")?;

    match smtp_account_id {
        Some(account_id) => {
            state
                .repos
                .smtp_accounts
                .get(auth.user.id, account_id)
                .await
                .map_err(api_error)?
                .ok_or_else(|| api_error(Error::NotFound("SMTP account not found".to_string())))?;
        }
        None if state.config.mail.is_none() => {
            return Err(validation("Missing smtp_account_id"));
        }
        None => {}
    }

    let csv = form
        .file
        .as_deref()
        .ok_or_else(|| validation("Missing csv_file"))?;
    let import = parse_recipient_csv(csv).map_err(api_error)?;

    let campaign = state
        .repos
        .campaigns
        .create(
            CreateCampaign {
                user_id: auth.user.id,
                smtp_account_id,
                name,
                subject,
                body,
                html_body,
            },
            import.recipients(),
        )
        .await
        .map_err(api_error)?;

    info!(
        user_id = %auth.user.id,
        campaign_id = %campaign.id,
        recipients = campaign.total_recipients,
        "Created campaign {}",
        campaign.id
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateCampaignResponse {
            success: true,
            campaign: campaign.into(),
            dropped_invalid: import.dropped_invalid,
            dropped_duplicate: import.dropped_duplicate,
        }),
    ))
}

/// GET /api/campaigns/:id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<Json<CampaignDetailResponse>> {
    let campaign = owned_campaign(&state, &auth, campaign_id).await?;
    let pending_recipients = state
        .repos
        .recipients
        .count(campaign_id, Some(RecipientStatus::Pending))
        .await
        .map_err(api_error)?;
    let running = state.runner.is_running(campaign_id).await;

    Ok(Json(CampaignDetailResponse {
        success: true,
        campaign: campaign.into(),
        pending_recipients,
        running,
    }))
}

/// Delete a campaign that is not queued or sending
///
/// DELETE /api/campaigns/:id
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let campaign = owned_campaign(&state, &auth, campaign_id).await?;

    let deleted = state
        .repos
        .campaigns
        .delete(auth.user.id, campaign_id)
        .await
        .map_err(api_error)?;

    if !deleted {
        let status = state
            .repos
            .campaigns
            .get(campaign_id)
            .await
            .map_err(api_error)?
            .map(|c| c.status)
            .unwrap_or(campaign.status);
        return Err(api_error(CampaignError::InvalidState {
            action: "deleted",
            status,
        }));
    }

    info!(user_id = %auth.user.id, campaign_id = %campaign_id, "Deleted campaign {}", campaign_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/campaigns/:id/recipients
pub async fn list_recipients(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<RecipientListResponse>> {
    owned_campaign(&state, &auth, campaign_id).await?;
    let page = query.page();

    let recipients = state
        .repos
        .recipients
        .list_by_campaign(campaign_id, page.limit(), page.offset())
        .await
        .map_err(api_error)?;
    let total = state
        .repos
        .recipients
        .count(campaign_id, None)
        .await
        .map_err(api_error)?;

    Ok(Json(RecipientListResponse {
        success: true,
        recipients: recipients.into_iter().map(RecipientResponse::from).collect(),
        page: page.page,
        per_page: page.per_page,
        total,
    }))
}

/// Queue a draft or paused campaign for dispatch
///
/// POST /api/campaigns/:id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CampaignActionResponse>)> {
    let campaign = state
        .runner
        .start(auth.user.id, campaign_id)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CampaignActionResponse {
            success: true,
            message: "Campaign queued".to_string(),
            campaign: campaign.into(),
        }),
    ))
}

/// Stop a running campaign at its next checkpoint
///
/// POST /api/campaigns/:id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(campaign_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<CampaignActionResponse>)> {
    let campaign = state
        .runner
        .pause(auth.user.id, campaign_id)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CampaignActionResponse {
            success: true,
            message: "Campaign pause requested".to_string(),
            campaign: campaign.into(),
        }),
    ))
}
