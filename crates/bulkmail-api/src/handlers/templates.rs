//! Template handlers

use axum::{extract::State, http::StatusCode, Extension, Json};
use bulkmail_storage::models::{CreateTemplate, Template};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::{api_error, validation, ApiResult};
use crate::auth::{AppState, AuthUser};

#[derive(Debug, Serialize)]
pub struct TemplateListResponse {
    pub success: bool,
    pub templates: Vec<Template>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTemplateResponse {
    pub success: bool,
    pub message: String,
    pub template: Template,
}

/// GET /api/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<TemplateListResponse>> {
    let templates = state
        .repos
        .templates
        .list(auth.user.id)
        .await
        .map_err(api_error)?;

    Ok(Json(TemplateListResponse {
        success: true,
        templates,
    }))
}

/// POST /api/templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<CreateTemplateResponse>)> {
    let (Some(name), Some(subject), Some(body)) = (
        input.name.filter(|v| !v.trim().is_empty()),
        input.subject.filter(|v| !v.is_empty()),
        input.body,
    ) else {
        return Err(validation("Missing required fields"));
    };

    let template = state
        .repos
        .templates
        .create(CreateTemplate {
            user_id: auth.user.id,
            name: name.trim().to_string(),
            subject,
            body,
            html_body: input.html_body.filter(|v| !v.is_empty()),
        })
        .await
        .map_err(api_error)?;

    info!(user_id = %auth.user.id, template_id = %template.id, "Template added");

    Ok((
        StatusCode::CREATED,
        Json(CreateTemplateResponse {
            success: true,
            message: "Template added".to_string(),
            template,
        }),
    ))
}
