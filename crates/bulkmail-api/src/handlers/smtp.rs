//! SMTP account handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bulkmail_common::types::EmailAddress;
use bulkmail_storage::models::{CreateSmtpAccount, SmtpAccount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{api_error, validation, ApiResult};
use crate::auth::{AppState, AuthUser};

/// SMTP account without its password
#[derive(Debug, Serialize)]
pub struct SmtpAccountResponse {
    pub id: Uuid,
    pub email: String,
    pub smtp_server: String,
    pub smtp_port: i32,
    pub from_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<SmtpAccount> for SmtpAccountResponse {
    fn from(a: SmtpAccount) -> Self {
        Self {
            id: a.id,
            email: a.email,
            smtp_server: a.smtp_server,
            smtp_port: a.smtp_port,
            from_name: a.from_name,
            is_active: a.is_active,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SmtpListResponse {
    pub success: bool,
    pub accounts: Vec<SmtpAccountResponse>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSmtpRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub smtp_server: Option<String>,
    pub smtp_port: Option<i32>,
    pub from_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateSmtpResponse {
    pub success: bool,
    pub message: String,
    pub account: SmtpAccountResponse,
}

#[derive(Debug, Serialize)]
pub struct SmtpTestResponse {
    pub success: bool,
    pub message: String,
}

fn required(value: Option<String>, name: &str) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| validation(format!("Missing {}", name)))
}

/// List the current user's accounts
///
/// GET /api/smtp
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<SmtpListResponse>> {
    let accounts = state
        .repos
        .smtp_accounts
        .list(auth.user.id)
        .await
        .map_err(api_error)?;

    Ok(Json(SmtpListResponse {
        success: true,
        accounts: accounts.into_iter().map(SmtpAccountResponse::from).collect(),
    }))
}

/// Register an account
///
/// POST /api/smtp
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<CreateSmtpRequest>,
) -> ApiResult<(StatusCode, Json<CreateSmtpResponse>)> {
    let email = required(input.email, "email")?;
    let smtp_server = required(input.smtp_server, "smtp_server")?;
    let password = input
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| validation("Missing password"))?;
    let smtp_port = input.smtp_port.ok_or_else(|| validation("Missing smtp_port"))?;

    if !EmailAddress::is_valid(&email) {
        return Err(validation("Invalid email address"));
    }
    if !(1..=65535).contains(&smtp_port) {
        return Err(validation("Invalid smtp_port"));
    }

    let account = state
        .repos
        .smtp_accounts
        .create(CreateSmtpAccount {
            user_id: auth.user.id,
            email,
            password,
            smtp_server,
            smtp_port,
            from_name: input.from_name.filter(|n| !n.trim().is_empty()),
        })
        .await
        .map_err(api_error)?;

    info!(user_id = %auth.user.id, account_id = %account.id, "SMTP account added");

    Ok((
        StatusCode::CREATED,
        Json(CreateSmtpResponse {
            success: true,
            message: "SMTP account added".to_string(),
            account: account.into(),
        }),
    ))
}

/// Open a connection with the account's credentials
///
/// POST /api/smtp/test/:id
pub async fn test_account(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Path(account_id): Path<Uuid>,
) -> ApiResult<Json<SmtpTestResponse>> {
    let outcome = state
        .sender
        .test_account(auth.user.id, account_id)
        .await
        .map_err(api_error)?;

    Ok(Json(SmtpTestResponse {
        success: outcome.ok,
        message: outcome.detail,
    }))
}
