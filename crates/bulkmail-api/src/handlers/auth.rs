//! Registration, login and logout handlers

use axum::{extract::State, http::StatusCode, Extension, Json};
use bulkmail_common::types::{EmailAddress, UserRole};
use bulkmail_common::Error;
use bulkmail_storage::models::{CreateUser, User};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{api_error, validation, ApiResult};
use crate::auth::{generate_token, hash_password, hash_token, verify_password, AppState, AuthUser};

const MIN_PASSWORD_LEN: usize = 8;

/// Credentials for register and login
#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Public view of a user
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: uuid::Uuid,
    pub email: String,
    pub role: String,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            role: u.role,
            plan: u.plan,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
    pub message: String,
}

fn credentials(input: CredentialsRequest) -> ApiResult<(String, String)> {
    let email = input
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| validation("Missing email"))?;
    let password = input
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| validation("Missing password"))?;
    Ok((email, password))
}

/// Create an account
///
/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let (email, password) = credentials(input)?;

    if !EmailAddress::is_valid(&email) {
        return Err(validation("Invalid email address"));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let role = if state
        .config
        .auth
        .admin_emails
        .iter()
        .any(|admin| admin.eq_ignore_ascii_case(&email))
    {
        UserRole::Admin
    } else {
        UserRole::User
    };

    let user = state
        .repos
        .users
        .create(CreateUser {
            email,
            password_hash: hash_password(&password).map_err(api_error)?,
            role,
        })
        .await
        .map_err(api_error)?;

    info!(user_id = %user.id, role = %user.role, "Registered user {}", user.email);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            success: true,
            user: user.into(),
        }),
    ))
}

/// Exchange credentials for a bearer token
///
/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(input): Json<CredentialsRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let (email, password) = credentials(input)?;
    let invalid = || api_error(Error::Auth("Invalid email or password".to_string()));

    let user = state
        .repos
        .users
        .get_by_email(&email)
        .await
        .map_err(api_error)?
        .ok_or_else(invalid)?;

    if !verify_password(&password, &user.password_hash) {
        warn!(user_id = %user.id, "Failed login attempt");
        return Err(invalid());
    }

    let token = generate_token();
    let expires_at = Utc::now() + Duration::hours(state.config.auth.session_ttl_hours);
    state
        .repos
        .sessions
        .create(user.id, hash_token(&token), expires_at)
        .await
        .map_err(api_error)?;

    info!(user_id = %user.id, "User logged in");

    Ok(Json(LoginResponse {
        success: true,
        token,
        expires_at,
        user: user.into(),
    }))
}

/// Drop the current session
///
/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<LogoutResponse>> {
    state
        .repos
        .sessions
        .delete(&auth.token_hash)
        .await
        .map_err(api_error)?;

    info!(user_id = %auth.user.id, "User logged out");

    Ok(Json(LogoutResponse {
        success: true,
        message: "Logged out".to_string(),
    }))
}
