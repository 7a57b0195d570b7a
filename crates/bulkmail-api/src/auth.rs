//! Authentication module

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use bulkmail_common::{Config, Error};
use bulkmail_core::{
    CampaignDispatcher, CampaignRunner, Delivery, EmailSender, MailTransport, Pacer, QuotaTracker,
    UnsubscribeSigner,
};
use bulkmail_storage::models::User;
use bulkmail_storage::{DatabasePool, Repositories};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::handlers::{api_error, ApiError};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repos: Repositories,
    pub quota: QuotaTracker,
    pub sender: EmailSender,
    pub runner: CampaignRunner,
    /// Signs the links the renderer puts in outgoing mail
    pub unsubscribe: UnsubscribeSigner,
    /// Present when running against PostgreSQL
    pub db_pool: Option<DatabasePool>,
}

impl AppState {
    /// Wire the send path, dispatcher and runner over one set of repositories
    pub fn new(
        config: Config,
        repos: Repositories,
        transport: Arc<dyn MailTransport>,
        db_pool: Option<DatabasePool>,
    ) -> Self {
        let quota = QuotaTracker::new(repos.users.clone(), repos.quotas.clone(), &config);
        let delivery = Delivery::new(
            transport,
            config.dispatch.send_slots,
            config.tracking.clone(),
        );
        let pacer = Pacer::from_config(&config.dispatch);
        let unsubscribe = delivery.unsubscribe().clone();

        let dispatcher = CampaignDispatcher::new(
            repos.clone(),
            quota.clone(),
            delivery.clone(),
            pacer,
            config.mail.as_ref(),
        );
        let runner = CampaignRunner::new(
            dispatcher,
            repos.campaigns.clone(),
            config.dispatch.max_concurrent_campaigns,
        );
        let sender = EmailSender::new(
            repos.clone(),
            quota.clone(),
            delivery,
            pacer,
            config.mail.as_ref(),
        );

        Self {
            config,
            repos,
            quota,
            sender,
            runner,
            unsubscribe,
            db_pool,
        }
    }
}

/// Authenticated user, inserted into request extensions by the middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    /// Hash of the bearer token that authenticated this request
    pub token_hash: String,
}

/// Extract bearer token from request
pub fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Hash a session token for storage and lookup
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new random session token
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a password with Argon2
pub fn hash_password(password: &str) -> Result<String, Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored Argon2 hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .ok()
        .and_then(|parsed_hash| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed_hash)
                .ok()
        })
        .is_some()
}

fn unauthorized(message: &str) -> ApiError {
    api_error(Error::Auth(message.to_string()))
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(&request).ok_or_else(|| {
        warn!("Missing bearer token in request to {}", request.uri().path());
        unauthorized("Authentication required")
    })?;
    let token_hash = hash_token(token);

    let session = state
        .repos
        .sessions
        .get(&token_hash)
        .await
        .map_err(api_error)?
        .ok_or_else(|| unauthorized("Invalid session"))?;

    if session.is_expired() {
        warn!(user_id = %session.user_id, "Session expired");
        if let Err(e) = state.repos.sessions.delete(&token_hash).await {
            warn!(user_id = %session.user_id, error = %e, "Failed to delete expired session");
        }
        return Err(unauthorized("Session expired"));
    }

    let user = state
        .repos
        .users
        .get(session.user_id)
        .await
        .map_err(api_error)?
        .ok_or_else(|| unauthorized("Invalid session"))?;

    debug!(user_id = %user.id, "Request authenticated");
    request.extensions_mut().insert(AuthUser { user, token_hash });

    Ok(next.run(request).await)
}

/// Check that the authenticated user is an admin
pub fn require_admin(auth: &AuthUser) -> Result<(), ApiError> {
    if !auth.user.is_admin() {
        warn!(user_id = %auth.user.id, "Admin access denied");
        return Err(api_error(Error::PermissionDenied(
            "Admin access required".to_string(),
        )));
    }
    Ok(())
}
