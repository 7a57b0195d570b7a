//! Unsubscribe links

use axum::{
    extract::{Path, State},
    response::Html,
};
use std::sync::Arc;
use tracing::info;

use super::{api_error, validation, ApiResult};
use crate::auth::AppState;

const UNSUBSCRIBED_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Unsubscribed</title></head><body><p>You have been unsubscribed.</p></body></html>";

/// Record an opt-out from a signed link. Repeating it is harmless.
///
/// GET|POST /unsubscribe/:token
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<Html<&'static str>> {
    let link = state
        .unsubscribe
        .verify(&token)
        .ok_or_else(|| validation("Invalid unsubscribe link"))?;

    state
        .repos
        .unsubscribes
        .add(link.user_id, &link.email, link.campaign_id)
        .await
        .map_err(api_error)?;

    info!(user_id = %link.user_id, campaign_id = ?link.campaign_id, "Address unsubscribed");
    Ok(Html(UNSUBSCRIBED_PAGE))
}
