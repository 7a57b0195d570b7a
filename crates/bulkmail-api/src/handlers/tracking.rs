//! Open tracking pixel

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use bulkmail_core::TRACKING_PIXEL;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::AppState;

/// Record an open and return a 1x1 GIF. Always 200, whatever the id.
///
/// GET /api/track/open/:id
pub async fn track_open(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match id.parse::<Uuid>() {
        Ok(log_id) => match state.repos.email_logs.record_open(log_id).await {
            Ok(true) => debug!(email_id = %log_id, "Recorded open"),
            Ok(false) => debug!(email_id = %log_id, "Open for unknown email"),
            Err(e) => warn!(email_id = %log_id, error = %e, "Failed to record open"),
        },
        Err(_) => debug!(id = %id, "Open with malformed id"),
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"),
        ],
        TRACKING_PIXEL.to_vec(),
    )
}
