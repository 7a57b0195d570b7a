//! Direct send handlers

use axum::{
    extract::{Multipart, State},
    Extension, Json,
};
use bulkmail_core::{BulkDefaults, BulkReport, SendReceipt, SendRequest};
use std::sync::Arc;
use tracing::info;

use super::{api_error, validation, ApiResult, MultipartForm};
use crate::auth::{AppState, AuthUser};

/// Send one email
///
/// POST /api/send
pub async fn send_email(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    Json(input): Json<SendRequest>,
) -> ApiResult<Json<SendReceipt>> {
    let receipt = state
        .sender
        .send_single(auth.user.id, input)
        .await
        .map_err(api_error)?;

    Ok(Json(receipt))
}

/// Send to every row of an uploaded CSV
///
/// POST /api/send/bulk
pub async fn send_bulk(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthUser>,
    multipart: Multipart,
) -> ApiResult<Json<BulkReport>> {
    let form = MultipartForm::read(multipart, "csv_file").await?;
    let csv = form
        .file
        .as_deref()
        .ok_or_else(|| validation("Missing csv_file"))?;
    let account_id = form.uuid("smtp_account_id")?;

    let defaults = BulkDefaults {
        subject: form.text("subject"),
        body: form.text("body"),
        html_body: form.text("html_body"),
    };

    let report = state
        .sender
        .send_bulk(auth.user.id, account_id, csv, defaults)
        .await
        .map_err(api_error)?;

    info!(
        user_id = %auth.user.id,
        sent = report.sent,
        failed = report.failed,
        dropped_invalid = report.dropped_invalid,
        dropped_duplicate = report.dropped_duplicate,
        "Bulk send request finished"
    );

    Ok(Json(report))
}
