//! API request handlers

pub mod admin;
pub mod auth;
pub mod campaigns;
pub mod health;
pub mod history;
pub mod send;
pub mod smtp;
pub mod stats;
pub mod templates;
pub mod tracking;
pub mod unsubscribe;
pub mod upgrade;

use axum::{extract::Multipart, http::StatusCode, Json};
use bulkmail_common::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let message = if err.status_code() >= 500 {
            "Internal server error".to_string()
        } else {
            err.detail()
        };
        Self {
            success: false,
            error: err.code().to_string(),
            message,
        }
    }
}

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Handler result
pub type ApiResult<T> = Result<T, ApiError>;

/// Map any domain error to its HTTP response; server errors are logged here
pub fn api_error(err: impl Into<Error>) -> ApiError {
    let err = err.into();
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }
    (status, Json(ErrorResponse::from(&err)))
}

/// Shorthand for a 400 response
pub fn validation(message: impl Into<String>) -> ApiError {
    api_error(Error::Validation(message.into()))
}

/// Text fields and one file read from a multipart form
#[derive(Debug, Default)]
pub struct MultipartForm {
    pub fields: HashMap<String, String>,
    pub file: Option<Vec<u8>>,
}

impl MultipartForm {
    /// Read the whole form; `file_field` is kept as bytes, everything else as text
    pub async fn read(mut multipart: Multipart, file_field: &str) -> ApiResult<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| validation(format!("Invalid form data: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == file_field {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| validation(format!("Failed to read {}: {}", file_field, e)))?;
                form.file = Some(bytes.to_vec());
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| validation(format!("Failed to read {}: {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Non-empty trimmed text field
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Required text field
    pub fn require(&self, name: &str) -> ApiResult<String> {
        self.text(name)
            .ok_or_else(|| validation(format!("Missing {}", name)))
    }

    /// Optional UUID field
    pub fn uuid(&self, name: &str) -> ApiResult<Option<uuid::Uuid>> {
        self.text(name)
            .map(|v| {
                v.parse()
                    .map_err(|_| validation(format!("Invalid {}", name)))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_server_errors_hide_details() {
        let (status, Json(body)) = api_error(Error::Database("connection reset".to_string()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "Internal server error");
        assert!(!body.success);
    }

    #[test]
    fn test_client_errors_keep_message() {
        let (status, Json(body)) = api_error(Error::QuotaExceeded { used: 10, limit: 10 });
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body.error, "QUOTA_EXCEEDED");
        assert_eq!(body.message, "Daily limit reached (10/10)");
    }

    #[test]
    fn test_form_field_helpers() {
        let mut form = MultipartForm::default();
        form.fields.insert("name".to_string(), "  Spring  ".to_string());
        form.fields.insert("blank".to_string(), "   ".to_string());
        form.fields.insert("smtp_account_id".to_string(), "nope".to_string());

        assert_eq!(form.text("name").as_deref(), Some("Spring"));
        assert_eq!(form.text("blank"), None);
        assert!(form.require("subject").is_err());
        assert!(form.uuid("smtp_account_id").is_err());
        assert_eq!(form.uuid("missing").unwrap(), None);
    }
}
