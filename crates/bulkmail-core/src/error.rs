//! Domain errors for campaign control and direct sends

use bulkmail_common::types::CampaignId;
use thiserror::Error;

/// Campaign lifecycle errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign {0} not found")]
    NotFound(CampaignId),

    #[error("Campaign is already running")]
    AlreadyRunning,

    #[error("Campaign cannot be {action} while {status}")]
    InvalidState { action: &'static str, status: String },

    #[error("No SMTP account available for this campaign")]
    NoSmtpAccount,

    #[error(transparent)]
    Storage(#[from] bulkmail_common::Error),
}

impl From<CampaignError> for bulkmail_common::Error {
    fn from(err: CampaignError) -> Self {
        match err {
            CampaignError::NotFound(_) => Self::NotFound(err.to_string()),
            CampaignError::AlreadyRunning | CampaignError::InvalidState { .. } => {
                Self::Conflict(err.to_string())
            }
            CampaignError::NoSmtpAccount => Self::Validation(err.to_string()),
            CampaignError::Storage(inner) => inner,
        }
    }
}

/// Direct send errors; all are raised before anything is sent
#[derive(Error, Debug)]
pub enum SendError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Daily limit reached ({used}/{limit})")]
    QuotaExceeded { used: i32, limit: i32 },

    #[error(transparent)]
    Storage(#[from] bulkmail_common::Error),
}

impl From<SendError> for bulkmail_common::Error {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Validation(msg) => Self::Validation(msg),
            SendError::NotFound(_) => Self::NotFound(err.to_string()),
            SendError::QuotaExceeded { used, limit } => Self::QuotaExceeded { used, limit },
            SendError::Storage(inner) => inner,
        }
    }
}
