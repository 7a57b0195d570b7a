//! Database models

use bulkmail_common::types::{
    CampaignId, EmailLogId, Plan, PremiumRequestId, RecipientId, SmtpAccountId, TemplateId,
    UserId, UserRole,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub plan: String,
    pub total_emails: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Get plan enum, falling back to free for unknown values
    pub fn plan_enum(&self) -> Plan {
        self.plan.parse().unwrap_or(Plan::Free)
    }

    /// Get role enum
    pub fn role_enum(&self) -> Option<UserRole> {
        self.role.parse().ok()
    }

    pub fn is_admin(&self) -> bool {
        self.role_enum() == Some(UserRole::Admin)
    }
}

/// Create user input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
}

/// Login session
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Session {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Outbound SMTP credentials registered by a user
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SmtpAccount {
    pub id: SmtpAccountId,
    pub user_id: UserId,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub smtp_server: String,
    pub smtp_port: i32,
    pub from_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Create SMTP account input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSmtpAccount {
    pub user_id: UserId,
    pub email: String,
    pub password: String,
    pub smtp_server: String,
    pub smtp_port: i32,
    pub from_name: Option<String>,
}

/// Reusable subject/body template
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Create template input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplate {
    pub user_id: UserId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Queued,
    Sending,
    Paused,
    Completed,
}

impl CampaignStatus {
    /// Statuses a user may start (or resume) from
    pub const STARTABLE: [CampaignStatus; 2] = [CampaignStatus::Draft, CampaignStatus::Paused];

    /// Statuses during which a worker owns the campaign
    pub const ACTIVE: [CampaignStatus; 2] = [CampaignStatus::Queued, CampaignStatus::Sending];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "queued" => Ok(CampaignStatus::Queued),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub user_id: UserId,
    pub smtp_account_id: Option<SmtpAccountId>,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
    pub status: String,
    pub total_recipients: i32,
    pub sent_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Recipients that have reached a terminal status
    pub fn processed(&self) -> i32 {
        self.sent_count + self.failed_count
    }

    /// Calculate progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.total_recipients == 0 {
            0.0
        } else {
            (self.processed() as f64 / self.total_recipients as f64) * 100.0
        }
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub user_id: UserId,
    pub smtp_account_id: Option<SmtpAccountId>,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub html_body: Option<String>,
}

/// Recipient status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientStatus::Pending => write!(f, "pending"),
            RecipientStatus::Sent => write!(f, "sent"),
            RecipientStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RecipientStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecipientStatus::Pending),
            "sent" => Ok(RecipientStatus::Sent),
            "failed" => Ok(RecipientStatus::Failed),
            _ => Err(format!("Invalid recipient status: {}", s)),
        }
    }
}

/// Recipient model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub campaign_id: CampaignId,
    pub position: i32,
    pub email: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub city: Option<String>,
    pub status: String,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Recipient {
    /// Get status enum
    pub fn status_enum(&self) -> Option<RecipientStatus> {
        self.status.parse().ok()
    }
}

/// Recipient input for batch creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipient {
    pub email: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub city: Option<String>,
}

/// Result of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Sent => write!(f, "sent"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl DeliveryStatus {
    pub fn from_ok(ok: bool) -> Self {
        if ok {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Failed
        }
    }
}

/// Per-user, per-day send counters
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailyQuota {
    pub user_id: UserId,
    pub day: NaiveDate,
    pub sent_count: i32,
    pub failed_count: i32,
    /// Attempts reserved but not yet settled as sent or failed
    pub reserved_count: i32,
    pub updated_at: DateTime<Utc>,
}

impl DailyQuota {
    /// Every attempt counts against the daily limit, including in-flight ones
    pub fn attempts(&self) -> i32 {
        self.sent_count + self.failed_count + self.reserved_count
    }
}

/// Maximum subject length kept in the email log
pub const SUBJECT_SNIPPET_LEN: usize = 200;

/// Append-only record of a send attempt
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailLog {
    pub id: EmailLogId,
    pub user_id: UserId,
    pub campaign_id: Option<CampaignId>,
    pub recipient_id: Option<RecipientId>,
    pub to_email: String,
    pub subject: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Email log input; the id is chosen before sending so it can be embedded in the tracking pixel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmailLog {
    pub id: EmailLogId,
    pub user_id: UserId,
    pub campaign_id: Option<CampaignId>,
    pub recipient_id: Option<RecipientId>,
    pub to_email: String,
    pub subject: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

impl NewEmailLog {
    /// Truncate the subject to the stored snippet length on a char boundary
    pub fn subject_snippet(subject: &str) -> String {
        subject.chars().take(SUBJECT_SNIPPET_LEN).collect()
    }
}

/// Email log joined with its first open event
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailLogView {
    pub id: EmailLogId,
    pub user_id: UserId,
    pub campaign_id: Option<CampaignId>,
    pub recipient_id: Option<RecipientId>,
    pub to_email: String,
    pub subject: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Aggregate email log counts for a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailStats {
    pub total: i64,
    pub sent: i64,
    pub failed: i64,
}

impl EmailStats {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.sent as f64 / self.total as f64 * 100.0
        }
    }
}

/// Premium request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for PremiumRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PremiumRequestStatus::Pending => write!(f, "pending"),
            PremiumRequestStatus::Approved => write!(f, "approved"),
            PremiumRequestStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// Request to move a user to the premium plan
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PremiumRequest {
    pub id: PremiumRequestId,
    pub user_id: UserId,
    pub status: String,
    pub decided_by: Option<UserId>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Address that opted out of a user's mail
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Unsubscribe {
    pub id: uuid::Uuid,
    pub user_id: UserId,
    pub email: String,
    pub campaign_id: Option<CampaignId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_campaign_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::Queued,
            CampaignStatus::Sending,
            CampaignStatus::Paused,
            CampaignStatus::Completed,
        ] {
            assert_eq!(status.to_string().parse::<CampaignStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<CampaignStatus>().is_err());
    }

    #[test]
    fn test_subject_snippet_respects_char_boundaries() {
        let subject = "é".repeat(300);
        let snippet = NewEmailLog::subject_snippet(&subject);
        assert_eq!(snippet.chars().count(), SUBJECT_SNIPPET_LEN);
    }

    #[test]
    fn test_success_rate() {
        let stats = EmailStats { total: 4, sent: 3, failed: 1 };
        assert_eq!(stats.success_rate(), 75.0);
        assert_eq!(EmailStats::default().success_rate(), 0.0);
    }
}
