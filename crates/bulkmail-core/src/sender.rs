//! Email Sender - Direct single and CSV bulk sends
//!
//! Both paths share the campaign send path: the unsubscribe check, quota
//! reservation, template rendering, send slot, pacing, quota accounting and
//! the email log.

use crate::csv_import::{parse_recipient_csv, ImportedRow};
use crate::delivery::Delivery;
use crate::error::SendError;
use crate::pacing::Pacer;
use crate::quota::{QuotaReservation, QuotaTracker};
use crate::template::{TemplateRenderer, TemplateVars};
use crate::transport::{OutgoingEmail, SmtpCredentials};
use crate::unsubscribe::UNSUBSCRIBED_MESSAGE;
use bulkmail_common::config::MailConfig;
use bulkmail_common::types::{EmailAddress, EmailLogId, SmtpAccountId, TemplateId, UserId};
use bulkmail_storage::models::{DeliveryStatus, NewEmailLog};
use bulkmail_storage::Repositories;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Message reported for rows skipped once the quota is used up
pub const DAILY_LIMIT_MESSAGE: &str = "Daily limit reached";

/// Single send request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    pub to_email: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
    pub smtp_account_id: Option<SmtpAccountId>,
    pub template_id: Option<TemplateId>,
    pub name: Option<String>,
    pub company: Option<String>,
    pub city: Option<String>,
}

/// Single send result
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SendReceipt {
    pub success: bool,
    pub message: String,
    pub email_id: EmailLogId,
}

/// Defaults applied to CSV rows that have no subject or body of their own
#[derive(Debug, Clone, Default)]
pub struct BulkDefaults {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub html_body: Option<String>,
}

/// Per-row bulk status
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Success,
    Failed,
}

impl From<DeliveryStatus> for RowStatus {
    fn from(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Sent => RowStatus::Success,
            DeliveryStatus::Failed => RowStatus::Failed,
        }
    }
}

/// Per-row bulk outcome
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BulkRowResult {
    pub email: String,
    pub status: RowStatus,
    pub message: String,
    pub email_id: Option<EmailLogId>,
}

/// Bulk send report
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BulkReport {
    pub success: bool,
    pub message: String,
    pub sent: usize,
    pub failed: usize,
    pub dropped_invalid: usize,
    pub dropped_duplicate: usize,
    pub results: Vec<BulkRowResult>,
}

/// One message handed to the transport
struct Attempt {
    log_id: EmailLogId,
    status: DeliveryStatus,
    message: String,
    /// First storage error hit while recording the attempt
    storage_error: Option<bulkmail_common::Error>,
}

/// Direct sender
#[derive(Clone)]
pub struct EmailSender {
    repos: Repositories,
    quota: QuotaTracker,
    delivery: Delivery,
    renderer: TemplateRenderer,
    pacer: Pacer,
    default_account: Option<SmtpCredentials>,
}

impl EmailSender {
    pub fn new(
        repos: Repositories,
        quota: QuotaTracker,
        delivery: Delivery,
        pacer: Pacer,
        default_account: Option<&MailConfig>,
    ) -> Self {
        let renderer = TemplateRenderer::new(delivery.unsubscribe().clone());
        Self {
            repos,
            quota,
            delivery,
            renderer,
            pacer,
            default_account: default_account.map(SmtpCredentials::from),
        }
    }

    /// Resolve the account a request names, or the configured system account
    pub async fn credentials(
        &self,
        user_id: UserId,
        account_id: Option<SmtpAccountId>,
    ) -> Result<SmtpCredentials, SendError> {
        match account_id {
            Some(id) => self
                .repos
                .smtp_accounts
                .get(user_id, id)
                .await?
                .map(|account| SmtpCredentials::from(&account))
                .ok_or(SendError::NotFound("SMTP account")),
            None => self
                .default_account
                .clone()
                .ok_or_else(|| SendError::Validation("Missing smtp_account_id".to_string())),
        }
    }

    /// Validate, check the quota, send and record one message
    pub async fn send_single(
        &self,
        user_id: UserId,
        request: SendRequest,
    ) -> Result<SendReceipt, SendError> {
        let to_email = request
            .to_email
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SendError::Validation("Missing to_email".to_string()))?;
        let address = EmailAddress::parse(to_email)
            .ok_or_else(|| SendError::Validation("Invalid email address".to_string()))?;

        let (mut subject, mut body, mut html_body) =
            (request.subject, request.body, request.html_body);
        if let Some(template_id) = request.template_id {
            let template = self
                .repos
                .templates
                .get(user_id, template_id)
                .await?
                .ok_or(SendError::NotFound("Template"))?;
            subject = subject.or(Some(template.subject));
            body = body.or(Some(template.body));
            html_body = html_body.or(template.html_body);
        }

        let subject = subject.ok_or_else(|| SendError::Validation("Missing subject".to_string()))?;
        let body = body.ok_or_else(|| SendError::Validation("Missing body".to_string()))?;
        let credentials = self.credentials(user_id, request.smtp_account_id).await?;

        if self
            .repos
            .unsubscribes
            .is_unsubscribed(user_id, &address.to_string())
            .await?
        {
            return Err(SendError::Validation("Recipient has unsubscribed".to_string()));
        }

        let Some(reservation) = self.quota.reserve(user_id).await else {
            let usage = self.quota.usage(user_id).await?;
            return Err(SendError::QuotaExceeded {
                used: usage.emails_today,
                limit: usage.daily_limit,
            });
        };

        let vars = self.renderer.vars_for(
            TemplateVars::for_recipient(
                &address.to_string(),
                request.name.as_deref(),
                request.company.as_deref(),
                request.city.as_deref(),
            ),
            user_id,
            None,
            credentials.sender_name(),
        );
        let email = self.render(&address.to_string(), &subject, &body, html_body.as_deref(), &vars);

        let attempt = self
            .deliver_and_record(user_id, &credentials, email, reservation)
            .await;
        if let Some(e) = attempt.storage_error {
            return Err(e.into());
        }
        info!(user_id = %user_id, email_id = %attempt.log_id, status = %attempt.status, "Single send processed");

        Ok(SendReceipt {
            success: attempt.status == DeliveryStatus::Sent,
            message: attempt.message,
            email_id: attempt.log_id,
        })
    }

    /// Send every row of an uploaded CSV until the quota runs out
    pub async fn send_bulk(
        &self,
        user_id: UserId,
        account_id: Option<SmtpAccountId>,
        csv: &[u8],
        defaults: BulkDefaults,
    ) -> Result<BulkReport, SendError> {
        let credentials = self.credentials(user_id, account_id).await?;
        let import = parse_recipient_csv(csv).map_err(|e| match e {
            bulkmail_common::Error::Validation(msg) => SendError::Validation(msg),
            other => SendError::Storage(other),
        })?;

        let mut results = Vec::with_capacity(import.rows.len());
        let never = CancellationToken::new();
        let total = import.rows.len();
        let mut attempted = 0usize;

        for (idx, row) in import.rows.into_iter().enumerate() {
            let email = row.recipient.email.clone();

            let Some(outgoing) = self.render_row(user_id, &row, &defaults, &credentials) else {
                results.push(BulkRowResult {
                    email,
                    status: RowStatus::Failed,
                    message: "Missing required fields".to_string(),
                    email_id: None,
                });
                continue;
            };

            let skip = match self.repos.unsubscribes.is_unsubscribed(user_id, &email).await {
                Ok(false) => None,
                Ok(true) => Some(UNSUBSCRIBED_MESSAGE.to_string()),
                Err(e) => {
                    error!(user_id = %user_id, to = %email, error = %e, "Unsubscribe lookup failed");
                    Some(e.to_string())
                }
            };
            if let Some(message) = skip {
                results.push(BulkRowResult {
                    email,
                    status: RowStatus::Failed,
                    message,
                    email_id: None,
                });
                continue;
            }

            let Some(reservation) = self.quota.reserve(user_id).await else {
                results.push(BulkRowResult {
                    email,
                    status: RowStatus::Failed,
                    message: DAILY_LIMIT_MESSAGE.to_string(),
                    email_id: None,
                });
                continue;
            };

            attempted += 1;
            let attempt = self
                .deliver_and_record(user_id, &credentials, outgoing, reservation)
                .await;
            results.push(match attempt.storage_error {
                None => BulkRowResult {
                    email,
                    status: attempt.status.into(),
                    message: attempt.message,
                    email_id: Some(attempt.log_id),
                },
                Some(e) => BulkRowResult {
                    email,
                    status: RowStatus::Failed,
                    message: e.to_string(),
                    email_id: None,
                },
            });

            if idx + 1 < total {
                self.pacer.pause(&never).await;
            }
        }

        let sent = results
            .iter()
            .filter(|r| r.status == RowStatus::Success)
            .count();
        info!(user_id = %user_id, attempted, sent, "Bulk send finished");

        Ok(BulkReport {
            success: true,
            message: format!("Sent {} emails", attempted),
            sent,
            failed: results.len() - sent,
            dropped_invalid: import.dropped_invalid,
            dropped_duplicate: import.dropped_duplicate,
            results,
        })
    }

    /// Test an account's connection
    pub async fn test_account(
        &self,
        user_id: UserId,
        account_id: SmtpAccountId,
    ) -> Result<crate::transport::SendOutcome, SendError> {
        let credentials = self.credentials(user_id, Some(account_id)).await?;
        Ok(self.delivery.verify(&credentials).await)
    }

    fn render_row(
        &self,
        user_id: UserId,
        row: &ImportedRow,
        defaults: &BulkDefaults,
        credentials: &SmtpCredentials,
    ) -> Option<OutgoingEmail> {
        let subject = row.subject.as_deref().or(defaults.subject.as_deref())?;
        let body = row.body.as_deref().or(defaults.body.as_deref()).unwrap_or("");
        let html_body = row.html_body.as_deref().or(defaults.html_body.as_deref());

        let vars = self
            .renderer
            .vars_for(&row.recipient, user_id, None, credentials.sender_name());
        Some(self.render(&row.recipient.email, subject, body, html_body, &vars))
    }

    fn render(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        html_body: Option<&str>,
        vars: &TemplateVars,
    ) -> OutgoingEmail {
        OutgoingEmail {
            to: to.to_string(),
            subject: self.renderer.render(subject, vars),
            text_body: self.renderer.render(body, vars),
            html_body: html_body.map(|html| self.renderer.render(html, vars)),
        }
    }

    /// Send, then settle the quota reservation and append the log. Both
    /// records are attempted even when one of them fails.
    async fn deliver_and_record(
        &self,
        user_id: UserId,
        credentials: &SmtpCredentials,
        email: OutgoingEmail,
        reservation: QuotaReservation,
    ) -> Attempt {
        let log_id = Uuid::now_v7();
        let to_email = email.to.clone();
        let subject = email.subject.clone();

        let outcome = self.delivery.deliver(credentials, email, log_id).await;
        let status = DeliveryStatus::from_ok(outcome.ok);
        if !outcome.ok {
            warn!(user_id = %user_id, to = %to_email, error = %outcome.detail, "Send failed");
        }

        let mut storage_error = None;
        if let Err(e) = self.quota.record(reservation, status).await {
            error!(user_id = %user_id, error = %e, "Failed to record quota outcome");
            storage_error = Some(e);
        }
        if let Err(e) = self
            .repos
            .email_logs
            .append(NewEmailLog {
                id: log_id,
                user_id,
                campaign_id: None,
                recipient_id: None,
                to_email,
                subject,
                status,
                error: (!outcome.ok).then(|| outcome.detail.clone()),
            })
            .await
        {
            error!(user_id = %user_id, email_id = %log_id, error = %e, "Failed to append email log");
            if storage_error.is_none() {
                storage_error = Some(e);
            }
        }

        Attempt {
            log_id,
            status,
            message: outcome.detail,
            storage_error,
        }
    }
}
