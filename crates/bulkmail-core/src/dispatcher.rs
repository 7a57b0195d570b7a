//! Campaign Dispatcher - Sends a campaign to its pending recipients
//!
//! Lifecycle: `queued -> sending -> {completed | paused}`. Recipients are
//! processed one at a time in creation order. The dispatcher pauses when the
//! daily quota runs out or its cancellation token fires; the remaining
//! recipients stay `pending` and are picked up when the campaign is resumed.
//! A process shutdown stops the loop too, but leaves the campaign `sending`
//! so the next boot recovers it. Unsubscribed addresses are marked failed
//! without being sent or charged.

use crate::delivery::Delivery;
use crate::error::CampaignError;
use crate::pacing::Pacer;
use crate::quota::{QuotaReservation, QuotaTracker};
use crate::template::TemplateRenderer;
use crate::transport::{OutgoingEmail, SmtpCredentials};
use crate::unsubscribe::UNSUBSCRIBED_MESSAGE;
use bulkmail_common::config::MailConfig;
use bulkmail_common::types::CampaignId;
use bulkmail_storage::models::{Campaign, CampaignStatus, DeliveryStatus, NewEmailLog, Recipient};
use bulkmail_storage::Repositories;
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What one dispatcher run did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub final_status: CampaignStatus,
}

impl DispatchSummary {
    fn new(final_status: CampaignStatus) -> Self {
        Self {
            attempted: 0,
            sent: 0,
            failed: 0,
            final_status,
        }
    }
}

/// Why the loop stopped early
enum Stop {
    Cancelled,
    QuotaExhausted,
    Shutdown,
}

/// Campaign dispatcher
#[derive(Clone)]
pub struct CampaignDispatcher {
    repos: Repositories,
    quota: QuotaTracker,
    delivery: Delivery,
    renderer: TemplateRenderer,
    pacer: Pacer,
    default_account: Option<SmtpCredentials>,
    shutdown: CancellationToken,
}

impl CampaignDispatcher {
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
            shutdown: CancellationToken::new(),
        }
    }

    /// Process-wide shutdown token. Worker tokens cancelled through it leave
    /// the campaign `sending` instead of `paused`.
    pub(crate) fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    fn stop_reason(&self) -> Stop {
        if self.shutdown.is_cancelled() {
            Stop::Shutdown
        } else {
            Stop::Cancelled
        }
    }

    /// Dispatch a `queued` campaign. Any other status is left alone.
    pub async fn run(
        &self,
        campaign_id: CampaignId,
        cancel: CancellationToken,
    ) -> std::result::Result<DispatchSummary, CampaignError> {
        self.dispatch(campaign_id, &[CampaignStatus::Queued], cancel)
            .await
    }

    /// Dispatch a campaign found `queued` or `sending` at boot
    pub async fn resume(
        &self,
        campaign_id: CampaignId,
        cancel: CancellationToken,
    ) -> std::result::Result<DispatchSummary, CampaignError> {
        self.dispatch(campaign_id, &CampaignStatus::ACTIVE, cancel)
            .await
    }

    async fn dispatch(
        &self,
        campaign_id: CampaignId,
        from: &[CampaignStatus],
        cancel: CancellationToken,
    ) -> std::result::Result<DispatchSummary, CampaignError> {
        let Some(campaign) = self
            .repos
            .campaigns
            .transition(campaign_id, from, CampaignStatus::Sending)
            .await?
        else {
            let current = self
                .repos
                .campaigns
                .get(campaign_id)
                .await?
                .ok_or(CampaignError::NotFound(campaign_id))?;
            debug!(campaign_id = %campaign_id, status = %current.status, "Campaign not dispatchable");
            return Ok(DispatchSummary::new(
                current.status_enum().unwrap_or(CampaignStatus::Draft),
            ));
        };

        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign {} sending", campaign.id);

        let credentials = match self.credentials_for(&campaign).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(campaign_id = %campaign.id, error = %e, "Campaign has no usable SMTP account");
                self.set_status(campaign.id, CampaignStatus::Paused).await?;
                return Err(e);
            }
        };

        let recipients = self.repos.recipients.list_pending(campaign.id).await?;
        let mut summary = DispatchSummary::new(CampaignStatus::Sending);
        let mut stop = None;

        for (idx, recipient) in recipients.iter().enumerate() {
            if cancel.is_cancelled() {
                stop = Some(self.stop_reason());
                break;
            }

            match self
                .repos
                .unsubscribes
                .is_unsubscribed(campaign.user_id, &recipient.email)
                .await
            {
                Ok(false) => {}
                Ok(true) => {
                    debug!(campaign_id = %campaign.id, recipient_id = %recipient.id, "Skipping unsubscribed recipient");
                    self.fail_recipient(&campaign, recipient, UNSUBSCRIBED_MESSAGE).await;
                    summary.failed += 1;
                    continue;
                }
                Err(e) => {
                    error!(campaign_id = %campaign.id, recipient_id = %recipient.id, error = %e, "Unsubscribe lookup failed");
                    self.fail_recipient(&campaign, recipient, &e.to_string()).await;
                    summary.failed += 1;
                    continue;
                }
            }

            let Some(reservation) = self.quota.reserve(campaign.user_id).await else {
                stop = Some(Stop::QuotaExhausted);
                break;
            };

            summary.attempted += 1;
            let status = self
                .send_one(&campaign, recipient, &credentials, reservation)
                .await;

            match status {
                DeliveryStatus::Sent => summary.sent += 1,
                DeliveryStatus::Failed => summary.failed += 1,
            }

            let more = idx + 1 < recipients.len();
            if more && !self.pacer.pause(&cancel).await {
                stop = Some(self.stop_reason());
                break;
            }
        }

        summary.final_status = match stop {
            Some(Stop::Shutdown) => {
                info!(campaign_id = %campaign.id, "Campaign {} interrupted by shutdown, left sending", campaign.id);
                CampaignStatus::Sending
            }
            Some(reason) => {
                match reason {
                    Stop::Cancelled => info!(campaign_id = %campaign.id, "Campaign {} paused by user", campaign.id),
                    Stop::QuotaExhausted => info!(campaign_id = %campaign.id, "Campaign {} paused: daily limit reached", campaign.id),
                    Stop::Shutdown => {}
                }
                self.set_status(campaign.id, CampaignStatus::Paused).await?
            }
            None => {
                info!(
                    campaign_id = %campaign.id,
                    sent = summary.sent,
                    failed = summary.failed,
                    "Campaign {} completed",
                    campaign.id
                );
                self.set_status(campaign.id, CampaignStatus::Completed).await?
            }
        };

        Ok(summary)
    }

    /// Move a `sending` campaign to `to`, returning the status it ends up in
    async fn set_status(
        &self,
        campaign_id: CampaignId,
        to: CampaignStatus,
    ) -> std::result::Result<CampaignStatus, CampaignError> {
        match self
            .repos
            .campaigns
            .transition(campaign_id, &[CampaignStatus::Sending], to)
            .await?
        {
            Some(_) => Ok(to),
            None => {
                let current = self
                    .repos
                    .campaigns
                    .get(campaign_id)
                    .await?
                    .ok_or(CampaignError::NotFound(campaign_id))?;
                warn!(
                    campaign_id = %campaign_id,
                    status = %current.status,
                    "Campaign left sending state during dispatch"
                );
                Ok(current.status_enum().unwrap_or(to))
            }
        }
    }

    async fn credentials_for(
        &self,
        campaign: &Campaign,
    ) -> std::result::Result<SmtpCredentials, CampaignError> {
        match campaign.smtp_account_id {
            Some(account_id) => self
                .repos
                .smtp_accounts
                .get(campaign.user_id, account_id)
                .await?
                .map(|account| SmtpCredentials::from(&account))
                .ok_or(CampaignError::NoSmtpAccount),
            None => self
                .default_account
                .clone()
                .ok_or(CampaignError::NoSmtpAccount),
        }
    }

    /// Render, send and record one recipient. Once the transport has been
    /// called the attempt is always charged and logged. The recipient is
    /// reported failed only when its own outcome could not be stored.
    async fn send_one(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        credentials: &SmtpCredentials,
        reservation: QuotaReservation,
    ) -> DeliveryStatus {
        let vars = self
            .renderer
            .vars_for(recipient, campaign.user_id, Some(campaign.id), credentials.sender_name());

        let email = OutgoingEmail {
            to: recipient.email.clone(),
            subject: self.renderer.render(&campaign.subject, &vars),
            text_body: self.renderer.render(&campaign.body, &vars),
            html_body: campaign
                .html_body
                .as_deref()
                .map(|html| self.renderer.render(html, &vars)),
        };

        let log_id = Uuid::now_v7();
        let outcome = self.delivery.deliver(credentials, email.clone(), log_id).await;
        let status = DeliveryStatus::from_ok(outcome.ok);

        if let Err(e) = self.quota.record(reservation, status).await {
            error!(campaign_id = %campaign.id, error = %e, "Failed to record quota outcome");
        }
        if let Err(e) = self
            .repos
            .email_logs
            .append(NewEmailLog {
                id: log_id,
                user_id: campaign.user_id,
                campaign_id: Some(campaign.id),
                recipient_id: Some(recipient.id),
                to_email: recipient.email.clone(),
                subject: email.subject,
                status,
                error: (!outcome.ok).then(|| outcome.detail.clone()),
            })
            .await
        {
            error!(campaign_id = %campaign.id, recipient_id = %recipient.id, error = %e, "Failed to append email log");
        }

        let marked = if outcome.ok {
            self.repos.recipients.mark_sent(recipient.id, Utc::now()).await
        } else {
            self.repos
                .recipients
                .mark_failed(recipient.id, &outcome.detail)
                .await
        };

        match marked {
            Ok(true) => {
                if let Err(e) = self.repos.campaigns.record_outcome(campaign.id, status).await {
                    error!(campaign_id = %campaign.id, error = %e, "Failed to update campaign counters");
                }
                debug!(
                    campaign_id = %campaign.id,
                    recipient_id = %recipient.id,
                    status = %status,
                    "Processed recipient"
                );
                status
            }
            Ok(false) => {
                warn!(recipient_id = %recipient.id, "Recipient already settled");
                status
            }
            Err(e) => {
                error!(
                    campaign_id = %campaign.id,
                    recipient_id = %recipient.id,
                    error = %e,
                    "Unexpected error while storing recipient outcome"
                );
                self.fail_recipient(campaign, recipient, &e.to_string()).await;
                DeliveryStatus::Failed
            }
        }
    }

    /// Best-effort failure marking after an unexpected error
    async fn fail_recipient(&self, campaign: &Campaign, recipient: &Recipient, error: &str) {
        match self.repos.recipients.mark_failed(recipient.id, error).await {
            Ok(true) => {
                if let Err(e) = self
                    .repos
                    .campaigns
                    .record_outcome(campaign.id, DeliveryStatus::Failed)
                    .await
                {
                    error!(campaign_id = %campaign.id, error = %e, "Failed to update campaign counters");
                }
            }
            Ok(false) => {}
            Err(e) => {
                error!(recipient_id = %recipient.id, error = %e, "Failed to mark recipient failed");
            }
        }
    }
}
