//! In-memory storage backend
//!
//! Implements every repository trait over a single locked state. Used by the
//! `memory` database backend and by tests. Each operation takes the lock once,
//! so compare-and-set transitions and counter increments are atomic.

use crate::models::*;
use crate::repository::{
    CampaignRepository, EmailLogRepository, PremiumRequestRepository, QuotaRepository,
    RecipientRepository, SessionRepository, SmtpAccountRepository, TemplateRepository,
    UnsubscribeRepository, UserRepository,
};
use async_trait::async_trait;
use bulkmail_common::types::{
    CampaignId, EmailLogId, Plan, PremiumRequestId, RecipientId, SmtpAccountId, TemplateId,
    UserId,
};
use bulkmail_common::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    sessions: HashMap<String, Session>,
    smtp_accounts: Vec<SmtpAccount>,
    templates: Vec<Template>,
    campaigns: HashMap<CampaignId, Campaign>,
    recipients: Vec<Recipient>,
    quotas: HashMap<(UserId, NaiveDate), DailyQuota>,
    email_logs: Vec<EmailLog>,
    email_opens: Vec<(EmailLogId, DateTime<Utc>)>,
    premium_requests: Vec<PremiumRequest>,
    unsubscribes: HashMap<(UserId, String), Unsubscribe>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate<T>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, input: CreateUser) -> Result<User> {
        let mut state = self.state.write().await;
        let email = input.email.to_lowercase();
        if state.users.values().any(|u| u.email == email) {
            return Err(Error::Conflict("Email is already registered".to_string()));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::now_v7(),
            email,
            password_hash: input.password_hash,
            role: input.role.to_string(),
            plan: Plan::Free.to_string(),
            total_emails: 0,
            created_at: now,
            updated_at: now,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_lowercase();
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn set_plan(&self, id: UserId, plan: Plan) -> Result<Option<User>> {
        let mut state = self.state.write().await;
        Ok(state.users.get_mut(&id).map(|user| {
            user.plan = plan.to_string();
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn increment_total_emails(&self, id: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get_mut(&id) {
            user.total_emails += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(
        &self,
        user_id: UserId,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        let session = Session {
            id: Uuid::now_v7(),
            user_id,
            token_hash: token_hash.clone(),
            expires_at,
            created_at: Utc::now(),
        };
        let mut state = self.state.write().await;
        state
            .sessions
            .retain(|_, s| s.user_id != user_id || !s.is_expired());
        state.sessions.insert(token_hash, session.clone());
        Ok(session)
    }

    async fn get(&self, token_hash: &str) -> Result<Option<Session>> {
        Ok(self.state.read().await.sessions.get(token_hash).cloned())
    }

    async fn delete(&self, token_hash: &str) -> Result<bool> {
        Ok(self.state.write().await.sessions.remove(token_hash).is_some())
    }
}

#[async_trait]
impl SmtpAccountRepository for MemoryStore {
    async fn create(&self, input: CreateSmtpAccount) -> Result<SmtpAccount> {
        let account = SmtpAccount {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            email: input.email,
            password: input.password,
            smtp_server: input.smtp_server,
            smtp_port: input.smtp_port,
            from_name: input.from_name,
            is_active: true,
            created_at: Utc::now(),
        };
        self.state.write().await.smtp_accounts.push(account.clone());
        Ok(account)
    }

    async fn get(&self, user_id: UserId, id: SmtpAccountId) -> Result<Option<SmtpAccount>> {
        let state = self.state.read().await;
        Ok(state
            .smtp_accounts
            .iter()
            .find(|a| a.id == id && a.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<SmtpAccount>> {
        let state = self.state.read().await;
        Ok(state
            .smtp_accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count(&self, user_id: UserId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.smtp_accounts.iter().filter(|a| a.user_id == user_id).count() as i64)
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn create(&self, input: CreateTemplate) -> Result<Template> {
        let template = Template {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            name: input.name,
            subject: input.subject,
            body: input.body,
            html_body: input.html_body,
            created_at: Utc::now(),
        };
        self.state.write().await.templates.push(template.clone());
        Ok(template)
    }

    async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Option<Template>> {
        let state = self.state.read().await;
        Ok(state
            .templates
            .iter()
            .find(|t| t.id == id && t.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Template>> {
        let state = self.state.read().await;
        Ok(state
            .templates
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn count(&self, user_id: UserId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.templates.iter().filter(|t| t.user_id == user_id).count() as i64)
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(
        &self,
        input: CreateCampaign,
        recipients: Vec<NewRecipient>,
    ) -> Result<Campaign> {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            smtp_account_id: input.smtp_account_id,
            name: input.name,
            subject: input.subject,
            body: input.body,
            html_body: input.html_body,
            status: CampaignStatus::Draft.to_string(),
            total_recipients: recipients.len() as i32,
            sent_count: 0,
            failed_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        for (position, recipient) in recipients.into_iter().enumerate() {
            state.recipients.push(Recipient {
                id: Uuid::now_v7(),
                campaign_id: campaign.id,
                position: position as i32,
                email: recipient.email,
                name: recipient.name,
                company: recipient.company,
                city: recipient.city,
                status: RecipientStatus::Pending.to_string(),
                last_error: None,
                sent_at: None,
                created_at: now,
            });
        }

        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn get_for_user(&self, user_id: UserId, id: CampaignId) -> Result<Option<Campaign>> {
        let state = self.state.read().await;
        Ok(state
            .campaigns
            .get(&id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<_> = state
            .campaigns
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(paginate(campaigns.into_iter(), limit, offset))
    }

    async fn count_by_user(&self, user_id: UserId) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.campaigns.values().filter(|c| c.user_id == user_id).count() as i64)
    }

    async fn list_by_status(&self, statuses: &[CampaignStatus]) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<_> = state
            .campaigns
            .values()
            .filter(|c| c.status_enum().map_or(false, |s| statuses.contains(&s)))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(campaigns)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        if !campaign.status_enum().map_or(false, |s| from.contains(&s)) {
            return Ok(None);
        }

        let now = Utc::now();
        campaign.status = to.to_string();
        campaign.updated_at = now;
        if to == CampaignStatus::Sending && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if to == CampaignStatus::Completed {
            campaign.completed_at = Some(now);
        }
        Ok(Some(campaign.clone()))
    }

    async fn record_outcome(&self, id: CampaignId, outcome: DeliveryStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(false);
        };
        if campaign.processed() >= campaign.total_recipients {
            return Ok(false);
        }

        match outcome {
            DeliveryStatus::Sent => campaign.sent_count += 1,
            DeliveryStatus::Failed => campaign.failed_count += 1,
        }
        campaign.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete(&self, user_id: UserId, id: CampaignId) -> Result<bool> {
        let mut state = self.state.write().await;
        let deletable = state.campaigns.get(&id).map_or(false, |c| {
            c.user_id == user_id
                && !c
                    .status_enum()
                    .map_or(false, |s| CampaignStatus::ACTIVE.contains(&s))
        });
        if !deletable {
            return Ok(false);
        }

        state.campaigns.remove(&id);
        state.recipients.retain(|r| r.campaign_id != id);
        Ok(true)
    }
}

#[async_trait]
impl RecipientRepository for MemoryStore {
    async fn list_pending(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>> {
        let state = self.state.read().await;
        let mut pending: Vec<_> = state
            .recipients
            .iter()
            .filter(|r| {
                r.campaign_id == campaign_id
                    && r.status_enum() == Some(RecipientStatus::Pending)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.position);
        Ok(pending)
    }

    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Recipient>> {
        let state = self.state.read().await;
        let mut recipients: Vec<_> = state
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        recipients.sort_by_key(|r| r.position);
        Ok(paginate(recipients.into_iter(), limit, offset))
    }

    async fn count(
        &self,
        campaign_id: CampaignId,
        status: Option<RecipientStatus>,
    ) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .recipients
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .filter(|r| status.map_or(true, |s| r.status_enum() == Some(s)))
            .count() as i64)
    }

    async fn mark_sent(&self, id: RecipientId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(recipient) = state
            .recipients
            .iter_mut()
            .find(|r| r.id == id && r.status_enum() == Some(RecipientStatus::Pending))
        else {
            return Ok(false);
        };
        recipient.status = RecipientStatus::Sent.to_string();
        recipient.sent_at = Some(at);
        recipient.last_error = None;
        Ok(true)
    }

    async fn mark_failed(&self, id: RecipientId, error: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(recipient) = state
            .recipients
            .iter_mut()
            .find(|r| r.id == id && r.status_enum() == Some(RecipientStatus::Pending))
        else {
            return Ok(false);
        };
        recipient.status = RecipientStatus::Failed.to_string();
        recipient.last_error = Some(error.to_string());
        Ok(true)
    }
}

fn empty_quota(user_id: UserId, day: NaiveDate) -> DailyQuota {
    DailyQuota {
        user_id,
        day,
        sent_count: 0,
        failed_count: 0,
        reserved_count: 0,
        updated_at: Utc::now(),
    }
}

#[async_trait]
impl QuotaRepository for MemoryStore {
    async fn get_or_create(&self, user_id: UserId, day: NaiveDate) -> Result<DailyQuota> {
        let mut state = self.state.write().await;
        Ok(state
            .quotas
            .entry((user_id, day))
            .or_insert_with(|| empty_quota(user_id, day))
            .clone())
    }

    async fn try_reserve(
        &self,
        user_id: UserId,
        day: NaiveDate,
        limit: i32,
    ) -> Result<Option<DailyQuota>> {
        let mut state = self.state.write().await;
        let quota = state
            .quotas
            .entry((user_id, day))
            .or_insert_with(|| empty_quota(user_id, day));
        if quota.attempts() >= limit {
            return Ok(None);
        }
        quota.reserved_count += 1;
        quota.updated_at = Utc::now();
        Ok(Some(quota.clone()))
    }

    async fn record(
        &self,
        user_id: UserId,
        day: NaiveDate,
        outcome: DeliveryStatus,
    ) -> Result<DailyQuota> {
        let mut state = self.state.write().await;
        let quota = state
            .quotas
            .entry((user_id, day))
            .or_insert_with(|| empty_quota(user_id, day));
        quota.reserved_count = (quota.reserved_count - 1).max(0);
        match outcome {
            DeliveryStatus::Sent => quota.sent_count += 1,
            DeliveryStatus::Failed => quota.failed_count += 1,
        }
        quota.updated_at = Utc::now();
        Ok(quota.clone())
    }
}

#[async_trait]
impl EmailLogRepository for MemoryStore {
    async fn append(&self, entry: NewEmailLog) -> Result<EmailLog> {
        let log = EmailLog {
            id: entry.id,
            user_id: entry.user_id,
            campaign_id: entry.campaign_id,
            recipient_id: entry.recipient_id,
            to_email: entry.to_email,
            subject: NewEmailLog::subject_snippet(&entry.subject),
            status: entry.status.to_string(),
            error: entry.error,
            created_at: Utc::now(),
        };

        let mut state = self.state.write().await;
        if state.email_logs.iter().any(|l| l.id == log.id) {
            return Err(Error::Conflict(format!("Email log {} already exists", log.id)));
        }
        state.email_logs.push(log.clone());
        Ok(log)
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailLogView>> {
        let state = self.state.read().await;
        let first_open = |id: EmailLogId| {
            state
                .email_opens
                .iter()
                .filter(|(log_id, _)| *log_id == id)
                .map(|(_, at)| *at)
                .min()
        };

        let views = state
            .email_logs
            .iter()
            .rev()
            .filter(|l| l.user_id == user_id)
            .map(|l| EmailLogView {
                id: l.id,
                user_id: l.user_id,
                campaign_id: l.campaign_id,
                recipient_id: l.recipient_id,
                to_email: l.to_email.clone(),
                subject: l.subject.clone(),
                status: l.status.clone(),
                error: l.error.clone(),
                created_at: l.created_at,
                opened_at: first_open(l.id),
            });
        Ok(paginate(views, limit, offset))
    }

    async fn stats_by_user(&self, user_id: UserId) -> Result<EmailStats> {
        let state = self.state.read().await;
        let mut stats = EmailStats::default();
        for log in state.email_logs.iter().filter(|l| l.user_id == user_id) {
            stats.total += 1;
            match log.status.as_str() {
                "sent" => stats.sent += 1,
                "failed" => stats.failed += 1,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn record_open(&self, id: EmailLogId) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.email_logs.iter().any(|l| l.id == id) {
            return Ok(false);
        }
        state.email_opens.push((id, Utc::now()));
        Ok(true)
    }
}

#[async_trait]
impl PremiumRequestRepository for MemoryStore {
    async fn create(&self, user_id: UserId) -> Result<PremiumRequest> {
        let mut state = self.state.write().await;
        let pending = PremiumRequestStatus::Pending.to_string();
        if let Some(existing) = state
            .premium_requests
            .iter()
            .find(|r| r.user_id == user_id && r.status == pending)
        {
            return Ok(existing.clone());
        }

        let request = PremiumRequest {
            id: Uuid::now_v7(),
            user_id,
            status: pending,
            decided_by: None,
            decided_at: None,
            created_at: Utc::now(),
        };
        state.premium_requests.push(request.clone());
        Ok(request)
    }

    async fn get(&self, id: PremiumRequestId) -> Result<Option<PremiumRequest>> {
        let state = self.state.read().await;
        Ok(state.premium_requests.iter().find(|r| r.id == id).cloned())
    }

    async fn list(&self, status: Option<PremiumRequestStatus>) -> Result<Vec<PremiumRequest>> {
        let status = status.map(|s| s.to_string());
        let state = self.state.read().await;
        Ok(state
            .premium_requests
            .iter()
            .filter(|r| status.as_ref().map_or(true, |s| &r.status == s))
            .cloned()
            .collect())
    }

    async fn decide(
        &self,
        id: PremiumRequestId,
        approve: bool,
        admin_id: UserId,
    ) -> Result<Option<PremiumRequest>> {
        let mut state = self.state.write().await;
        let pending = PremiumRequestStatus::Pending.to_string();
        let Some(request) = state
            .premium_requests
            .iter_mut()
            .find(|r| r.id == id && r.status == pending)
        else {
            return Ok(None);
        };

        let status = if approve {
            PremiumRequestStatus::Approved
        } else {
            PremiumRequestStatus::Rejected
        };
        request.status = status.to_string();
        request.decided_by = Some(admin_id);
        request.decided_at = Some(Utc::now());
        Ok(Some(request.clone()))
    }
}

#[async_trait]
impl UnsubscribeRepository for MemoryStore {
    async fn add(
        &self,
        user_id: UserId,
        email: &str,
        campaign_id: Option<CampaignId>,
    ) -> Result<Unsubscribe> {
        let email = email.to_lowercase();
        let mut state = self.state.write().await;
        let entry = state
            .unsubscribes
            .entry((user_id, email.clone()))
            .or_insert_with(|| Unsubscribe {
                id: Uuid::now_v7(),
                user_id,
                email,
                campaign_id: None,
                created_at: Utc::now(),
            });
        if entry.campaign_id.is_none() {
            entry.campaign_id = campaign_id;
        }
        Ok(entry.clone())
    }

    async fn is_unsubscribed(&self, user_id: UserId, email: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .unsubscribes
            .contains_key(&(user_id, email.to_lowercase())))
    }
}
