//! Quota Tracker - Per-plan daily send limits
//!
//! Counters live in one row per user per UTC day. The first access on a new
//! day creates a fresh row, so there is no reset job. A send reserves its
//! attempt before the transport call and settles it as sent or failed
//! afterwards.

use bulkmail_common::types::{Plan, UserId};
use bulkmail_common::{Config, Error, Result};
use bulkmail_storage::models::DeliveryStatus;
use bulkmail_storage::repository::{QuotaRepository, UserRepository};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Today's usage for one user
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QuotaUsage {
    pub plan: Plan,
    pub day: NaiveDate,
    pub sent_today: i32,
    pub failed_today: i32,
    pub emails_today: i32,
    pub daily_limit: i32,
    pub remaining_today: i32,
    pub total_emails: i64,
}

/// One attempt counted against a user's quota on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaReservation {
    pub user_id: UserId,
    pub day: NaiveDate,
}

/// Daily quota tracker
#[derive(Clone)]
pub struct QuotaTracker {
    users: Arc<dyn UserRepository>,
    quotas: Arc<dyn QuotaRepository>,
    free_limit: i32,
    premium_limit: i32,
}

impl QuotaTracker {
    /// Create a new quota tracker
    pub fn new(
        users: Arc<dyn UserRepository>,
        quotas: Arc<dyn QuotaRepository>,
        config: &Config,
    ) -> Self {
        Self {
            users,
            quotas,
            free_limit: config.quota.free_daily_limit,
            premium_limit: config.quota.premium_daily_limit,
        }
    }

    /// Ceiling for a plan
    pub fn limit_for(&self, plan: Plan) -> i32 {
        match plan {
            Plan::Free => self.free_limit,
            Plan::Premium => self.premium_limit,
        }
    }

    /// Current UTC calendar day
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Reserve the next attempt for today, or `None` once the ceiling is
    /// reached. The reservation already counts against the quota, so
    /// concurrent senders cannot overshoot it. Storage failures are logged
    /// and treated as "cannot send".
    pub async fn reserve(&self, user_id: UserId) -> Option<QuotaReservation> {
        self.reserve_on(user_id, Self::today()).await
    }

    pub(crate) async fn reserve_on(&self, user_id: UserId, day: NaiveDate) -> Option<QuotaReservation> {
        match self.try_reserve(user_id, day).await {
            Ok(reserved) => reserved,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Quota check failed, refusing send");
                None
            }
        }
    }

    async fn try_reserve(&self, user_id: UserId, day: NaiveDate) -> Result<Option<QuotaReservation>> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
        let limit = self.limit_for(user.plan_enum());

        let reserved = self.quotas.try_reserve(user_id, day, limit).await?;
        Ok(reserved.map(|quota| {
            debug!(user_id = %user_id, day = %day, attempts = quota.attempts(), limit, "Reserved send attempt");
            QuotaReservation { user_id, day }
        }))
    }

    /// Settle a reserved attempt and add it to the user's lifetime total
    pub async fn record(&self, reservation: QuotaReservation, outcome: DeliveryStatus) -> Result<()> {
        self.record_on(reservation.user_id, reservation.day, outcome).await
    }

    pub(crate) async fn record_on(
        &self,
        user_id: UserId,
        day: NaiveDate,
        outcome: DeliveryStatus,
    ) -> Result<()> {
        let quota = self.quotas.record(user_id, day, outcome).await?;
        self.users.increment_total_emails(user_id).await?;
        debug!(
            user_id = %user_id,
            day = %day,
            attempts = quota.attempts(),
            "Recorded send attempt"
        );
        Ok(())
    }

    /// Usage summary for today
    pub async fn usage(&self, user_id: UserId) -> Result<QuotaUsage> {
        self.usage_on(user_id, Self::today()).await
    }

    pub(crate) async fn usage_on(&self, user_id: UserId, day: NaiveDate) -> Result<QuotaUsage> {
        let user = self
            .users
            .get(user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {}", user_id)))?;
        let quota = self.quotas.get_or_create(user_id, day).await?;

        let plan = user.plan_enum();
        let daily_limit = self.limit_for(plan);
        let emails_today = quota.attempts();

        Ok(QuotaUsage {
            plan,
            day,
            sent_today: quota.sent_count,
            failed_today: quota.failed_count,
            emails_today,
            daily_limit,
            remaining_today: (daily_limit - emails_today).max(0),
            total_emails: user.total_emails,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulkmail_common::types::UserRole;
    use bulkmail_storage::models::CreateUser;
    use bulkmail_storage::Repositories;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Repositories, QuotaTracker, UserId) {
        let repos = Repositories::in_memory();
        let tracker = QuotaTracker::new(repos.users.clone(), repos.quotas.clone(), &Config::default());
        let user = repos
            .users
            .create(CreateUser {
                email: "free@example.com".to_string(),
                password_hash: "x".to_string(),
                role: UserRole::User,
            })
            .await
            .unwrap();
        (repos, tracker, user.id)
    }

    #[tokio::test]
    async fn test_failed_attempts_count_against_quota() {
        let (_repos, tracker, user_id) = setup().await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();

        for i in 0..10 {
            let outcome = DeliveryStatus::from_ok(i % 2 == 0);
            tracker.record_on(user_id, day, outcome).await.unwrap();
        }

        assert!(tracker.reserve_on(user_id, day).await.is_none());
        let usage = tracker.usage_on(user_id, day).await.unwrap();
        assert_eq!(usage.emails_today, 10);
        assert_eq!(usage.sent_today, 5);
        assert_eq!(usage.remaining_today, 0);
        assert_eq!(usage.total_emails, 10);
    }

    #[tokio::test]
    async fn test_new_day_resets_quota() {
        let (_repos, tracker, user_id) = setup().await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let next = day.succ_opt().unwrap();

        for _ in 0..10 {
            tracker.record_on(user_id, day, DeliveryStatus::Sent).await.unwrap();
        }
        assert!(tracker.reserve_on(user_id, day).await.is_none());
        assert!(tracker.reserve_on(user_id, next).await.is_some());
    }

    #[tokio::test]
    async fn test_premium_plan_raises_limit() {
        let (repos, tracker, user_id) = setup().await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for _ in 0..10 {
            tracker.record_on(user_id, day, DeliveryStatus::Sent).await.unwrap();
        }

        repos.users.set_plan(user_id, Plan::Premium).await.unwrap();
        let usage = tracker.usage_on(user_id, day).await.unwrap();
        assert_eq!(usage.daily_limit, 100);
        assert_eq!(usage.remaining_today, 90);
    }

    #[tokio::test]
    async fn test_unknown_user_cannot_send() {
        let (_repos, tracker, _) = setup().await;
        assert!(tracker.reserve(uuid::Uuid::now_v7()).await.is_none());
    }

    #[tokio::test]
    async fn test_reservation_counts_until_settled() {
        let (_repos, tracker, user_id) = setup().await;
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        for _ in 0..9 {
            tracker.record_on(user_id, day, DeliveryStatus::Sent).await.unwrap();
        }

        let reservation = tracker.reserve_on(user_id, day).await.unwrap();
        assert_eq!(reservation.day, day);
        assert!(tracker.reserve_on(user_id, day).await.is_none());
        assert_eq!(tracker.usage_on(user_id, day).await.unwrap().remaining_today, 0);

        tracker.record(reservation, DeliveryStatus::Failed).await.unwrap();
        let usage = tracker.usage_on(user_id, day).await.unwrap();
        assert_eq!(usage.emails_today, 10);
        assert_eq!(usage.failed_today, 1);
        assert!(tracker.reserve_on(user_id, day).await.is_none());
    }
}
