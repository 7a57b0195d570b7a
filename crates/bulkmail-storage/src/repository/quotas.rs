//! Daily quota repository

use crate::db::{db_err, DatabasePool};
use crate::models::{DailyQuota, DeliveryStatus};
use async_trait::async_trait;
use bulkmail_common::types::UserId;
use bulkmail_common::Result;
use chrono::NaiveDate;

/// Daily quota repository trait
#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// Fetch the counters for `day`, creating a zeroed row on first access
    async fn get_or_create(&self, user_id: UserId, day: NaiveDate) -> Result<DailyQuota>;

    /// Atomically reserve one attempt while `attempts() < limit`.
    /// Returns `None` when the ceiling is already reached.
    async fn try_reserve(
        &self,
        user_id: UserId,
        day: NaiveDate,
        limit: i32,
    ) -> Result<Option<DailyQuota>>;

    /// Settle one reserved attempt with its outcome. Without an outstanding
    /// reservation the attempt is simply added.
    async fn record(
        &self,
        user_id: UserId,
        day: NaiveDate,
        outcome: DeliveryStatus,
    ) -> Result<DailyQuota>;
}

/// Database quota repository
pub struct DbQuotaRepository {
    pool: DatabasePool,
}

impl DbQuotaRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaRepository for DbQuotaRepository {
    async fn get_or_create(&self, user_id: UserId, day: NaiveDate) -> Result<DailyQuota> {
        // The no-op update makes RETURNING yield the existing row on conflict
        sqlx::query_as::<_, DailyQuota>(
            r#"
            INSERT INTO daily_quotas (user_id, day, sent_count, failed_count, reserved_count, updated_at)
            VALUES ($1, $2, 0, 0, 0, NOW())
            ON CONFLICT (user_id, day) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn try_reserve(
        &self,
        user_id: UserId,
        day: NaiveDate,
        limit: i32,
    ) -> Result<Option<DailyQuota>> {
        // The conflict branch re-checks the ceiling on the locked row
        sqlx::query_as::<_, DailyQuota>(
            r#"
            INSERT INTO daily_quotas (user_id, day, sent_count, failed_count, reserved_count, updated_at)
            SELECT $1, $2, 0, 0, 1, NOW()
            WHERE $3 > 0
            ON CONFLICT (user_id, day) DO UPDATE SET
                reserved_count = daily_quotas.reserved_count + 1,
                updated_at = NOW()
            WHERE daily_quotas.sent_count + daily_quotas.failed_count + daily_quotas.reserved_count < $3
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(day)
        .bind(limit)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn record(
        &self,
        user_id: UserId,
        day: NaiveDate,
        outcome: DeliveryStatus,
    ) -> Result<DailyQuota> {
        let (sent, failed) = match outcome {
            DeliveryStatus::Sent => (1, 0),
            DeliveryStatus::Failed => (0, 1),
        };

        sqlx::query_as::<_, DailyQuota>(
            r#"
            INSERT INTO daily_quotas (user_id, day, sent_count, failed_count, reserved_count, updated_at)
            VALUES ($1, $2, $3, $4, 0, NOW())
            ON CONFLICT (user_id, day) DO UPDATE SET
                sent_count = daily_quotas.sent_count + EXCLUDED.sent_count,
                failed_count = daily_quotas.failed_count + EXCLUDED.failed_count,
                reserved_count = GREATEST(daily_quotas.reserved_count - 1, 0),
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(day)
        .bind(sent as i32)
        .bind(failed as i32)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
