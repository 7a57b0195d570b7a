//! Campaign repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Campaign, CampaignStatus, CreateCampaign, DeliveryStatus, NewRecipient};
use async_trait::async_trait;
use bulkmail_common::types::{CampaignId, UserId};
use bulkmail_common::Result;
use chrono::Utc;
use uuid::Uuid;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// Create a draft campaign together with its recipients, in input order
    async fn create(&self, input: CreateCampaign, recipients: Vec<NewRecipient>)
        -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_for_user(&self, user_id: UserId, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list_by_user(&self, user_id: UserId, limit: i64, offset: i64)
        -> Result<Vec<Campaign>>;
    async fn count_by_user(&self, user_id: UserId) -> Result<i64>;
    async fn list_by_status(&self, statuses: &[CampaignStatus]) -> Result<Vec<Campaign>>;

    /// Move the campaign to `to` if its current status is one of `from`.
    /// Returns `None` when the campaign was not in an allowed status.
    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>>;

    /// Atomically bump `sent_count` or `failed_count`; false if the counters are already full
    async fn record_outcome(&self, id: CampaignId, outcome: DeliveryStatus) -> Result<bool>;

    /// Delete a campaign that no worker owns
    async fn delete(&self, user_id: UserId, id: CampaignId) -> Result<bool>;
}

fn status_strings(statuses: &[CampaignStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Database campaign repository
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(
        &self,
        input: CreateCampaign,
        recipients: Vec<NewRecipient>,
    ) -> Result<Campaign> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, user_id, smtp_account_id, name, subject, body, html_body,
                status, total_recipients, sent_count, failed_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'draft', $8, 0, 0, $9, $9)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(input.smtp_account_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.body)
        .bind(&input.html_body)
        .bind(recipients.len() as i32)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        for (position, recipient) in recipients.into_iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO recipients (id, campaign_id, position, email, name, company, city, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(position as i32)
            .bind(&recipient.email)
            .bind(&recipient.name)
            .bind(&recipient.company)
            .bind(&recipient.city)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn get_for_user(&self, user_id: UserId, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn count_by_user(&self, user_id: UserId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM campaigns WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(count)
    }

    async fn list_by_status(&self, statuses: &[CampaignStatus]) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE status = ANY($1) ORDER BY created_at ASC",
        )
        .bind(status_strings(statuses))
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn transition(
        &self,
        id: CampaignId,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let now = Utc::now();
        let started_at = (to == CampaignStatus::Sending).then_some(now);
        let completed_at = (to == CampaignStatus::Completed).then_some(now);

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = COALESCE(started_at, $4),
                completed_at = COALESCE($5, completed_at),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(status_strings(from))
        .bind(started_at)
        .bind(completed_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn record_outcome(&self, id: CampaignId, outcome: DeliveryStatus) -> Result<bool> {
        let query = match outcome {
            DeliveryStatus::Sent => {
                r#"
                UPDATE campaigns SET sent_count = sent_count + 1, updated_at = NOW()
                WHERE id = $1 AND sent_count + failed_count < total_recipients
                "#
            }
            DeliveryStatus::Failed => {
                r#"
                UPDATE campaigns SET failed_count = failed_count + 1, updated_at = NOW()
                WHERE id = $1 AND sent_count + failed_count < total_recipients
                "#
            }
        };

        let result = sqlx::query(query)
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, user_id: UserId, id: CampaignId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM campaigns
            WHERE id = $1 AND user_id = $2 AND status NOT IN ('queued', 'sending')
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
