//! Recipient repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Recipient, RecipientStatus};
use async_trait::async_trait;
use bulkmail_common::types::{CampaignId, RecipientId};
use bulkmail_common::Result;
use chrono::{DateTime, Utc};

/// Recipient repository trait
#[async_trait]
pub trait RecipientRepository: Send + Sync {
    /// Pending recipients in creation order
    async fn list_pending(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>>;
    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Recipient>>;
    async fn count(&self, campaign_id: CampaignId, status: Option<RecipientStatus>)
        -> Result<i64>;

    /// pending -> sent; false if the recipient was no longer pending
    async fn mark_sent(&self, id: RecipientId, at: DateTime<Utc>) -> Result<bool>;

    /// pending -> failed; false if the recipient was no longer pending
    async fn mark_failed(&self, id: RecipientId, error: &str) -> Result<bool>;
}

/// Database recipient repository
pub struct DbRecipientRepository {
    pool: DatabasePool,
}

impl DbRecipientRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRepository for DbRecipientRepository {
    async fn list_pending(&self, campaign_id: CampaignId) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT * FROM recipients
            WHERE campaign_id = $1 AND status = 'pending'
            ORDER BY position ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_by_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Recipient>> {
        sqlx::query_as::<_, Recipient>(
            r#"
            SELECT * FROM recipients
            WHERE campaign_id = $1
            ORDER BY position ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(campaign_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn count(
        &self,
        campaign_id: CampaignId,
        status: Option<RecipientStatus>,
    ) -> Result<i64> {
        let (count,): (i64,) = if let Some(status) = status {
            sqlx::query_as("SELECT COUNT(*) FROM recipients WHERE campaign_id = $1 AND status = $2")
                .bind(campaign_id)
                .bind(status.to_string())
                .fetch_one(self.pool.pool())
                .await
                .map_err(db_err)?
        } else {
            sqlx::query_as("SELECT COUNT(*) FROM recipients WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(self.pool.pool())
                .await
                .map_err(db_err)?
        };
        Ok(count)
    }

    async fn mark_sent(&self, id: RecipientId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recipients SET status = 'sent', sent_at = $2, last_error = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: RecipientId, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE recipients SET status = 'failed', last_error = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
