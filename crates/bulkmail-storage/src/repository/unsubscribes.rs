//! Unsubscribe repository

use crate::db::{db_err, DatabasePool};
use crate::models::Unsubscribe;
use async_trait::async_trait;
use bulkmail_common::types::{CampaignId, UserId};
use bulkmail_common::Result;
use uuid::Uuid;

/// Unsubscribe repository trait. Addresses are compared lowercased.
#[async_trait]
pub trait UnsubscribeRepository: Send + Sync {
    /// Record an opt-out; repeating it keeps the first campaign seen
    async fn add(
        &self,
        user_id: UserId,
        email: &str,
        campaign_id: Option<CampaignId>,
    ) -> Result<Unsubscribe>;

    async fn is_unsubscribed(&self, user_id: UserId, email: &str) -> Result<bool>;
}

/// Database unsubscribe repository
pub struct DbUnsubscribeRepository {
    pool: DatabasePool,
}

impl DbUnsubscribeRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnsubscribeRepository for DbUnsubscribeRepository {
    async fn add(
        &self,
        user_id: UserId,
        email: &str,
        campaign_id: Option<CampaignId>,
    ) -> Result<Unsubscribe> {
        sqlx::query_as::<_, Unsubscribe>(
            r#"
            INSERT INTO unsubscribes (id, user_id, email, campaign_id, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id, email) DO UPDATE SET
                campaign_id = COALESCE(unsubscribes.campaign_id, EXCLUDED.campaign_id)
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(email.to_lowercase())
        .bind(campaign_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn is_unsubscribed(&self, user_id: UserId, email: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM unsubscribes WHERE user_id = $1 AND email = $2)",
        )
        .bind(user_id)
        .bind(email.to_lowercase())
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(exists)
    }
}
