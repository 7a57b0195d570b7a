//! Premium upgrade request repository

use crate::db::{db_err, DatabasePool};
use crate::models::{PremiumRequest, PremiumRequestStatus};
use async_trait::async_trait;
use bulkmail_common::types::{PremiumRequestId, UserId};
use bulkmail_common::Result;
use uuid::Uuid;

/// Premium request repository trait
#[async_trait]
pub trait PremiumRequestRepository: Send + Sync {
    /// Open a request, or return the user's existing pending one
    async fn create(&self, user_id: UserId) -> Result<PremiumRequest>;
    async fn get(&self, id: PremiumRequestId) -> Result<Option<PremiumRequest>>;
    async fn list(&self, status: Option<PremiumRequestStatus>) -> Result<Vec<PremiumRequest>>;

    /// Approve or reject a pending request. Returns `None` if it is not pending.
    async fn decide(
        &self,
        id: PremiumRequestId,
        approve: bool,
        admin_id: UserId,
    ) -> Result<Option<PremiumRequest>>;
}

/// Database premium request repository
pub struct DbPremiumRequestRepository {
    pool: DatabasePool,
}

impl DbPremiumRequestRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PremiumRequestRepository for DbPremiumRequestRepository {
    async fn create(&self, user_id: UserId) -> Result<PremiumRequest> {
        let inserted = sqlx::query_as::<_, PremiumRequest>(
            r#"
            INSERT INTO premium_requests (id, user_id, status, created_at)
            VALUES ($1, $2, 'pending', NOW())
            ON CONFLICT (user_id) WHERE status = 'pending' DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        if let Some(request) = inserted {
            return Ok(request);
        }

        sqlx::query_as::<_, PremiumRequest>(
            "SELECT * FROM premium_requests WHERE user_id = $1 AND status = 'pending'",
        )
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, id: PremiumRequestId) -> Result<Option<PremiumRequest>> {
        sqlx::query_as::<_, PremiumRequest>("SELECT * FROM premium_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list(&self, status: Option<PremiumRequestStatus>) -> Result<Vec<PremiumRequest>> {
        if let Some(status) = status {
            sqlx::query_as::<_, PremiumRequest>(
                "SELECT * FROM premium_requests WHERE status = $1 ORDER BY created_at ASC",
            )
            .bind(status.to_string())
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
        } else {
            sqlx::query_as::<_, PremiumRequest>(
                "SELECT * FROM premium_requests ORDER BY created_at ASC",
            )
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)
        }
    }

    async fn decide(
        &self,
        id: PremiumRequestId,
        approve: bool,
        admin_id: UserId,
    ) -> Result<Option<PremiumRequest>> {
        let status = if approve {
            PremiumRequestStatus::Approved
        } else {
            PremiumRequestStatus::Rejected
        };

        sqlx::query_as::<_, PremiumRequest>(
            r#"
            UPDATE premium_requests SET status = $2, decided_by = $3, decided_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(admin_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
