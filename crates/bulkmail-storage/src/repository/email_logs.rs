//! Email log repository
//!
//! Log rows are append-only. Opens are stored as separate events and joined
//! in when the history is read.

use crate::db::{db_err, DatabasePool};
use crate::models::{EmailLog, EmailLogView, EmailStats, NewEmailLog};
use async_trait::async_trait;
use bulkmail_common::types::{EmailLogId, UserId};
use bulkmail_common::Result;
use uuid::Uuid;

/// Email log repository trait
#[async_trait]
pub trait EmailLogRepository: Send + Sync {
    async fn append(&self, entry: NewEmailLog) -> Result<EmailLog>;
    /// Newest first, with the first open time when one was recorded
    async fn list_by_user(&self, user_id: UserId, limit: i64, offset: i64)
        -> Result<Vec<EmailLogView>>;
    async fn stats_by_user(&self, user_id: UserId) -> Result<EmailStats>;
    /// Record an open event; false when no log row has this id
    async fn record_open(&self, id: EmailLogId) -> Result<bool>;
}

/// Database email log repository
pub struct DbEmailLogRepository {
    pool: DatabasePool,
}

impl DbEmailLogRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailLogRepository for DbEmailLogRepository {
    async fn append(&self, entry: NewEmailLog) -> Result<EmailLog> {
        sqlx::query_as::<_, EmailLog>(
            r#"
            INSERT INTO email_logs (id, user_id, campaign_id, recipient_id, to_email, subject, status, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.campaign_id)
        .bind(entry.recipient_id)
        .bind(&entry.to_email)
        .bind(NewEmailLog::subject_snippet(&entry.subject))
        .bind(entry.status.to_string())
        .bind(&entry.error)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list_by_user(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EmailLogView>> {
        sqlx::query_as::<_, EmailLogView>(
            r#"
            SELECT l.*, o.opened_at
            FROM email_logs l
            LEFT JOIN (
                SELECT email_log_id, MIN(opened_at) AS opened_at
                FROM email_opens
                GROUP BY email_log_id
            ) o ON o.email_log_id = l.id
            WHERE l.user_id = $1
            ORDER BY l.created_at DESC, l.id DESC
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

    async fn stats_by_user(&self, user_id: UserId) -> Result<EmailStats> {
        let (total, sent, failed): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'sent'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM email_logs
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(EmailStats { total, sent, failed })
    }

    async fn record_open(&self, id: EmailLogId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO email_opens (id, email_log_id, opened_at)
            SELECT $1, id, NOW() FROM email_logs WHERE id = $2
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(id)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
