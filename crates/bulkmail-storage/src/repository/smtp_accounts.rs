//! SMTP account repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateSmtpAccount, SmtpAccount};
use async_trait::async_trait;
use bulkmail_common::types::{SmtpAccountId, UserId};
use bulkmail_common::Result;
use uuid::Uuid;

/// SMTP account repository trait
#[async_trait]
pub trait SmtpAccountRepository: Send + Sync {
    async fn create(&self, input: CreateSmtpAccount) -> Result<SmtpAccount>;
    /// Get an account owned by the given user
    async fn get(&self, user_id: UserId, id: SmtpAccountId) -> Result<Option<SmtpAccount>>;
    async fn list(&self, user_id: UserId) -> Result<Vec<SmtpAccount>>;
    async fn count(&self, user_id: UserId) -> Result<i64>;
}

/// Database SMTP account repository
pub struct DbSmtpAccountRepository {
    pool: DatabasePool,
}

impl DbSmtpAccountRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SmtpAccountRepository for DbSmtpAccountRepository {
    async fn create(&self, input: CreateSmtpAccount) -> Result<SmtpAccount> {
        sqlx::query_as::<_, SmtpAccount>(
            r#"
            INSERT INTO smtp_accounts (id, user_id, email, password, smtp_server, smtp_port, from_name, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(&input.email)
        .bind(&input.password)
        .bind(&input.smtp_server)
        .bind(input.smtp_port)
        .bind(&input.from_name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, user_id: UserId, id: SmtpAccountId) -> Result<Option<SmtpAccount>> {
        sqlx::query_as::<_, SmtpAccount>(
            "SELECT * FROM smtp_accounts WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<SmtpAccount>> {
        sqlx::query_as::<_, SmtpAccount>(
            "SELECT * FROM smtp_accounts WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn count(&self, user_id: UserId) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM smtp_accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(self.pool.pool())
                .await
                .map_err(db_err)?;
        Ok(count)
    }
}
