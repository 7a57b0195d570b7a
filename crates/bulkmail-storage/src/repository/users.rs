//! User and session repositories

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateUser, Session, User};
use async_trait::async_trait;
use bulkmail_common::types::{Plan, UserId};
use bulkmail_common::{Error, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, input: CreateUser) -> Result<User>;
    async fn get(&self, id: UserId) -> Result<Option<User>>;
    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn set_plan(&self, id: UserId, plan: Plan) -> Result<Option<User>>;
    async fn increment_total_emails(&self, id: UserId) -> Result<()>;
}

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Open a session, dropping the user's expired ones
    async fn create(
        &self,
        user_id: UserId,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session>;
    async fn get(&self, token_hash: &str) -> Result<Option<Session>>;
    async fn delete(&self, token_hash: &str) -> Result<bool>;
}

/// Database user repository
pub struct DbUserRepository {
    pool: DatabasePool,
}

impl DbUserRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn create(&self, input: CreateUser) -> Result<User> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, role, plan, total_emails, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'free', 0, $5, $5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.email.to_lowercase())
        .bind(&input.password_hash)
        .bind(input.role.to_string())
        .bind(now)
        .fetch_one(self.pool.pool())
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                Error::Conflict("Email is already registered".to_string())
            }
            _ => db_err(e),
        })
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email.to_lowercase())
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn set_plan(&self, id: UserId, plan: Plan) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(
            "UPDATE users SET plan = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(plan.to_string())
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn increment_total_emails(&self, id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET total_emails = total_emails + 1 WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

/// Database session repository
pub struct DbSessionRepository {
    pool: DatabasePool,
}

impl DbSessionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for DbSessionRepository {
    async fn create(
        &self,
        user_id: UserId,
        token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        sqlx::query_as::<_, Session>(
            r#"
            WITH purged AS (
                DELETE FROM sessions WHERE user_id = $2 AND expires_at <= NOW()
            )
            INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .bind(&token_hash)
        .bind(expires_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, token_hash: &str) -> Result<Option<Session>> {
        sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn delete(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(token_hash)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}
