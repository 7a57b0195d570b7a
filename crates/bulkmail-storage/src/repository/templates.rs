//! Template repository

use crate::db::{db_err, DatabasePool};
use crate::models::{CreateTemplate, Template};
use async_trait::async_trait;
use bulkmail_common::types::{TemplateId, UserId};
use bulkmail_common::Result;
use uuid::Uuid;

/// Template repository trait
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn create(&self, input: CreateTemplate) -> Result<Template>;
    async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Option<Template>>;
    async fn list(&self, user_id: UserId) -> Result<Vec<Template>>;
    async fn count(&self, user_id: UserId) -> Result<i64>;
}

/// Database template repository
pub struct DbTemplateRepository {
    pool: DatabasePool,
}

impl DbTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for DbTemplateRepository {
    async fn create(&self, input: CreateTemplate) -> Result<Template> {
        sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (id, user_id, name, subject, body, html_body, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(input.user_id)
        .bind(&input.name)
        .bind(&input.subject)
        .bind(&input.body)
        .bind(&input.html_body)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn get(&self, user_id: UserId, id: TemplateId) -> Result<Option<Template>> {
        sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)
    }

    async fn list(&self, user_id: UserId) -> Result<Vec<Template>> {
        sqlx::query_as::<_, Template>(
            "SELECT * FROM templates WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)
    }

    async fn count(&self, user_id: UserId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM templates WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(self.pool.pool())
            .await
            .map_err(db_err)?;
        Ok(count)
    }
}
