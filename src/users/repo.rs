use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{
    EmbeddedUser, EmbeddingProfile, EmbeddingProfileRow, EmbeddingStatus, NewUser, ProfileUpdate,
    User, UserRow,
};
use super::store::UserStore;

const USER_COLUMNS: &str = r#"
    id, username, email, role, password_hash,
    embedding_status, embedding_vector, embedding_dims, embedding_attempts,
    embedding_last_attempt_at, embedding_updated_at, embedding_last_error,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, username, email, role, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .context("insert user")?;
        row.try_into()
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        row.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        row.map(User::try_from).transpose()
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> anyhow::Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET username      = COALESCE($2, username),
                   email         = COALESCE($3, email),
                   role          = COALESCE($4, role),
                   password_hash = COALESCE($5, password_hash),
                   updated_at    = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.username)
        .bind(update.email)
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.password_hash)
        .fetch_optional(&self.db)
        .await
        .context("update user profile")?;
        row.map(User::try_from).transpose()
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete user")?;
        Ok(res.rows_affected() > 0)
    }

    async fn mark_embedding_processing(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET embedding_status = $2,
                   embedding_last_attempt_at = now(),
                   embedding_attempts = embedding_attempts + 1
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(EmbeddingStatus::Processing.as_str())
        .execute(&self.db)
        .await
        .context("mark embedding processing")?;
        Ok(res.rows_affected() > 0)
    }

    async fn load_embedding_profile(&self, id: Uuid) -> anyhow::Result<Option<EmbeddingProfile>> {
        let row = sqlx::query_as::<_, EmbeddingProfileRow>(
            r#"
            SELECT username, email, role, embedding_status
              FROM users
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("load embedding profile")?;
        row.map(EmbeddingProfile::try_from).transpose()
    }

    async fn mark_embedding_ready(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        dims: i32,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET embedding_status = $2,
                   embedding_vector = $3,
                   embedding_dims = $4,
                   embedding_updated_at = now(),
                   embedding_last_error = NULL
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(EmbeddingStatus::Ready.as_str())
        .bind(vector)
        .bind(dims)
        .execute(&self.db)
        .await
        .context("mark embedding ready")?;
        Ok(res.rows_affected() > 0)
    }

    async fn mark_embedding_failed(&self, id: Uuid, message: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET embedding_status = $2,
                   embedding_last_error = $3
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(EmbeddingStatus::Failed.as_str())
        .bind(message)
        .execute(&self.db)
        .await
        .context("mark embedding failed")?;
        Ok(res.rows_affected() > 0)
    }

    async fn list_ready_embeddings(&self) -> anyhow::Result<Vec<EmbeddedUser>> {
        let rows = sqlx::query_as::<_, EmbeddedUser>(
            r#"
            SELECT id, username, email, role, embedding_vector AS vector
              FROM users
             WHERE embedding_status = $1
               AND embedding_vector IS NOT NULL
            "#,
        )
        .bind(EmbeddingStatus::Ready.as_str())
        .fetch_all(&self.db)
        .await
        .context("list ready embeddings")?;
        Ok(rows)
    }

    async fn find_stale_embeddings(
        &self,
        stale_before: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id
              FROM users
             WHERE embedding_attempts < $2
               AND (embedding_status = $3
                    OR (embedding_status = $4 AND embedding_last_attempt_at < $1))
             ORDER BY embedding_last_attempt_at ASC NULLS FIRST
             LIMIT $5
            "#,
        )
        .bind(stale_before)
        .bind(max_attempts)
        .bind(EmbeddingStatus::Failed.as_str())
        .bind(EmbeddingStatus::Processing.as_str())
        .bind(limit)
        .fetch_all(&self.db)
        .await
        .context("find stale embeddings")?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}
