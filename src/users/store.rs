use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{EmbeddedUser, EmbeddingProfile, NewUser, ProfileUpdate, User};

/// Persistence for user records.
///
/// The `mark_embedding_*` writes are point updates by id. They return
/// `false` when no row matched, which is not an error.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> anyhow::Result<User>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<User>>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> anyhow::Result<Option<User>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Sets `PROCESSING`, stamps `last_attempt_at` and bumps `attempts`.
    async fn mark_embedding_processing(&self, id: Uuid) -> anyhow::Result<bool>;
    async fn load_embedding_profile(&self, id: Uuid) -> anyhow::Result<Option<EmbeddingProfile>>;
    /// Sets `READY` with the vector, clears `last_error`.
    async fn mark_embedding_ready(&self, id: Uuid, vector: Vec<f32>, dims: i32)
        -> anyhow::Result<bool>;
    /// Sets `FAILED` and `last_error`; the stored vector is left alone.
    async fn mark_embedding_failed(&self, id: Uuid, message: &str) -> anyhow::Result<bool>;

    async fn list_ready_embeddings(&self) -> anyhow::Result<Vec<EmbeddedUser>>;
    /// Users in `FAILED`, or in `PROCESSING` since before `stale_before`,
    /// with fewer than `max_attempts` attempts.
    async fn find_stale_embeddings(
        &self,
        stale_before: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<Uuid>>;
}
