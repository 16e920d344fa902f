//! In-process `UserStore` used by tests in place of Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{
    EmbeddedUser, EmbeddingProfile, EmbeddingState, EmbeddingStatus, NewUser, ProfileUpdate, User,
};
use super::store::UserStore;

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
    fail_next_load: Mutex<Option<String>>,
    fail_next_email_lookup: Mutex<Option<String>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a user with the given id so tests can pick ids up front.
    pub fn insert_with_id(&self, id: Uuid, username: &str, email: &str) -> User {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id,
            username: username.into(),
            email: email.into(),
            role: Default::default(),
            password_hash: "hash".into(),
            embedding: EmbeddingState::default(),
            created_at: now,
            updated_at: now,
        };
        self.users.lock().unwrap().insert(id, user.clone());
        user
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.lock().unwrap().get(&id).cloned()
    }

    pub fn set_embedding(&self, id: Uuid, f: impl FnOnce(&mut EmbeddingState)) {
        if let Some(u) = self.users.lock().unwrap().get_mut(&id) {
            f(&mut u.embedding);
        }
    }

    /// Makes the next `load_embedding_profile` call fail with `message`.
    pub fn fail_next_load(&self, message: &str) {
        *self.fail_next_load.lock().unwrap() = Some(message.into());
    }

    /// Makes the next `find_by_email` call fail with `message`.
    pub fn fail_next_email_lookup(&self, message: &str) {
        *self.fail_next_email_lookup.lock().unwrap() = Some(message.into());
    }

    fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut User) -> R) -> Option<R> {
        self.users.lock().unwrap().get_mut(&id).map(f)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.lock().unwrap();
        anyhow::ensure!(
            !users.values().any(|u| u.email == user.email),
            "duplicate key value violates unique constraint \"users_email_key\""
        );
        let now = OffsetDateTime::now_utc();
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            role: user.role,
            password_hash: user.password_hash,
            embedding: EmbeddingState::default(),
            created_at: now,
            updated_at: now,
        };
        users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        if let Some(message) = self.fail_next_email_lookup.lock().unwrap().take() {
            anyhow::bail!(message);
        }
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<User>> {
        let mut all: Vec<User> = self.users.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|u| u.created_at);
        Ok(all)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> anyhow::Result<Option<User>> {
        Ok(self.update(id, |u| {
            if let Some(username) = update.username {
                u.username = username;
            }
            if let Some(email) = update.email {
                u.email = email;
            }
            if let Some(role) = update.role {
                u.role = role;
            }
            if let Some(hash) = update.password_hash {
                u.password_hash = hash;
            }
            u.updated_at = OffsetDateTime::now_utc();
            u.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.users.lock().unwrap().remove(&id).is_some())
    }

    async fn mark_embedding_processing(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .update(id, |u| {
                u.embedding.status = EmbeddingStatus::Processing;
                u.embedding.last_attempt_at = Some(OffsetDateTime::now_utc());
                u.embedding.attempts += 1;
            })
            .is_some())
    }

    async fn load_embedding_profile(&self, id: Uuid) -> anyhow::Result<Option<EmbeddingProfile>> {
        if let Some(message) = self.fail_next_load.lock().unwrap().take() {
            anyhow::bail!(message);
        }
        Ok(self.get(id).map(|u| EmbeddingProfile {
            username: u.username,
            email: u.email,
            role: Some(u.role),
            status: u.embedding.status,
        }))
    }

    async fn mark_embedding_ready(
        &self,
        id: Uuid,
        vector: Vec<f32>,
        dims: i32,
    ) -> anyhow::Result<bool> {
        Ok(self
            .update(id, |u| {
                u.embedding.status = EmbeddingStatus::Ready;
                u.embedding.vector = Some(vector);
                u.embedding.dims = Some(dims);
                u.embedding.updated_at = Some(OffsetDateTime::now_utc());
                u.embedding.last_error = None;
            })
            .is_some())
    }

    async fn mark_embedding_failed(&self, id: Uuid, message: &str) -> anyhow::Result<bool> {
        Ok(self
            .update(id, |u| {
                u.embedding.status = EmbeddingStatus::Failed;
                u.embedding.last_error = Some(message.to_string());
            })
            .is_some())
    }

    async fn list_ready_embeddings(&self) -> anyhow::Result<Vec<EmbeddedUser>> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .filter(|u| u.embedding.status == EmbeddingStatus::Ready)
            .filter_map(|u| {
                u.embedding.vector.clone().map(|vector| EmbeddedUser {
                    id: u.id,
                    username: u.username.clone(),
                    email: u.email.clone(),
                    role: u.role.to_string(),
                    vector,
                })
            })
            .collect())
    }

    async fn find_stale_embeddings(
        &self,
        stale_before: OffsetDateTime,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<Uuid>> {
        let users = self.users.lock().unwrap();
        let mut stale: Vec<&User> = users
            .values()
            .filter(|u| u.embedding.attempts < max_attempts)
            .filter(|u| match u.embedding.status {
                EmbeddingStatus::Failed => true,
                EmbeddingStatus::Processing => u
                    .embedding
                    .last_attempt_at
                    .is_some_and(|at| at < stale_before),
                _ => false,
            })
            .collect();
        stale.sort_by_key(|u| u.embedding.last_attempt_at);
        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|u| u.id)
            .collect())
    }
}
