use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::locks::UserLocks;
use super::retry::RetryPolicy;
use crate::error::{ServiceError, ServiceResult};
use crate::gemini::TextEmbedder;
use crate::users::repo_types::{EmbeddingProfile, Role};
use crate::users::store::UserStore;

/// How one invocation ended. Errors inside the job end up here as `Failed`
/// and in the user's `embedding.last_error`.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    Ready { dims: usize },
    Failed { error: String },
}

/// Computes and stores the profile embedding of a single user.
pub struct EmbeddingRunner {
    store: Arc<dyn UserStore>,
    embedder: Arc<dyn TextEmbedder>,
    retry: RetryPolicy,
    locks: UserLocks,
}

/// Fixed text block the profile vector is computed from.
pub fn build_user_embedding_text(profile: &EmbeddingProfile) -> String {
    let role = profile.role.unwrap_or(Role::User);
    [
        "User profile:".to_string(),
        format!("Username: {}", profile.username.trim()),
        format!("Email: {}", profile.email.trim()),
        format!("Role: {role}"),
    ]
    .join("\n")
}

impl EmbeddingRunner {
    pub fn new(
        store: Arc<dyn UserStore>,
        embedder: Arc<dyn TextEmbedder>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            embedder,
            retry,
            locks: UserLocks::default(),
        }
    }

    /// Runs one embedding attempt for `user_id`.
    ///
    /// Only a nil id is returned as an error, before storage is touched.
    /// Anything that goes wrong afterwards is written to the record as
    /// `FAILED` and reported as [`EmbedOutcome::Failed`]. Invocations for
    /// the same user run one at a time.
    #[instrument(skip(self))]
    pub async fn embed_user(&self, user_id: Uuid) -> ServiceResult<EmbedOutcome> {
        if user_id.is_nil() {
            return Err(ServiceError::Validation("user id is required".into()));
        }

        let _guard = self.locks.acquire(user_id).await;

        match self.store.mark_embedding_processing(user_id).await {
            Ok(true) => {}
            Ok(false) => debug!("no user matched while marking processing"),
            Err(e) => warn!(error = %e, "mark processing failed; continuing"),
        }

        match self.compute_and_store(user_id).await {
            Ok(dims) => {
                info!(dims, "user embedding ready");
                Ok(EmbedOutcome::Ready { dims })
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "user embedding failed");
                match self.store.mark_embedding_failed(user_id, &message).await {
                    Ok(true) => {}
                    Ok(false) => debug!("no user matched while marking failed"),
                    Err(e) => error!(error = %e, "mark failed write errored"),
                }
                Ok(EmbedOutcome::Failed { error: message })
            }
        }
    }

    async fn compute_and_store(&self, user_id: Uuid) -> ServiceResult<usize> {
        let profile = self
            .store
            .load_embedding_profile(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
        debug!(status = profile.status.as_str(), "loaded embedding profile");

        let text = build_user_embedding_text(&profile);
        let vector = self
            .retry
            .run(|| self.embedder.embed_text(&text))
            .await?;

        let dims = self.embedder.dimensions();
        if vector.len() != dims {
            return Err(ServiceError::upstream(format!(
                "Embedding dimension mismatch: expected {dims}, got {}",
                vector.len()
            )));
        }

        if !self
            .store
            .mark_embedding_ready(user_id, vector, dims as i32)
            .await?
        {
            debug!("no user matched while marking ready");
        }
        Ok(dims)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedEmbedder;
    use super::*;
    use crate::users::memory::MemoryUserStore;
    use crate::users::repo_types::EmbeddingStatus;
    use std::time::Duration;

    fn runner(store: Arc<MemoryUserStore>, embedder: Arc<ScriptedEmbedder>) -> EmbeddingRunner {
        EmbeddingRunner::new(store, embedder, RetryPolicy::new(3, Duration::from_millis(1)))
    }

    #[test]
    fn embedding_text_is_fixed_format() {
        let text = build_user_embedding_text(&EmbeddingProfile {
            username: "alice".into(),
            email: "  alice@example.com ".into(),
            role: None,
            status: EmbeddingStatus::Unset,
        });
        assert_eq!(
            text,
            "User profile:\nUsername: alice\nEmail: alice@example.com\nRole: user"
        );
    }

    #[tokio::test]
    async fn success_marks_ready_with_vector_and_dims() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "alice", "alice@example.com");
        store.set_embedding(id, |e| e.last_error = Some("old".into()));
        let embedder = Arc::new(ScriptedEmbedder::ok(3072));

        let out = runner(store.clone(), embedder.clone()).embed_user(id).await.unwrap();

        assert_eq!(out, EmbedOutcome::Ready { dims: 3072 });
        let e = store.get(id).unwrap().embedding;
        assert_eq!(e.status, EmbeddingStatus::Ready);
        assert_eq!(e.vector.as_ref().map(Vec::len), Some(3072));
        assert_eq!(e.dims, Some(3072));
        assert_eq!(e.attempts, 1);
        assert!(e.last_attempt_at.is_some());
        assert!(e.updated_at.is_some());
        assert!(e.last_error.is_none());
        assert!(embedder.texts.lock().unwrap()[0].contains("Username: alice"));
    }

    #[tokio::test]
    async fn nil_id_is_rejected_before_storage() {
        let store = Arc::new(MemoryUserStore::new());
        let embedder = Arc::new(ScriptedEmbedder::ok(3));
        let err = runner(store, embedder.clone())
            .embed_user(Uuid::nil())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn missing_user_fails_without_side_effects() {
        let store = Arc::new(MemoryUserStore::new());
        let embedder = Arc::new(ScriptedEmbedder::ok(3));
        let id = Uuid::new_v4();

        let out = runner(store.clone(), embedder.clone()).embed_user(id).await.unwrap();

        assert_eq!(
            out,
            EmbedOutcome::Failed {
                error: "User not found".into()
            }
        );
        assert!(store.get(id).is_none());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn missing_credential_marks_failed_and_keeps_previous_vector() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "bob", "bob@example.com");
        store.set_embedding(id, |e| {
            e.status = EmbeddingStatus::Ready;
            e.vector = Some(vec![1.0; 3]);
            e.dims = Some(3);
        });
        let embedder = Arc::new(ScriptedEmbedder::failing(
            3,
            || ServiceError::Configuration("GEMINI_API_KEY must be set to compute embeddings".into()),
            1,
        ));

        let out = runner(store.clone(), embedder.clone()).embed_user(id).await.unwrap();

        assert!(matches!(out, EmbedOutcome::Failed { ref error } if error.contains("GEMINI_API_KEY")));
        let e = store.get(id).unwrap().embedding;
        assert_eq!(e.status, EmbeddingStatus::Failed);
        assert_eq!(e.vector, Some(vec![1.0; 3]));
        assert_eq!(e.attempts, 1);
        assert!(e.last_error.unwrap().contains("GEMINI_API_KEY"));
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_within_one_attempt() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "carol", "carol@example.com");
        let embedder = Arc::new(ScriptedEmbedder::failing(
            4,
            || ServiceError::transient("Gemini request failed: timed out"),
            2,
        ));

        let out = runner(store.clone(), embedder.clone()).embed_user(id).await.unwrap();

        assert_eq!(out, EmbedOutcome::Ready { dims: 4 });
        assert_eq!(embedder.calls(), 3);
        assert_eq!(store.get(id).unwrap().embedding.attempts, 1);
    }

    #[tokio::test]
    async fn persistent_timeouts_end_failed_with_upstream_message() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "dan", "dan@example.com");
        let embedder = Arc::new(ScriptedEmbedder::failing(
            4,
            || ServiceError::transient("Gemini request failed: operation timed out"),
            3,
        ));

        let out = runner(store.clone(), embedder).embed_user(id).await.unwrap();

        assert!(matches!(out, EmbedOutcome::Failed { .. }));
        let e = store.get(id).unwrap().embedding;
        assert_eq!(e.status, EmbeddingStatus::Failed);
        assert_eq!(e.attempts, 1);
        assert!(e.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn storage_error_on_load_goes_to_failure_path() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "erin", "erin@example.com");
        store.fail_next_load("connection reset");
        let embedder = Arc::new(ScriptedEmbedder::ok(3));

        let out = runner(store.clone(), embedder).embed_user(id).await.unwrap();

        assert!(matches!(out, EmbedOutcome::Failed { ref error } if error.contains("connection reset")));
        let e = store.get(id).unwrap().embedding;
        assert_eq!(e.status, EmbeddingStatus::Failed);
        assert_ne!(e.status, EmbeddingStatus::Processing);
    }

    #[tokio::test]
    async fn wrong_length_vector_is_rejected() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "fay", "fay@example.com");
        let embedder = Arc::new(ScriptedEmbedder::ok(3).then(Ok(vec![1.0, 2.0])));

        let out = runner(store.clone(), embedder).embed_user(id).await.unwrap();

        assert!(matches!(out, EmbedOutcome::Failed { ref error } if error.contains("mismatch")));
        assert!(store.get(id).unwrap().embedding.vector.is_none());
    }

    #[tokio::test]
    async fn user_deleted_mid_job_is_not_recreated() {
        use crate::users::store::UserStore;

        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "hal", "hal@example.com");
        let mut embedder = ScriptedEmbedder::ok(3);
        embedder.delay = Duration::from_millis(50);
        let r = Arc::new(runner(store.clone(), Arc::new(embedder)));

        let job = tokio::spawn({
            let r = r.clone();
            async move { r.embed_user(id).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.delete(id).await.unwrap());

        let out = job.await.unwrap().unwrap();
        assert_eq!(out, EmbedOutcome::Ready { dims: 3 });
        assert!(store.get(id).is_none());
    }

    #[tokio::test]
    async fn concurrent_runs_for_one_user_both_count() {
        let store = Arc::new(MemoryUserStore::new());
        let id = Uuid::new_v4();
        store.insert_with_id(id, "gus", "gus@example.com");
        let mut embedder = ScriptedEmbedder::ok(3).then(Err(ServiceError::upstream("bad shape")));
        embedder.delay = Duration::from_millis(10);
        let r = Arc::new(runner(store.clone(), Arc::new(embedder)));

        let (a, b) = tokio::join!(r.embed_user(id), r.embed_user(id));
        let outcomes = [a.unwrap(), b.unwrap()];

        let e = store.get(id).unwrap().embedding;
        assert_eq!(e.attempts, 2);
        // serialized: the second run decides the final state
        assert_eq!(e.status, EmbeddingStatus::Ready);
        assert_eq!(e.vector.as_ref().map(Vec::len), Some(3));
        assert!(e.last_error.is_none());
        assert!(outcomes.contains(&EmbedOutcome::Ready { dims: 3 }));
    }
}
