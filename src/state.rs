use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::config::AppConfig;
use crate::embedding::{sweep, EmbeddingQueue, EmbeddingRunner, RetryPolicy};
use crate::gemini::{GeminiClient, TextEmbedder, TextGenerator};
use crate::users::{repo::PgUserStore, store::UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub generator: Arc<dyn TextGenerator>,
    pub embeddings: EmbeddingQueue,
}

impl AppState {
    /// Connects to Postgres, applies migrations and starts the background
    /// embedding worker and sweeper.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .context("run migrations")?;

        if config.gemini.api_key.is_none() {
            warn!("GEMINI_API_KEY is not set; embeddings and ask will fail until it is");
        }
        let gemini = Arc::new(GeminiClient::new(config.gemini.clone())?);
        let users = Arc::new(PgUserStore::new(db)) as Arc<dyn UserStore>;

        let state = Self::from_parts(config, users, gemini.clone(), gemini);
        sweep::spawn_sweeper(
            state.users.clone(),
            state.embeddings.clone(),
            state.config.embedding.clone(),
        );
        Ok(state)
    }

    /// Wires state from ready-made collaborators and starts the embedding
    /// worker. Must be called inside a tokio runtime.
    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        embedder: Arc<dyn TextEmbedder>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let jobs = &config.embedding;
        let runner = Arc::new(EmbeddingRunner::new(
            users.clone(),
            embedder.clone(),
            RetryPolicy::new(jobs.provider_tries, jobs.retry_base_delay),
        ));
        let (embeddings, _worker) = EmbeddingQueue::start(runner, jobs.workers);

        Self {
            config,
            users,
            embedder,
            generator,
            embeddings,
        }
    }
}
