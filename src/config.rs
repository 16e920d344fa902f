use std::time::Duration;

use serde::Deserialize;

pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_EMBEDDING_MODEL: &str = "gemini-embedding-001";
pub const GEMINI_GENERATION_MODEL: &str = "gemini-2.5-flash";
/// Dimensionality of `gemini-embedding-001` vectors.
pub const GEMINI_EMBEDDING_DIMS: usize = 3072;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub generation_model: String,
    pub embedding_dims: usize,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    pub temperature: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: GEMINI_DEFAULT_BASE_URL.into(),
            embedding_model: GEMINI_EMBEDDING_MODEL.into(),
            generation_model: GEMINI_GENERATION_MODEL.into(),
            embedding_dims: GEMINI_EMBEDDING_DIMS,
            embed_timeout: Duration::from_millis(15_000),
            generate_timeout: Duration::from_millis(20_000),
            temperature: 0.2,
        }
    }
}

/// Tuning for the background embedding pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingJobConfig {
    /// Jobs allowed to run at the same time.
    pub workers: usize,
    /// Provider calls per invocation, first try included.
    pub provider_tries: u32,
    pub retry_base_delay: Duration,
    /// The sweeper leaves a user alone once `attempts` reaches this.
    pub max_attempts: i32,
    /// `Duration::ZERO` disables the sweeper.
    pub sweep_interval: Duration,
    pub stale_after: Duration,
}

impl Default for EmbeddingJobConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            provider_tries: 3,
            retry_base_delay: Duration::from_millis(250),
            max_attempts: 5,
            sweep_interval: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub gemini: GeminiConfig,
    pub embedding: EmbeddingJobConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "users-embed".into()),
            audience: std::env::var("JWT_AUDIENCE")
                .unwrap_or_else(|_| "users-embed-clients".into()),
        };

        let defaults = GeminiConfig::default();
        let http_timeout = env_parse::<u64>("GEMINI_HTTP_TIMEOUT_MS")?.map(Duration::from_millis);
        let gemini = GeminiConfig {
            api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            base_url: std::env::var("GEMINI_API_BASE_URL").unwrap_or(defaults.base_url),
            embedding_model: std::env::var("GEMINI_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            generation_model: std::env::var("GEMINI_GENERATION_MODEL")
                .unwrap_or(defaults.generation_model),
            embedding_dims: defaults.embedding_dims,
            embed_timeout: http_timeout.unwrap_or(defaults.embed_timeout),
            generate_timeout: http_timeout.unwrap_or(defaults.generate_timeout),
            temperature: env_parse("GEMINI_TEMPERATURE")?.unwrap_or(defaults.temperature),
        };

        let defaults = EmbeddingJobConfig::default();
        let embedding = EmbeddingJobConfig {
            workers: env_parse("EMBEDDING_WORKERS")?.unwrap_or(defaults.workers),
            provider_tries: env_parse("EMBEDDING_PROVIDER_RETRIES")?
                .unwrap_or(defaults.provider_tries),
            retry_base_delay: env_parse("EMBEDDING_RETRY_BASE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            max_attempts: env_parse("EMBEDDING_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            sweep_interval: env_parse("EMBEDDING_SWEEP_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            stale_after: env_parse("EMBEDDING_STALE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_after),
        };

        let config = Self {
            database_url,
            jwt,
            gemini,
            embedding,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked before the first request.
    /// A missing Gemini key is allowed: provider calls fail individually.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.jwt.secret.is_empty(), "JWT_SECRET must not be empty");

        let g = &self.gemini;
        anyhow::ensure!(
            g.base_url.starts_with("http://") || g.base_url.starts_with("https://"),
            "GEMINI_API_BASE_URL must be an http(s) url, got {}",
            g.base_url
        );
        anyhow::ensure!(!g.embedding_model.is_empty(), "GEMINI_EMBEDDING_MODEL is empty");
        anyhow::ensure!(!g.generation_model.is_empty(), "GEMINI_GENERATION_MODEL is empty");
        anyhow::ensure!(g.embedding_dims > 0, "embedding dimensionality must be positive");
        anyhow::ensure!(
            !g.embed_timeout.is_zero() && !g.generate_timeout.is_zero(),
            "GEMINI_HTTP_TIMEOUT_MS must be positive"
        );

        let e = &self.embedding;
        anyhow::ensure!(e.workers > 0, "EMBEDDING_WORKERS must be at least 1");
        anyhow::ensure!(e.provider_tries > 0, "EMBEDDING_PROVIDER_RETRIES must be at least 1");
        anyhow::ensure!(e.max_attempts > 0, "EMBEDDING_MAX_ATTEMPTS must be at least 1");
        Ok(())
    }
}

/// `Ok(None)` when `key` is unset; an error naming `key` when it is set but
/// does not parse.
fn env_parse<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => parse_value(key, &v).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key} has invalid value {raw:?}: {e}"))
}
