use axum::http::StatusCode;
use thiserror::Error;

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failures shared by the embedding pipeline and the endpoints that call the
/// LLM provider.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Bad caller input (missing id, empty text).
    #[error("{0}")]
    Validation(String),

    /// Target record is gone.
    #[error("{0}")]
    NotFound(String),

    /// Missing provider credential or similar.
    #[error("{0}")]
    Configuration(String),

    /// Provider answered with something unusable, or could not be reached.
    /// `transient` marks errors worth retrying.
    #[error("{message}")]
    Upstream { message: String, transient: bool },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            transient: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { transient: true, .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Configuration(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<ServiceError> for (StatusCode, String) {
    fn from(e: ServiceError) -> Self {
        (e.status_code(), e.to_string())
    }
}
