use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => anyhow::bail!("unknown role {other:?}"),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle: `UNSET -> PROCESSING -> READY | FAILED`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmbeddingStatus {
    #[default]
    Unset,
    Processing,
    Ready,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Unset => "UNSET",
            EmbeddingStatus::Processing => "PROCESSING",
            EmbeddingStatus::Ready => "READY",
            EmbeddingStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for EmbeddingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UNSET" => Ok(EmbeddingStatus::Unset),
            "PROCESSING" => Ok(EmbeddingStatus::Processing),
            "READY" => Ok(EmbeddingStatus::Ready),
            "FAILED" => Ok(EmbeddingStatus::Failed),
            other => anyhow::bail!("unknown embedding status {other:?}"),
        }
    }
}

/// Embedding sub-record of a user.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingState {
    pub status: EmbeddingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,
    pub dims: Option<i32>,
    pub attempts: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_attempt_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

/// User record as the application sees it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String, // argon2, never leaves the server
    pub embedding: EmbeddingState,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row shape of the `users` table.
#[derive(Debug, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
    pub embedding_status: String,
    pub embedding_vector: Option<Vec<f32>>,
    pub embedding_dims: Option<i32>,
    pub embedding_attempts: i32,
    pub embedding_last_attempt_at: Option<OffsetDateTime>,
    pub embedding_updated_at: Option<OffsetDateTime>,
    pub embedding_last_error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            username: r.username,
            email: r.email,
            role: r.role.parse()?,
            password_hash: r.password_hash,
            embedding: EmbeddingState {
                status: r.embedding_status.parse()?,
                vector: r.embedding_vector,
                dims: r.embedding_dims,
                attempts: r.embedding_attempts,
                last_attempt_at: r.embedding_last_attempt_at,
                updated_at: r.embedding_updated_at,
                last_error: r.embedding_last_error,
            },
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
}

/// Partial profile update; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub password_hash: Option<String>,
}

/// Projection loaded by the embedding runner.
#[derive(Debug, Clone)]
pub struct EmbeddingProfile {
    pub username: String,
    pub email: String,
    pub role: Option<Role>,
    pub status: EmbeddingStatus,
}

#[derive(Debug, FromRow)]
pub struct EmbeddingProfileRow {
    pub username: String,
    pub email: String,
    pub role: Option<String>,
    pub embedding_status: String,
}

impl TryFrom<EmbeddingProfileRow> for EmbeddingProfile {
    type Error = anyhow::Error;

    fn try_from(r: EmbeddingProfileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            username: r.username,
            email: r.email,
            role: r.role.as_deref().map(str::parse).transpose()?,
            status: r.embedding_status.parse()?,
        })
    }
}

/// A user with a READY vector, as used for similarity search.
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddedUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text_column() {
        for s in [
            EmbeddingStatus::Unset,
            EmbeddingStatus::Processing,
            EmbeddingStatus::Ready,
            EmbeddingStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<EmbeddingStatus>().unwrap(), s);
        }
        assert!("ready".parse::<EmbeddingStatus>().is_err());
    }

    #[test]
    fn role_parses_lowercase_only() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" user ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn embedding_state_serializes_camel_case() {
        let state = EmbeddingState {
            status: EmbeddingStatus::Failed,
            attempts: 2,
            last_error: Some("boom".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["attempts"], 2);
        assert_eq!(json["lastError"], "boom");
        assert!(json["lastAttemptAt"].is_null());
    }
}
