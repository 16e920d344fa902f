use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::dto::{
    AskRequest, AskResponse, CreateUserRequest, MeResponse, MessageResponse, PublicUser,
    UpdateUserRequest, UserResponse,
};
use super::repo_types::{NewUser, ProfileUpdate};
use super::services::{answer_question, validate_new_user, validate_update};
use crate::{auth::password::hash_password, auth::AuthUser, state::AppState};

type ApiError = (StatusCode, String);

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users/auth/cookie/me", get(get_me))
        .route("/users/auth/ai/ask", post(ask_users))
}

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|c| c.downcast_ref::<sqlx::Error>())
        .filter_map(|e| e.as_database_error())
        .any(|db| db.code().as_deref() == Some("23505"))
}

#[instrument(skip(state))]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.users.list().await.map_err(|e| {
        error!(error = %e, "list users failed");
        internal(e)
    })?;
    Ok(Json(users.into_iter().map(UserResponse::summary).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    match state.users.find_by_id(id).await {
        Ok(Some(user)) => Ok(Json(user.into())),
        Ok(None) => Err((StatusCode::NOT_FOUND, "User not found".into())),
        Err(e) => {
            error!(error = %e, %id, "get user failed");
            Err(internal(e))
        }
    }
}

/// Creates the user and queues its profile embedding. The response does not
/// wait for the embedding.
#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, HeaderMap, Json<UserResponse>), ApiError> {
    let input = validate_new_user(payload).map_err(|e| {
        warn!(error = %e, "invalid create user payload");
        ApiError::from(e)
    })?;

    match state.users.find_by_email(&input.email).await {
        Ok(Some(_)) => {
            warn!(email = %input.email, "email already registered");
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "email lookup failed");
            return Err(internal(e));
        }
    }

    let password_hash = hash_password(&input.password).map_err(internal)?;
    let user = match state
        .users
        .create(NewUser {
            username: input.username,
            email: input.email,
            role: input.role,
            password_hash,
        })
        .await
    {
        Ok(u) => u,
        Err(e) if is_unique_violation(&e) => {
            return Err((StatusCode::CONFLICT, "Email already registered".into()));
        }
        Err(e) => {
            error!(error = %e, "create user failed");
            return Err(internal(e));
        }
    };

    state.embeddings.schedule_embedding(user.id);
    info!(user_id = %user.id, created_by = %caller, "user created");

    let mut headers = HeaderMap::new();
    let location = HeaderValue::from_str(&format!("/api/v2/users/{}", user.id)).map_err(internal)?;
    headers.insert(header::LOCATION, location);

    Ok((StatusCode::CREATED, headers, Json(user.into())))
}

/// Profile edits leave the embedding sub-record untouched.
#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let input = validate_update(payload)?;

    if let Some(email) = &input.email {
        match state.users.find_by_email(email).await {
            Ok(Some(other)) if other.id != id => {
                return Err((StatusCode::CONFLICT, "Email already registered".into()));
            }
            Ok(_) => {}
            Err(e) => return Err(internal(e)),
        }
    }

    let password_hash = match &input.password {
        Some(p) => Some(hash_password(p).map_err(internal)?),
        None => None,
    };

    let update = ProfileUpdate {
        username: input.username,
        email: input.email,
        role: input.role,
        password_hash,
    };
    match state.users.update_profile(id, update).await {
        Ok(Some(user)) => {
            info!(user_id = %id, updated_by = %caller, "user updated");
            Ok(Json(user.into()))
        }
        Ok(None) => Err((StatusCode::NOT_FOUND, "User not found".into())),
        Err(e) if is_unique_violation(&e) => {
            Err((StatusCode::CONFLICT, "Email already registered".into()))
        }
        Err(e) => {
            error!(error = %e, %id, "update user failed");
            Err(internal(e))
        }
    }
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    match state.users.delete(id).await {
        Ok(true) => {
            info!(user_id = %id, deleted_by = %caller, "user deleted");
            Ok(Json(MessageResponse {
                message: format!("User with ID {id} deleted"),
            }))
        }
        Ok(false) => Err((StatusCode::NOT_FOUND, "User not found".into())),
        Err(e) => {
            error!(error = %e, %id, "delete user failed");
            Err(internal(e))
        }
    }
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<MeResponse>, ApiError> {
    let user = match state.users.find_by_id(user_id).await {
        Ok(Some(u)) => u,
        Ok(None) => return Err((StatusCode::UNAUTHORIZED, "Unauthenticated".into())),
        Err(e) => {
            error!(error = %e, %user_id, "load current user failed");
            return Err(internal(e));
        }
    };

    Ok(Json(MeResponse {
        error: false,
        user: PublicUser {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
        },
    }))
}

#[instrument(skip(state, payload))]
pub async fn ask_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    answer_question(&state, &payload.question, payload.top_k)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(error = %e, "ask failed");
            ApiError::from(e)
        })
}
