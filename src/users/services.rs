use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, instrument};

use super::dto::{AskResponse, AskSource, CreateUserRequest, UpdateUserRequest};
use super::repo_types::Role;
use crate::embedding::similarity::top_k;
use crate::error::{ServiceError, ServiceResult};
use crate::state::AppState;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const DEFAULT_TOP_K: usize = 5;
pub const MAX_TOP_K: usize = 20;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Checked fields of a new user; the password is still plain text.
#[derive(Debug)]
pub struct ValidNewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

fn validate_username(username: &str) -> ServiceResult<String> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ServiceError::Validation("Username is required".into()));
    }
    Ok(username.to_string())
}

fn validate_email(email: &str) -> ServiceResult<String> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(ServiceError::Validation("Invalid email".into()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> ServiceResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_role(role: &str) -> ServiceResult<Role> {
    role.parse::<Role>()
        .map_err(|_| ServiceError::Validation("Role must be one of: user, admin".into()))
}

pub fn validate_new_user(req: CreateUserRequest) -> ServiceResult<ValidNewUser> {
    let username = validate_username(&req.username)?;
    let email = validate_email(&req.email)?;
    validate_password(&req.password)?;
    let role = match req.role.as_deref() {
        Some(r) => validate_role(r)?,
        None => Role::default(),
    };
    Ok(ValidNewUser {
        username,
        email,
        password: req.password,
        role,
    })
}

/// Checked partial update; `password` is still plain text.
#[derive(Debug, Default)]
pub struct ValidUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub role: Option<Role>,
}

pub fn validate_update(req: UpdateUserRequest) -> ServiceResult<ValidUpdate> {
    let password = match req.password {
        Some(p) => {
            validate_password(&p)?;
            Some(p)
        }
        None => None,
    };
    Ok(ValidUpdate {
        username: req.username.as_deref().map(validate_username).transpose()?,
        email: req.email.as_deref().map(validate_email).transpose()?,
        password,
        role: req.role.as_deref().map(validate_role).transpose()?,
    })
}

fn build_ask_prompt(question: &str, sources: &[AskSource]) -> String {
    let context = if sources.is_empty() {
        "(no matching users)".to_string()
    } else {
        sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "{}. Username: {} | Email: {} | Role: {} | Similarity: {:.3}",
                    i + 1,
                    s.username,
                    s.email,
                    s.role,
                    s.score
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    [
        "You are an assistant answering questions about the users of this application.",
        "Answer only from the user profiles listed in the context. If the context does not",
        "contain the answer, say that you do not know.",
        "",
        "Context:",
        context.as_str(),
        "",
        format!("Question: {question}").as_str(),
        "Answer:",
    ]
    .join("\n")
}

/// Retrieval-augmented answer: embed the question, rank READY user
/// embeddings by cosine similarity and let the generator answer from the
/// best matches.
#[instrument(skip(st))]
pub async fn answer_question(
    st: &AppState,
    question: &str,
    k: Option<usize>,
) -> ServiceResult<AskResponse> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ServiceError::Validation("Question is required".into()));
    }
    let k = k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K);

    let query = st.embedder.embed_text(question).await?;
    let candidates = st.users.list_ready_embeddings().await?;
    let ranked = top_k(&query, candidates.iter().map(|c| c.vector.as_slice()), k);
    debug!(candidates = candidates.len(), matched = ranked.len(), "ranked users");

    let sources: Vec<AskSource> = ranked
        .into_iter()
        .map(|(i, score)| {
            let c = &candidates[i];
            AskSource {
                id: c.id,
                username: c.username.clone(),
                email: c.email.clone(),
                role: c.role.clone(),
                score,
            }
        })
        .collect();

    let prompt = build_ask_prompt(question, &sources);
    let answer = st.generator.generate_text(&prompt).await?;
    Ok(AskResponse { answer, sources })
}
