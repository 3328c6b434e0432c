pub mod auth;
pub mod core;
pub mod enrollment;
pub mod grades;
pub mod grading;
pub mod groups;
pub mod photos;
pub mod users;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;

use super::error::{err, ok};
use super::types::{AppState, Request};
use crate::auth::{AuthError, IdentityProvider};
use crate::calc::CalcError;
use crate::mail::{MailError, MailSender};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    BadParams(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("{message}")]
    Db { code: &'static str, message: String },
    #[error("{0}")]
    Io(String),
    #[error("{0}")]
    Mail(String),
    #[error("select a workspace first")]
    NoWorkspace,
}

impl HandlerError {
    pub fn code(&self) -> &'static str {
        match self {
            HandlerError::BadParams(_) => "bad_params",
            HandlerError::Validation(_) => "validation",
            HandlerError::NotFound(_) => "not_found",
            HandlerError::InvalidCredentials => "invalid_credentials",
            HandlerError::Db { code, .. } => code,
            HandlerError::Io(_) => "io_failed",
            HandlerError::Mail(_) => "mail_failed",
            HandlerError::NoWorkspace => "no_workspace",
        }
    }

    pub fn db(code: &'static str, e: rusqlite::Error) -> Self {
        HandlerError::Db {
            code,
            message: e.to_string(),
        }
    }

    pub fn response(&self, id: &str) -> serde_json::Value {
        err(id, self.code(), self.to_string(), None)
    }
}

impl From<AuthError> for HandlerError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotFound => HandlerError::NotFound("account not found".to_string()),
            AuthError::AlreadyExists => {
                HandlerError::Validation("account already exists".to_string())
            }
            AuthError::InvalidCredentials => HandlerError::InvalidCredentials,
            AuthError::Store(message) => HandlerError::Db {
                code: "identity_failed",
                message,
            },
        }
    }
}

impl From<MailError> for HandlerError {
    fn from(e: MailError) -> Self {
        HandlerError::Mail(e.to_string())
    }
}

impl From<CalcError> for HandlerError {
    fn from(e: CalcError) -> Self {
        match e {
            CalcError::NotFound(message) => HandlerError::NotFound(message),
            CalcError::Query(message) => HandlerError::Db {
                code: "db_query_failed",
                message,
            },
        }
    }
}

pub fn respond(id: &str, result: Result<serde_json::Value, HandlerError>) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

/// Typed parameter parsing at the boundary: a handler never touches the
/// store before its params deserialize into the expected shape.
pub fn parse_params<T: DeserializeOwned>(req: &Request) -> Result<T, HandlerError> {
    serde_json::from_value(req.params.clone())
        .map_err(|e| HandlerError::BadParams(format!("invalid params: {}", e)))
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerError> {
    state.db.as_ref().ok_or(HandlerError::NoWorkspace)
}

pub fn require_identity(state: &AppState) -> Result<&dyn IdentityProvider, HandlerError> {
    state.identity.as_deref().ok_or(HandlerError::NoWorkspace)
}

pub fn require_mailer(state: &AppState) -> Result<&dyn MailSender, HandlerError> {
    state.mailer.as_deref().ok_or(HandlerError::NoWorkspace)
}

pub fn require_workspace(state: &AppState) -> Result<&Path, HandlerError> {
    state
        .workspace
        .as_deref()
        .ok_or(HandlerError::NoWorkspace)
}

pub fn group_exists(conn: &Connection, group_id: i64) -> Result<bool, HandlerError> {
    conn.query_row("SELECT 1 FROM groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerError::db("db_query_failed", e))
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

pub fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), HandlerError> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(HandlerError::Validation(format!(
            "the field {} must contain between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}
