use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;

use super::{parse_params, respond, HandlerError};
use crate::auth::{IdentityProvider, SqliteIdentity, ROLE_ADMIN, ROLE_STUDENT, ROLE_TEACHER};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use crate::mail::SpoolMailer;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SelectWorkspaceParams {
    path: PathBuf,
    #[serde(default)]
    admin_email: Option<String>,
    #[serde(default)]
    admin_password: Option<String>,
}

fn handle_workspace_select(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerError> {
    let params: SelectWorkspaceParams = parse_params(req)?;

    let conn = db::open_db(&params.path).map_err(|e| HandlerError::Db {
        code: "db_open_failed",
        message: format!("{e:?}"),
    })?;
    let identity = SqliteIdentity::open(&params.path).map_err(|e| HandlerError::Db {
        code: "db_open_failed",
        message: format!("{e:?}"),
    })?;
    let mailer = SpoolMailer::open(&params.path).map_err(|e| HandlerError::Io(format!("{e:?}")))?;

    for role in [ROLE_ADMIN, ROLE_TEACHER, ROLE_STUDENT] {
        identity.ensure_role(role)?;
    }

    // Superuser seed: create-if-absent when credentials are supplied.
    if let (Some(email), Some(password)) = (&params.admin_email, &params.admin_password) {
        if !identity.account_exists(email)? {
            identity.create_account(email, password)?;
            identity.assign_role(email, ROLE_ADMIN)?;
        }
    }

    tracing::info!(workspace = %params.path.display(), "workspace selected");

    state.workspace = Some(params.path.clone());
    state.db = Some(conn);
    state.identity = Some(Box::new(identity));
    state.mailer = Some(Box::new(mailer));

    Ok(json!({ "workspacePath": params.path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => {
            let result = handle_workspace_select(state, req);
            Some(respond(&req.id, result))
        }
        _ => None,
    }
}
