use serde::Deserialize;
use serde_json::json;

use super::users::{fetch_user_by_name, user_json};
use super::{
    parse_params, require_db, require_identity, require_mailer, respond, HandlerError,
};
use crate::auth::{temp_password, MIN_PASSWORD_LEN};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LoginParams {
    email: String,
    password: String,
}

fn handle_login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: LoginParams = parse_params(req)?;
    let conn = require_db(state)?;
    let identity = require_identity(state)?;

    let verified = identity.verify(&params.email, &params.password)?;

    // One message for unknown email and wrong password alike.
    let user = fetch_user_by_name(conn, &params.email)?
        .ok_or(HandlerError::InvalidCredentials)?;
    let roles = identity.roles_of(&params.email)?;

    Ok(json!({
        "user": user_json(&user),
        "roles": roles,
        "mustChangePassword": verified.must_change_password,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ResetParams {
    email: String,
}

// Quietly answers ok for unknown addresses: observed behavior, and it
// keeps the endpoint from confirming which emails have accounts.
fn handle_reset_password(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerError> {
    let params: ResetParams = parse_params(req)?;
    let conn = require_db(state)?;
    let identity = require_identity(state)?;
    let mailer = require_mailer(state)?;

    if !identity.account_exists(&params.email)? {
        return Ok(json!({ "ok": true }));
    }
    let Some(user) = fetch_user_by_name(conn, &params.email)? else {
        return Ok(json!({ "ok": true }));
    };

    let temp = temp_password();
    identity.replace_password(&params.email, &temp, true)?;

    let subject = "Notas Password Recovery";
    let body = format!(
        "<h1>Notas Password Recovery</h1>\
         <p>Your temporary password is: <strong>{}</strong></p>\
         <p>You will be asked to change it on your next sign in.</p>",
        temp
    );
    // Mail failure propagates to the caller; the credential is already
    // replaced at this point, so a retry issues a fresh one.
    mailer.send(&[params.email.clone()], subject, &body)?;

    tracing::debug!(user_id = user.id, "password reset issued");
    Ok(json!({ "ok": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChangePasswordParams {
    email: String,
    current_password: String,
    new_password: String,
}

fn handle_change_password(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerError> {
    let params: ChangePasswordParams = parse_params(req)?;
    let identity = require_identity(state)?;

    identity.verify(&params.email, &params.current_password)?;
    if params.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(HandlerError::Validation(format!(
            "the password must contain at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    identity.replace_password(&params.email, &params.new_password, false)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => handle_login(state, req),
        "auth.resetPassword" => handle_reset_password(state, req),
        "auth.changePassword" => handle_change_password(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
