use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::json;

use super::users::fetch_user;
use super::{
    group_exists, is_constraint_violation, parse_params, require_db, respond, HandlerError,
};
use crate::ipc::types::{AppState, Request};

const ALREADY_ENROLLED: &str = "student already enrolled in this group";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AddParams {
    group_id: i64,
    user_id: i64,
}

fn already_enrolled(group_detail_id: Option<i64>) -> serde_json::Value {
    json!({
        "enrolled": false,
        "alreadyEnrolled": true,
        "groupDetailId": group_detail_id,
        "message": ALREADY_ENROLLED,
    })
}

fn handle_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: AddParams = parse_params(req)?;
    let conn = require_db(state)?;

    if !group_exists(conn, params.group_id)? {
        return Err(HandlerError::NotFound("group not found".to_string()));
    }
    let user = fetch_user(conn, params.user_id)?
        .ok_or_else(|| HandlerError::NotFound("user not found".to_string()))?;
    if !user.is_student {
        return Err(HandlerError::Validation(
            "the selected user is not a student".to_string(),
        ));
    }

    // Duplicate enrollment surfaces as a validation message in an OK
    // envelope, not as a hard error.
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM group_details WHERE group_id = ? AND user_id = ?",
            (params.group_id, params.user_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    if existing.is_some() {
        return Ok(already_enrolled(existing));
    }

    if let Err(e) = conn.execute(
        "INSERT INTO group_details(group_id, user_id) VALUES(?, ?)",
        (params.group_id, params.user_id),
    ) {
        // The unique index closes the check-then-insert race; a conflict
        // here means another caller enrolled the pair first.
        if is_constraint_violation(&e) {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM group_details WHERE group_id = ? AND user_id = ?",
                    (params.group_id, params.user_id),
                    |r| r.get(0),
                )
                .optional()
                .map_err(|e| HandlerError::db("db_query_failed", e))?;
            return Ok(already_enrolled(existing));
        }
        return Err(HandlerError::db("db_insert_failed", e));
    }

    let group_detail_id = conn.last_insert_rowid();
    tracing::debug!(
        group_id = params.group_id,
        user_id = params.user_id,
        group_detail_id,
        "student enrolled"
    );
    Ok(json!({ "enrolled": true, "groupDetailId": group_detail_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RemoveParams {
    group_detail_id: i64,
}

fn handle_remove(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: RemoveParams = parse_params(req)?;
    let conn = require_db(state)?;

    let group_id: Option<i64> = conn
        .query_row(
            "SELECT group_id FROM group_details WHERE id = ?",
            [params.group_detail_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    let Some(group_id) = group_id else {
        return Err(HandlerError::NotFound("group detail not found".to_string()));
    };

    // Unenrollment is the explicit cascading call for the enrollment's
    // notes; both deletes commit together or not at all.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerError::db("db_tx_failed", e))?;
    tx.execute(
        "DELETE FROM notes WHERE group_detail_id = ?",
        [params.group_detail_id],
    )
    .map_err(|e| HandlerError::db("db_delete_failed", e))?;
    tx.execute(
        "DELETE FROM group_details WHERE id = ?",
        [params.group_detail_id],
    )
    .map_err(|e| HandlerError::db("db_delete_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerError::db("db_commit_failed", e))?;

    tracing::debug!(
        group_detail_id = params.group_detail_id,
        group_id,
        "student unenrolled"
    );
    Ok(json!({ "removed": true, "groupId": group_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "enrollment.add" => handle_add(state, req),
        "enrollment.remove" => handle_remove(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
