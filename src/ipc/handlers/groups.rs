use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use super::users::fetch_user;
use super::{
    check_len, group_exists, is_constraint_violation, parse_params, require_db, respond,
    HandlerError,
};
use crate::ipc::types::{AppState, Request};

const GROUP_COLUMNS: &str = "g.id, g.description, g.user_id, u.first_name, u.last_name,
     (SELECT COUNT(*) FROM group_details gd WHERE gd.group_id = g.id) AS student_count";

fn map_group_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let id: i64 = r.get(0)?;
    let description: String = r.get(1)?;
    let user_id: i64 = r.get(2)?;
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    let student_count: i64 = r.get(5)?;
    Ok(json!({
        "id": id,
        "description": description,
        "userId": user_id,
        "teacher": format!("{} {}", first, last),
        "studentCount": student_count,
    }))
}

fn fetch_group(conn: &Connection, group_id: i64) -> Result<Option<serde_json::Value>, HandlerError> {
    conn.query_row(
        &format!(
            "SELECT {} FROM groups g JOIN users u ON u.id = g.user_id WHERE g.id = ?",
            GROUP_COLUMNS
        ),
        [group_id],
        map_group_row,
    )
    .optional()
    .map_err(|e| HandlerError::db("db_query_failed", e))
}

fn description_taken(
    conn: &Connection,
    description: &str,
    except_id: Option<i64>,
) -> Result<bool, HandlerError> {
    let taken: Option<i64> = match except_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM groups WHERE description = ? AND id != ?",
                (description, id),
                |r| r.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT 1 FROM groups WHERE description = ?",
                [description],
                |r| r.get(0),
            )
            .optional(),
    }
    .map_err(|e| HandlerError::db("db_query_failed", e))?;
    Ok(taken.is_some())
}

fn validate_group_fields(
    conn: &Connection,
    description: &str,
    teacher_id: i64,
    except_group: Option<i64>,
) -> Result<(), HandlerError> {
    check_len("description", description, 3, 100)?;
    let teacher = fetch_user(conn, teacher_id)?
        .ok_or_else(|| HandlerError::NotFound("teacher not found".to_string()))?;
    if !teacher.is_teacher {
        return Err(HandlerError::Validation(
            "the selected user is not a teacher".to_string(),
        ));
    }
    if description_taken(conn, description, except_group)? {
        return Err(HandlerError::Validation(
            "group description already in use".to_string(),
        ));
    }
    Ok(())
}

fn handle_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerError> {
    let conn = require_db(state)?;

    // Enrollment counts via a correlated subquery to avoid double-counting
    // from joins.
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM groups g JOIN users u ON u.id = g.user_id ORDER BY g.description",
            GROUP_COLUMNS
        ))
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    let groups = stmt
        .query_map([], map_group_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    Ok(json!({ "groups": groups }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GetParams {
    group_id: i64,
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: GetParams = parse_params(req)?;
    let conn = require_db(state)?;
    let group = fetch_group(conn, params.group_id)?
        .ok_or_else(|| HandlerError::NotFound("group not found".to_string()))?;
    Ok(json!({ "group": group }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    description: String,
    user_id: i64,
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: CreateParams = parse_params(req)?;
    let conn = require_db(state)?;

    let description = params.description.trim().to_string();
    validate_group_fields(conn, &description, params.user_id, None)?;

    if let Err(e) = conn.execute(
        "INSERT INTO groups(description, user_id) VALUES(?, ?)",
        (&description, params.user_id),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerError::Validation(
                "group description already in use".to_string(),
            ));
        }
        return Err(HandlerError::db("db_insert_failed", e));
    }
    let group_id = conn.last_insert_rowid();
    tracing::debug!(group_id, "group created");

    let group = fetch_group(conn, group_id)?
        .ok_or_else(|| HandlerError::NotFound("group not found".to_string()))?;
    Ok(json!({ "group": group }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    group_id: i64,
    description: String,
    user_id: i64,
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: UpdateParams = parse_params(req)?;
    let conn = require_db(state)?;

    if !group_exists(conn, params.group_id)? {
        return Err(HandlerError::NotFound("group not found".to_string()));
    }
    let description = params.description.trim().to_string();
    validate_group_fields(conn, &description, params.user_id, Some(params.group_id))?;

    if let Err(e) = conn.execute(
        "UPDATE groups SET description = ?, user_id = ? WHERE id = ?",
        (&description, params.user_id, params.group_id),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerError::Validation(
                "group description already in use".to_string(),
            ));
        }
        return Err(HandlerError::db("db_update_failed", e));
    }

    let group = fetch_group(conn, params.group_id)?
        .ok_or_else(|| HandlerError::NotFound("group not found".to_string()))?;
    Ok(json!({ "group": group }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeleteParams {
    group_id: i64,
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: DeleteParams = parse_params(req)?;
    let conn = require_db(state)?;

    if !group_exists(conn, params.group_id)? {
        return Err(HandlerError::NotFound("group not found".to_string()));
    }

    // No cascade: a group with enrollments cannot be deleted.
    let enrollments: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM group_details WHERE group_id = ?",
            [params.group_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    if enrollments > 0 {
        return Err(HandlerError::Validation(
            "group still has enrolled students; remove the enrollments first".to_string(),
        ));
    }

    conn.execute("DELETE FROM groups WHERE id = ?", [params.group_id])
        .map_err(|e| HandlerError::db("db_delete_failed", e))?;
    tracing::debug!(group_id = params.group_id, "group deleted");
    Ok(json!({ "deleted": true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ForUserParams {
    user_id: i64,
}

// Client-app dashboard: groups the user teaches plus groups the user is
// enrolled in. An unknown user yields two empty lists, not an error.
fn handle_for_user(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: ForUserParams = parse_params(req)?;
    let conn = require_db(state)?;

    let mut taught_stmt = conn
        .prepare(&format!(
            "SELECT {} FROM groups g JOIN users u ON u.id = g.user_id WHERE g.user_id = ? ORDER BY g.id",
            GROUP_COLUMNS
        ))
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    let my_groups = taught_stmt
        .query_map([params.user_id], map_group_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerError::db("db_query_failed", e))?;

    let mut enrolled_stmt = conn
        .prepare(&format!(
            "SELECT {} FROM group_details d
             JOIN groups g ON g.id = d.group_id
             JOIN users u ON u.id = g.user_id
             WHERE d.user_id = ?
             ORDER BY d.id",
            GROUP_COLUMNS
        ))
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    let my_subjects = enrolled_stmt
        .query_map([params.user_id], map_group_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerError::db("db_query_failed", e))?;

    Ok(json!({ "myGroups": my_groups, "mySubjects": my_subjects }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DetailsParams {
    group_id: i64,
}

fn handle_details(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: DetailsParams = parse_params(req)?;
    let conn = require_db(state)?;

    if !group_exists(conn, params.group_id)? {
        return Err(HandlerError::NotFound("group not found".to_string()));
    }

    let mut stmt = conn
        .prepare(
            "SELECT gd.id, gd.user_id, u.first_name, u.last_name
             FROM group_details gd
             JOIN users u ON u.id = gd.user_id
             WHERE gd.group_id = ?
             ORDER BY gd.id",
        )
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    let details = stmt
        .query_map([params.group_id], |r| {
            let id: i64 = r.get(0)?;
            let user_id: i64 = r.get(1)?;
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok(json!({
                "groupDetailId": id,
                "userId": user_id,
                "fullName": format!("{} {}", first, last),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerError::db("db_query_failed", e))?;

    Ok(json!({ "details": details }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "groups.list" => handle_list(state, req),
        "groups.get" => handle_get(state, req),
        "groups.create" => handle_create(state, req),
        "groups.update" => handle_update(state, req),
        "groups.delete" => handle_delete(state, req),
        "groups.forUser" => handle_for_user(state, req),
        "groups.details" => handle_details(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
