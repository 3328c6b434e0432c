use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

use super::{
    check_len, is_constraint_violation, parse_params, require_db, require_identity, respond,
    HandlerError,
};
use crate::auth::{AuthError, ROLE_STUDENT, ROLE_TEACHER};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub address: String,
    pub photo: Option<String>,
    pub is_student: bool,
    pub is_teacher: bool,
}

pub fn fetch_user(conn: &Connection, user_id: i64) -> Result<Option<UserRow>, HandlerError> {
    conn.query_row(
        "SELECT id, user_name, first_name, last_name, phone, address, photo, is_student, is_teacher
         FROM users
         WHERE id = ?",
        [user_id],
        map_user_row,
    )
    .optional()
    .map_err(|e| HandlerError::db("db_query_failed", e))
}

pub fn fetch_user_by_name(
    conn: &Connection,
    user_name: &str,
) -> Result<Option<UserRow>, HandlerError> {
    conn.query_row(
        "SELECT id, user_name, first_name, last_name, phone, address, photo, is_student, is_teacher
         FROM users
         WHERE user_name = ?",
        [user_name],
        map_user_row,
    )
    .optional()
    .map_err(|e| HandlerError::db("db_query_failed", e))
}

fn map_user_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: r.get(0)?,
        user_name: r.get(1)?,
        first_name: r.get(2)?,
        last_name: r.get(3)?,
        phone: r.get(4)?,
        address: r.get(5)?,
        photo: r.get(6)?,
        is_student: r.get::<_, i64>(7)? != 0,
        is_teacher: r.get::<_, i64>(8)? != 0,
    })
}

pub fn user_json(user: &UserRow) -> serde_json::Value {
    json!({
        "id": user.id,
        "userName": user.user_name,
        "firstName": user.first_name,
        "lastName": user.last_name,
        "fullName": format!("{} {}", user.first_name, user.last_name),
        "phone": user.phone,
        "address": user.address,
        "photo": user.photo,
        "isStudent": user.is_student,
        "isTeacher": user.is_teacher,
    })
}

fn validate_user_fields(
    user_name: &str,
    first_name: &str,
    last_name: &str,
    phone: &str,
    address: &str,
) -> Result<(), HandlerError> {
    check_len("userName", user_name, 7, 100)?;
    if !user_name.contains('@') {
        return Err(HandlerError::Validation(
            "the field userName must be an e-mail address".to_string(),
        ));
    }
    check_len("firstName", first_name, 2, 50)?;
    check_len("lastName", last_name, 2, 50)?;
    check_len("phone", phone, 7, 20)?;
    check_len("address", address, 10, 100)?;
    Ok(())
}

fn user_name_taken(
    conn: &Connection,
    user_name: &str,
    except_id: Option<i64>,
) -> Result<bool, HandlerError> {
    let taken: Option<i64> = match except_id {
        Some(id) => conn
            .query_row(
                "SELECT 1 FROM users WHERE user_name = ? AND id != ?",
                (user_name, id),
                |r| r.get(0),
            )
            .optional(),
        None => conn
            .query_row("SELECT 1 FROM users WHERE user_name = ?", [user_name], |r| {
                r.get(0)
            })
            .optional(),
    }
    .map_err(|e| HandlerError::db("db_query_failed", e))?;
    Ok(taken.is_some())
}

fn handle_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerError> {
    let conn = require_db(state)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, user_name, first_name, last_name, phone, address, photo, is_student, is_teacher
             FROM users
             ORDER BY id",
        )
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    let users = stmt
        .query_map([], map_user_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerError::db("db_query_failed", e))?;

    let users: Vec<serde_json::Value> = users.iter().map(user_json).collect();
    Ok(json!({ "users": users }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GetParams {
    user_id: i64,
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: GetParams = parse_params(req)?;
    let conn = require_db(state)?;
    let user = fetch_user(conn, params.user_id)?
        .ok_or_else(|| HandlerError::NotFound("user not found".to_string()))?;
    Ok(json!({ "user": user_json(&user) }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CreateParams {
    user_name: String,
    first_name: String,
    last_name: String,
    phone: String,
    address: String,
    #[serde(default)]
    photo: Option<String>,
    is_student: bool,
    is_teacher: bool,
    #[serde(default)]
    password: Option<String>,
}

fn create_user(state: &mut AppState, params: CreateParams) -> Result<serde_json::Value, HandlerError> {
    let conn = require_db(state)?;
    let identity = require_identity(state)?;

    let user_name = params.user_name.trim().to_string();
    validate_user_fields(
        &user_name,
        &params.first_name,
        &params.last_name,
        &params.phone,
        &params.address,
    )?;
    if user_name_taken(conn, &user_name, None)? {
        return Err(HandlerError::Validation(
            "user name already registered".to_string(),
        ));
    }
    if identity.account_exists(&user_name)? {
        return Err(HandlerError::Validation(
            "an account with this e-mail already exists".to_string(),
        ));
    }

    if let Err(e) = conn.execute(
        "INSERT INTO users(user_name, first_name, last_name, phone, address, photo, is_student, is_teacher)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &user_name,
            &params.first_name,
            &params.last_name,
            &params.phone,
            &params.address,
            &params.photo,
            params.is_student as i64,
            params.is_teacher as i64,
        ),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerError::Validation(
                "user name already registered".to_string(),
            ));
        }
        return Err(HandlerError::db("db_insert_failed", e));
    }
    let user_id = conn.last_insert_rowid();

    // Legacy default: the management flow creates the account with the
    // e-mail itself as the initial password.
    let password = params.password.as_deref().unwrap_or(&user_name);
    identity.create_account(&user_name, password)?;
    if params.is_student {
        identity.assign_role(&user_name, ROLE_STUDENT)?;
    }
    if params.is_teacher {
        identity.assign_role(&user_name, ROLE_TEACHER)?;
    }

    tracing::debug!(user_id, "user created");

    let user = UserRow {
        id: user_id,
        user_name,
        first_name: params.first_name,
        last_name: params.last_name,
        phone: params.phone,
        address: params.address,
        photo: params.photo,
        is_student: params.is_student,
        is_teacher: params.is_teacher,
    };
    Ok(json!({ "user": user_json(&user) }))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: CreateParams = parse_params(req)?;
    create_user(state, params)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RegisterParams {
    user_name: String,
    first_name: String,
    last_name: String,
    phone: String,
    address: String,
    password: String,
}

// Client-app self registration: always a student, never a teacher.
fn handle_register(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: RegisterParams = parse_params(req)?;
    if params.password.chars().count() < crate::auth::MIN_PASSWORD_LEN {
        return Err(HandlerError::Validation(format!(
            "the password must contain at least {} characters",
            crate::auth::MIN_PASSWORD_LEN
        )));
    }
    create_user(
        state,
        CreateParams {
            user_name: params.user_name,
            first_name: params.first_name,
            last_name: params.last_name,
            phone: params.phone,
            address: params.address,
            photo: None,
            is_student: true,
            is_teacher: false,
            password: Some(params.password),
        },
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UpdateParams {
    user_id: i64,
    user_name: String,
    first_name: String,
    last_name: String,
    phone: String,
    address: String,
    #[serde(default)]
    photo: Option<String>,
    is_student: bool,
    is_teacher: bool,
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: UpdateParams = parse_params(req)?;
    let conn = require_db(state)?;
    let identity = require_identity(state)?;

    let old = fetch_user(conn, params.user_id)?
        .ok_or_else(|| HandlerError::NotFound("user not found".to_string()))?;

    let user_name = params.user_name.trim().to_string();
    validate_user_fields(
        &user_name,
        &params.first_name,
        &params.last_name,
        &params.phone,
        &params.address,
    )?;
    if user_name_taken(conn, &user_name, Some(params.user_id))? {
        return Err(HandlerError::Validation(
            "user name already registered".to_string(),
        ));
    }

    // An omitted photo keeps the stored one.
    let photo = params.photo.clone().or(old.photo);

    if let Err(e) = conn.execute(
        "UPDATE users
         SET user_name = ?, first_name = ?, last_name = ?, phone = ?, address = ?,
             photo = ?, is_student = ?, is_teacher = ?, updated_at = ?
         WHERE id = ?",
        (
            &user_name,
            &params.first_name,
            &params.last_name,
            &params.phone,
            &params.address,
            &photo,
            params.is_student as i64,
            params.is_teacher as i64,
            chrono::Utc::now().to_rfc3339(),
            params.user_id,
        ),
    ) {
        if is_constraint_violation(&e) {
            return Err(HandlerError::Validation(
                "user name already registered".to_string(),
            ));
        }
        return Err(HandlerError::db("db_update_failed", e));
    }

    if old.user_name != user_name {
        // Accounts created before the identity bootstrap may be missing;
        // the rename is skipped for those.
        match identity.rename_account(&old.user_name, &user_name) {
            Ok(()) | Err(AuthError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }
    }

    let user = UserRow {
        id: params.user_id,
        user_name,
        first_name: params.first_name,
        last_name: params.last_name,
        phone: params.phone,
        address: params.address,
        photo,
        is_student: params.is_student,
        is_teacher: params.is_teacher,
    };
    Ok(json!({ "user": user_json(&user) }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DeleteParams {
    user_id: i64,
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: DeleteParams = parse_params(req)?;
    let conn = require_db(state)?;
    let identity = require_identity(state)?;

    let user = fetch_user(conn, params.user_id)?
        .ok_or_else(|| HandlerError::NotFound("user not found".to_string()))?;

    // No cascade: deletion is blocked while dependents exist.
    let owned_groups: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM groups WHERE user_id = ?",
            [params.user_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    if owned_groups > 0 {
        return Err(HandlerError::Validation(
            "user still owns groups; delete or reassign them first".to_string(),
        ));
    }
    let enrollments: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM group_details WHERE user_id = ?",
            [params.user_id],
            |r| r.get(0),
        )
        .map_err(|e| HandlerError::db("db_query_failed", e))?;
    if enrollments > 0 {
        return Err(HandlerError::Validation(
            "user is still enrolled in groups; remove the enrollments first".to_string(),
        ));
    }

    conn.execute("DELETE FROM users WHERE id = ?", [params.user_id])
        .map_err(|e| HandlerError::db("db_delete_failed", e))?;
    identity.delete_account(&user.user_name)?;

    tracing::debug!(user_id = params.user_id, "user deleted");
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.list" => handle_list(state, req),
        "users.get" => handle_get(state, req),
        "users.create" => handle_create(state, req),
        "users.register" => handle_register(state, req),
        "users.update" => handle_update(state, req),
        "users.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
