use rusqlite::OptionalExtension;
use serde::Deserialize;
use serde_json::json;

use super::{parse_params, require_db, respond, HandlerError};
use crate::calc::{note_value_in_range, NOTE_MAX, NOTE_MIN};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct BatchEntry {
    group_detail_id: i64,
    qualification: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubmitBatchParams {
    percentage: f64,
    entries: Vec<BatchEntry>,
}

// One assessment: a shared weight applied to every student's
// qualification, persisted all-or-nothing.
fn handle_submit_batch(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerError> {
    let params: SubmitBatchParams = parse_params(req)?;
    let conn = require_db(state)?;

    // Range validation happens before anything reaches storage.
    if !note_value_in_range(params.percentage) {
        return Err(HandlerError::Validation(format!(
            "percentage {} is out of range [{}, {}]",
            params.percentage, NOTE_MIN, NOTE_MAX
        )));
    }
    for entry in &params.entries {
        if !note_value_in_range(entry.qualification) {
            return Err(HandlerError::Validation(format!(
                "qualification {} for group detail {} is out of range [{}, {}]",
                entry.qualification, entry.group_detail_id, NOTE_MIN, NOTE_MAX
            )));
        }
    }

    // Dropping the transaction on any error path rolls the whole batch
    // back; there are no partial commits.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerError::db("db_tx_failed", e))?;

    for entry in &params.entries {
        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM group_details WHERE id = ?",
                [entry.group_detail_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| HandlerError::db("db_query_failed", e))?;
        if exists.is_none() {
            return Err(HandlerError::NotFound(format!(
                "group detail {} not found",
                entry.group_detail_id
            )));
        }

        tx.execute(
            "INSERT INTO notes(group_detail_id, percentage, qualification) VALUES(?, ?, ?)",
            (entry.group_detail_id, params.percentage, entry.qualification),
        )
        .map_err(|e| HandlerError::db("db_insert_failed", e))?;
    }

    tx.commit()
        .map_err(|e| HandlerError::db("db_commit_failed", e))?;

    tracing::debug!(
        inserted = params.entries.len(),
        percentage = params.percentage,
        "grading batch committed"
    );
    Ok(json!({ "inserted": params.entries.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.submitBatch" => {
            let result = handle_submit_batch(state, req);
            Some(respond(&req.id, result))
        }
        _ => None,
    }
}
