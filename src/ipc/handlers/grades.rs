use serde::Deserialize;
use serde_json::json;

use super::{parse_params, require_db, respond, HandlerError};
use crate::calc;
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ComputeParams {
    group_id: i64,
    user_id: i64,
}

// No existence validation here: an absent pair computes to 0.0.
fn handle_compute(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: ComputeParams = parse_params(req)?;
    let conn = require_db(state)?;
    let grade = calc::compute_grade(conn, params.group_id, params.user_id)?;
    Ok(json!({
        "groupId": params.group_id,
        "userId": params.user_id,
        "grade": grade,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RosterParams {
    group_id: i64,
}

fn handle_roster(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: RosterParams = parse_params(req)?;
    let conn = require_db(state)?;
    let roster = calc::compute_roster(conn, params.group_id)?;
    Ok(json!({
        "groupId": params.group_id,
        "roster": roster,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.compute" => handle_compute(state, req),
        "grades.roster" => handle_roster(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
