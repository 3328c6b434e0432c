use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::groups::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::enrollment::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grading::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::grades::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::photos::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
