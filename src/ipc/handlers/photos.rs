use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;

use super::{parse_params, require_workspace, respond, HandlerError};
use crate::ipc::types::{AppState, Request};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StoreParams {
    file_name: String,
    data: String,
}

// Photos are keyed by filename; storing the same name overwrites.
fn handle_store(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerError> {
    let params: StoreParams = parse_params(req)?;
    let workspace = require_workspace(state)?;

    let name = params.file_name.trim();
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(HandlerError::BadParams("invalid file name".to_string()));
    }

    let bytes = BASE64
        .decode(params.data.as_bytes())
        .map_err(|e| HandlerError::BadParams(format!("data must be base64: {}", e)))?;

    let photos_dir = workspace.join("photos");
    std::fs::create_dir_all(&photos_dir).map_err(|e| HandlerError::Io(e.to_string()))?;
    std::fs::write(photos_dir.join(name), bytes).map_err(|e| HandlerError::Io(e.to_string()))?;

    tracing::debug!(file = name, "photo stored");
    Ok(json!({ "photo": format!("photos/{}", name) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "photos.store" => {
            let result = handle_store(state, req);
            Some(respond(&req.id, result))
        }
        _ => None,
    }
}
