use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.db.is_none() {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    }
    ok(&req.id, json!({ "settings": state.settings }))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut next = state.settings.clone();
    if let Err(message) = next.merge_patch(patch) {
        return err(&req.id, "bad_params", message, None);
    }
    if let Err(e) = next.store(conn) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if let Some(session) = state.session.as_mut() {
        session
            .cascade_mut()
            .set_include_inactive_topics(next.include_inactive_topics);
    }
    info!(keys = patch.len(), "settings updated");
    state.settings = next;
    ok(&req.id, json!({ "settings": state.settings }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
