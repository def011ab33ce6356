use crate::config::EricaSettings;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_i64;
use crate::ipc::types::{AppState, Request};
use crate::session::EvaluationSession;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "teacherId": state.session.as_ref().map(|s| s.teacher_id()),
            "step": state.session.as_ref().map(|s| s.cascade().current_step()),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let teacher_id = match get_required_i64(&req.params, "teacherId") {
        Ok(v) if v > 0 => v,
        Ok(_) => return err(&req.id, "bad_params", "teacherId must be positive", None),
        Err(e) => return e.response(&req.id),
    };

    let conn = match db::open_db(&path) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let settings = match EricaSettings::load(&conn) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Some(previous) = state.session.as_ref().and_then(|s| s.grid()) {
        let dropped = previous.overlay().pending_len();
        if dropped > 0 {
            tracing::warn!(dropped, "workspace switched with unsaved evaluations");
        }
    }

    info!(path = %path.display(), teacher_id, "workspace opened");
    state.session = Some(EvaluationSession::new(
        teacher_id,
        settings.include_inactive_topics,
    ));
    state.settings = settings;
    state.workspace = Some(path.clone());
    state.db = Some(conn);

    ok(
        &req.id,
        json!({
            "workspacePath": path.to_string_lossy(),
            "teacherId": teacher_id,
            "settings": state.settings,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
