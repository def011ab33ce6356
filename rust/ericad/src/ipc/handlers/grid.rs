use crate::db::SqliteBackend;
use crate::ipc::error::{erica_err, err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_i64, get_required_str, grid_of, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::CellKey;
use crate::source::EvaluationBackend;
use serde_json::json;

fn grid_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let (conn, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    let scale = SqliteBackend::new(conn)
        .scale()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let mut view = json!(grid.view());
    view["scale"] = json!(scale);
    Ok(ok(&req.id, view))
}

fn grid_summary(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let (_, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    Ok(ok(&req.id, json!(grid.summary())))
}

fn grid_set_pending(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let enrollment_id =
        get_required_i64(&req.params, "enrollmentId").map_err(|e| e.response(&req.id))?;
    let category_id =
        get_required_i64(&req.params, "categoryId").map_err(|e| e.response(&req.id))?;
    let scale_code =
        get_required_str(&req.params, "scaleCode").map_err(|e| e.response(&req.id))?;
    let notes = get_optional_str(&req.params, "notes");

    let (_, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    if !grid.has_student(enrollment_id) {
        return Err(err(
            &req.id,
            "not_found",
            "enrollment is not a row of the open grid",
            Some(json!({ "enrollmentId": enrollment_id })),
        ));
    }
    if !grid.has_category(category_id) {
        return Err(err(
            &req.id,
            "not_found",
            "category is not a column of the open grid",
            Some(json!({ "categoryId": category_id })),
        ));
    }

    grid.overlay_mut()
        .set_pending(enrollment_id, category_id, scale_code, notes);
    let key = CellKey::new(enrollment_id, category_id);
    let cell = grid
        .overlay()
        .effective(enrollment_id, category_id)
        .map(|e| e.to_cell());
    Ok(ok(
        &req.id,
        json!({
            "key": key,
            "cell": cell,
            "pendingCount": grid.overlay().pending_len(),
        }),
    ))
}

fn grid_diff(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let (_, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    let pending = grid.overlay().diff();
    let keys: Vec<CellKey> = pending.iter().map(|p| p.key()).collect();
    Ok(ok(
        &req.id,
        json!({ "pending": pending, "keys": keys, "count": keys.len() }),
    ))
}

fn parse_keys(params: &serde_json::Value) -> Result<Option<Vec<CellKey>>, HandlerErr> {
    let arr = match params.get("keys") {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v
            .as_array()
            .ok_or_else(|| HandlerErr::bad_params("keys must be an array of strings"))?,
    };
    let mut keys = Vec::with_capacity(arr.len());
    for (i, v) in arr.iter().enumerate() {
        let Some(s) = v.as_str() else {
            return Err(HandlerErr::bad_params(format!("keys[{}] must be a string", i)));
        };
        let key = s.parse::<CellKey>().map_err(|message| HandlerErr {
            code: "bad_params",
            message,
            details: Some(json!({ "index": i })),
        })?;
        keys.push(key);
    }
    Ok(Some(keys))
}

fn grid_discard(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let keys = parse_keys(&req.params).map_err(|e| e.response(&req.id))?;
    let (_, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    let discarded = grid.overlay_mut().clear_pending(keys.as_deref());
    Ok(ok(
        &req.id,
        json!({
            "discarded": discarded,
            "pendingCount": grid.overlay().pending_len(),
        }),
    ))
}

fn grid_reload(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let (conn, session) = require_session(state, req)?;
    let backend = SqliteBackend::new(conn);
    let Some(result) = session.reload_grid(&backend) else {
        return Err(err(&req.id, "no_grid", "select a topic to open the evaluation grid", None));
    };
    let persisted = result.map_err(|e| erica_err(&req.id, &e))?;
    let pending = grid_of(session, req)?.overlay().pending_len();
    Ok(ok(
        &req.id,
        json!({ "persisted": persisted, "pendingCount": pending }),
    ))
}

fn grid_save(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let max_writes = state.settings.max_save_writes;
    let (conn, session) = require_session(state, req)?;
    let pending = grid_of(session, req)?.overlay().pending_len();
    if (pending as i64) > max_writes {
        return Err(err(
            &req.id,
            "too_many_writes",
            format!("{} pending evaluations exceed maxSaveWrites", pending),
            Some(json!({ "pending": pending, "maxSaveWrites": max_writes })),
        ));
    }

    let backend = SqliteBackend::new(conn);
    let Some(result) = session.save_grid(&backend) else {
        return Err(err(&req.id, "no_grid", "select a topic to open the evaluation grid", None));
    };
    let report = result.map_err(|e| erica_err(&req.id, &e))?;
    Ok(ok(&req.id, json!(report)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grid.get" => grid_get(state, req),
        "grid.summary" => grid_summary(state, req),
        "grid.setPending" => grid_set_pending(state, req),
        "grid.diff" => grid_diff(state, req),
        "grid.discard" => grid_discard(state, req),
        "grid.reload" => grid_reload(state, req),
        "grid.save" => grid_save(state, req),
        _ => return None,
    };
    Some(result.unwrap_or_else(|e| e))
}
