use crate::ipc::error::{erica_err, err, ok};
use crate::ipc::helpers::{
    get_i64_array, get_optional_bool, get_required_i64, grid_of, require_session,
};
use crate::ipc::types::{AppState, Request};
use crate::session::GridSession;
use serde_json::json;
use tracing::info;

struct CopyParams {
    source_enrollment_id: i64,
    target_enrollment_ids: Vec<i64>,
    copy_only_empty: bool,
}

fn parse_copy_params(
    state: &AppState,
    req: &Request,
) -> Result<CopyParams, serde_json::Value> {
    let source_enrollment_id =
        get_required_i64(&req.params, "sourceEnrollmentId").map_err(|e| e.response(&req.id))?;
    let target_enrollment_ids =
        get_i64_array(&req.params, "targetEnrollmentIds").map_err(|e| e.response(&req.id))?;
    if target_enrollment_ids.is_empty() {
        return Err(err(
            &req.id,
            "bad_params",
            "targetEnrollmentIds must not be empty",
            None,
        ));
    }
    if target_enrollment_ids.contains(&source_enrollment_id) {
        return Err(err(
            &req.id,
            "bad_params",
            "the source enrollment cannot also be a target",
            Some(json!({ "sourceEnrollmentId": source_enrollment_id })),
        ));
    }
    let copy_only_empty = get_optional_bool(&req.params, "copyOnlyEmpty")
        .map_err(|e| e.response(&req.id))?
        .unwrap_or(state.settings.copy_only_empty_default);

    Ok(CopyParams {
        source_enrollment_id,
        target_enrollment_ids,
        copy_only_empty,
    })
}

fn check_rows(grid: &GridSession, p: &CopyParams, req: &Request) -> Result<(), serde_json::Value> {
    let unknown: Vec<i64> = std::iter::once(p.source_enrollment_id)
        .chain(p.target_enrollment_ids.iter().copied())
        .filter(|id| !grid.has_student(*id))
        .collect();
    if !unknown.is_empty() {
        return Err(err(
            &req.id,
            "not_found",
            "enrollment is not a row of the open grid",
            Some(json!({ "enrollmentIds": unknown })),
        ));
    }
    Ok(())
}

fn copy_preview(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, serde_json::Value> {
    let p = parse_copy_params(state, req)?;
    let (_, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    check_rows(grid, &p, req)?;

    let preview = grid.copy_preview(
        p.source_enrollment_id,
        &p.target_enrollment_ids,
        p.copy_only_empty,
    );
    Ok(ok(
        &req.id,
        json!({ "copyOnlyEmpty": p.copy_only_empty, "preview": preview }),
    ))
}

fn copy_apply(state: &mut AppState, req: &Request) -> Result<serde_json::Value, serde_json::Value> {
    let p = parse_copy_params(state, req)?;
    let (_, session) = require_session(state, req)?;
    let grid = grid_of(session, req)?;
    check_rows(grid, &p, req)?;

    let applied = grid
        .copy_apply(
            p.source_enrollment_id,
            &p.target_enrollment_ids,
            p.copy_only_empty,
        )
        .map_err(|e| erica_err(&req.id, &e))?;
    info!(
        source = p.source_enrollment_id,
        targets = p.target_enrollment_ids.len(),
        applied,
        "evaluations copied"
    );
    Ok(ok(
        &req.id,
        json!({
            "applied": applied,
            "copyOnlyEmpty": p.copy_only_empty,
            "pendingCount": grid.overlay().pending_len(),
        }),
    ))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "copy.preview" => copy_preview(state, req),
        "copy.apply" => copy_apply(state, req),
        _ => return None,
    };
    Some(result.unwrap_or_else(|e| e))
}
