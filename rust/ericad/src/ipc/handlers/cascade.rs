use crate::cascade::SelectionLevel;
use crate::db::SqliteBackend;
use crate::ipc::error::{erica_err, err, ok};
use crate::ipc::helpers::{require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::EvaluationSession;
use serde_json::json;

fn parse_level(params: &serde_json::Value) -> Result<SelectionLevel, HandlerErr> {
    let raw = params
        .get("level")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing level"))?;
    SelectionLevel::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: format!("unknown level: {}", raw),
        details: Some(json!({ "allowed": SelectionLevel::ALL })),
    })
}

fn cascade_json(session: &EvaluationSession) -> serde_json::Value {
    json!({
        "step": session.cascade().current_step(),
        "selection": session.cascade().state().to_json(),
        "revision": session.revision(),
        "gridOpen": session.grid().is_some(),
        "includeInactiveTopics": session.cascade().include_inactive_topics(),
    })
}

fn handle_cascade_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match require_session(state, req) {
        Ok((_, session)) => ok(&req.id, cascade_json(session)),
        Err(resp) => resp,
    }
}

fn handle_cascade_options(state: &mut AppState, req: &Request) -> serde_json::Value {
    let level = match parse_level(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let backend = SqliteBackend::new(conn);
    match session.options_for(level, &backend) {
        Ok(options) => ok(
            &req.id,
            json!({
                "level": level,
                "selected": session.cascade().state().id(level),
                "options": options,
            }),
        ),
        Err(e) => erica_err(&req.id, &e),
    }
}

fn handle_cascade_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let level = match parse_level(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let id = match req.params.get("id") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_i64() {
            Some(id) => Some(id),
            None => return err(&req.id, "bad_params", "id must be an integer or null", None),
        },
    };
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let backend = SqliteBackend::new(conn);

    let value = match id {
        None => None,
        Some(id) => {
            let options = match session.options_for(level, &backend) {
                Ok(v) => v,
                Err(e) => return erica_err(&req.id, &e),
            };
            match options.into_iter().find(|o| o.id == id) {
                Some(o) => Some(o),
                None => {
                    return err(
                        &req.id,
                        "not_found",
                        format!("{} {} is not available for the current selection", level, id),
                        Some(json!({ "level": level, "id": id })),
                    )
                }
            }
        }
    };

    match session.select_level(level, value, &backend) {
        Ok(report) => ok(
            &req.id,
            json!({ "report": report, "cascade": cascade_json(session) }),
        ),
        Err(e) => erica_err(&req.id, &e),
    }
}

fn handle_cascade_back(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, session) = match require_session(state, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let backend = SqliteBackend::new(conn);
    match session.go_back(&backend) {
        Ok(report) => ok(
            &req.id,
            json!({ "report": report, "cascade": cascade_json(session) }),
        ),
        Err(e) => erica_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cascade.get" => Some(handle_cascade_get(state, req)),
        "cascade.options" => Some(handle_cascade_options(state, req)),
        "cascade.select" => Some(handle_cascade_select(state, req)),
        "cascade.back" => Some(handle_cascade_back(state, req)),
        _ => None,
    }
}
