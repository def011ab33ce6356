use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::session::{EvaluationSession, GridSession};
use rusqlite::Connection;
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_i64(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing/invalid {}", key)))
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_i64_array(params: &Value, key: &str) -> Result<Vec<i64>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}[]", key)));
    };
    arr.iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_i64().ok_or_else(|| HandlerErr {
                code: "bad_params",
                message: format!("{}[{}] must be an integer", key, i),
                details: Some(json!({ "value": v })),
            })
        })
        .collect()
}

/// Workspace connection and session, or the matching error response.
pub fn require_session<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<(&'a Connection, &'a mut EvaluationSession), Value> {
    let (Some(conn), Some(session)) = (state.db.as_ref(), state.session.as_mut()) else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Ok((conn, session))
}

pub fn grid_of<'a>(
    session: &'a mut EvaluationSession,
    req: &Request,
) -> Result<&'a mut GridSession, Value> {
    session
        .grid_mut()
        .ok_or_else(|| err(&req.id, "no_grid", "select a topic to open the evaluation grid", None))
}
