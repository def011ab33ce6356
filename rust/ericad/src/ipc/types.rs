use std::path::PathBuf;

use crate::config::EricaSettings;
use crate::session::EvaluationSession;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub settings: EricaSettings,
    /// Created by `workspace.select`; owns the cascade and the open grid.
    pub session: Option<EvaluationSession>,
}
