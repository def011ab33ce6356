use crate::db::{self, CatalogImport};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_catalog_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let data: CatalogImport = match serde_json::from_value(req.params.clone()) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
    };

    match db::import_catalog(conn, &data) {
        Ok(counts) => {
            info!(
                topics = counts.topics,
                enrollments = counts.enrollments,
                evaluations = counts.evaluations,
                "catalog imported"
            );
            ok(&req.id, json!({ "imported": counts }))
        }
        Err(e) => err(&req.id, "import_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.import" => Some(handle_catalog_import(state, req)),
        _ => None,
    }
}
