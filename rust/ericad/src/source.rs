//! Seams between the evaluation core and whatever serves the school data.
//!
//! The sidecar implements both traits on top of the sqlite workspace
//! (`db::SqliteBackend`); the core only ever talks to these traits.

use crate::model::{
    Category, EntityRef, EvaluationRecord, GridScope, PendingChange, ScaleLevel, Student, Topic,
};
use crate::topics::TopicQuery;
use serde::Serialize;

/// Cascade option providers and the topic fetch.
pub trait CatalogSource {
    fn bimesters(&self) -> anyhow::Result<Vec<EntityRef>>;
    fn weeks(&self, bimester_id: i64) -> anyhow::Result<Vec<EntityRef>>;
    fn grades(&self) -> anyhow::Result<Vec<EntityRef>>;
    fn sections(&self, grade_id: i64) -> anyhow::Result<Vec<EntityRef>>;
    fn courses(&self, grade_id: i64, section_id: i64) -> anyhow::Result<Vec<EntityRef>>;
    fn topics(&self, query: &TopicQuery) -> anyhow::Result<Vec<Topic>>;
}

/// Outcome of one pending write sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub enrollment_id: i64,
    pub category_id: i64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl WriteOutcome {
    pub fn saved(change: &PendingChange) -> Self {
        Self {
            enrollment_id: change.enrollment_id,
            category_id: change.category_id,
            ok: true,
            code: None,
            message: None,
        }
    }

    pub fn rejected(change: &PendingChange, code: &str, message: impl Into<String>) -> Self {
        Self {
            enrollment_id: change.enrollment_id,
            category_id: change.category_id,
            ok: false,
            code: Some(code.to_string()),
            message: Some(message.into()),
        }
    }
}

/// Grid data: rows, columns, scale, persisted evaluations and saving.
pub trait EvaluationBackend {
    fn students(&self, section_id: i64) -> anyhow::Result<Vec<Student>>;
    fn categories(&self) -> anyhow::Result<Vec<Category>>;
    fn scale(&self) -> anyhow::Result<Vec<ScaleLevel>>;
    fn fetch_evaluations(&self, scope: &GridScope) -> anyhow::Result<Vec<EvaluationRecord>>;
    fn save_evaluations(
        &self,
        scope: &GridScope,
        changes: &[PendingChange],
    ) -> anyhow::Result<Vec<WriteOutcome>>;
}
