use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A selectable entity in the cascade (bimester, week, grade, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub id: i64,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: i64,
    pub name: String,
    pub course_id: i64,
    pub section_id: i64,
    pub academic_week_id: i64,
    pub is_active: bool,
}

impl Topic {
    pub fn as_entity(&self) -> EntityRef {
        EntityRef::new(self.id, self.name.clone())
    }
}

/// Grid row. Owned by the server snapshot for the lifetime of a grid session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub given_names: String,
    pub last_names: String,
}

pub fn sort_students(students: &mut [Student]) {
    students.sort_by(|a, b| {
        a.last_names
            .to_lowercase()
            .cmp(&b.last_names.to_lowercase())
            .then_with(|| {
                a.given_names
                    .to_lowercase()
                    .cmp(&b.given_names.to_lowercase())
            })
            .then(a.enrollment_id.cmp(&b.enrollment_id))
    });
}

/// Grid column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub order: i64,
}

fn category_cmp(a: &Category, b: &Category) -> Ordering {
    a.order.cmp(&b.order).then(a.id.cmp(&b.id))
}

/// Column order: `order` ascending, ties by `id` ascending.
pub fn sort_categories(categories: &mut [Category]) {
    categories.sort_by(category_cmp);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleLevel {
    pub code: String,
    pub name: String,
    pub points: f64,
}

/// Composite cell key, rendered as `"{enrollmentId}-{categoryId}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub enrollment_id: i64,
    pub category_id: i64,
}

impl CellKey {
    pub fn new(enrollment_id: i64, category_id: i64) -> Self {
        Self {
            enrollment_id,
            category_id,
        }
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.enrollment_id, self.category_id)
    }
}

impl FromStr for CellKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (e, c) = s
            .split_once('-')
            .ok_or_else(|| format!("cell key must look like <enrollmentId>-<categoryId>: {s}"))?;
        let enrollment_id = e
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid enrollment id in cell key: {s}"))?;
        let category_id = c
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid category id in cell key: {s}"))?;
        Ok(Self::new(enrollment_id, category_id))
    }
}

impl Serialize for CellKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Server-persisted evaluation cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    pub evaluation_id: String,
    pub enrollment_id: i64,
    pub category_id: i64,
    pub scale_code: String,
    pub points: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub evaluated_at: String,
    pub created_at: String,
}

impl EvaluationRecord {
    pub fn key(&self) -> CellKey {
        CellKey::new(self.enrollment_id, self.category_id)
    }
}

/// Unsaved edit of a single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub enrollment_id: i64,
    pub category_id: i64,
    pub scale_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PendingChange {
    pub fn key(&self) -> CellKey {
        CellKey::new(self.enrollment_id, self.category_id)
    }
}

/// Evaluations are scoped per (topic, teacher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridScope {
    pub topic_id: i64,
    pub teacher_id: i64,
}
