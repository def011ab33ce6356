use crate::model::{
    Category, EntityRef, EvaluationRecord, GridScope, PendingChange, ScaleLevel, Student, Topic,
};
use crate::source::{CatalogSource, EvaluationBackend, WriteOutcome};
use crate::topics::TopicQuery;
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "erica.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS bimesters(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_weeks(
            id INTEGER PRIMARY KEY,
            bimester_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            week_number INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(bimester_id) REFERENCES bimesters(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_academic_weeks_bimester ON academic_weeks(bimester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id INTEGER PRIMARY KEY,
            grade_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_grade ON sections(grade_id)",
        [],
    )?;

    // section_id NULL means the course is offered to every section of the grade.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id INTEGER PRIMARY KEY,
            grade_id INTEGER NOT NULL,
            section_id INTEGER,
            name TEXT NOT NULL,
            FOREIGN KEY(grade_id) REFERENCES grades(id),
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_grade ON courses(grade_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id INTEGER PRIMARY KEY,
            course_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            academic_week_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            FOREIGN KEY(academic_week_id) REFERENCES academic_weeks(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_topics_lookup ON topics(course_id, section_id, academic_week_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id INTEGER PRIMARY KEY,
            code TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS scale_levels(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            points REAL NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id INTEGER PRIMARY KEY,
            student_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            given_names TEXT NOT NULL,
            last_names TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(section_id) REFERENCES sections(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_section ON enrollments(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            topic_id INTEGER NOT NULL,
            teacher_id INTEGER NOT NULL,
            enrollment_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            scale_code TEXT NOT NULL,
            points REAL NOT NULL,
            notes TEXT,
            evaluated_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(topic_id) REFERENCES topics(id),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(category_id) REFERENCES categories(id),
            UNIQUE(topic_id, teacher_id, enrollment_id, category_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_scope ON evaluations(topic_id, teacher_id)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings value for {key}"))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// --- catalog import ----------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRow {
    pub id: i64,
    pub bimester_id: i64,
    pub name: String,
    #[serde(default)]
    pub week_number: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRow {
    pub id: i64,
    pub grade_id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRow {
    pub id: i64,
    pub grade_id: i64,
    #[serde(default)]
    pub section_id: Option<i64>,
    pub name: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRow {
    pub id: i64,
    pub course_id: i64,
    pub section_id: i64,
    pub academic_week_id: i64,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRow {
    pub enrollment_id: i64,
    pub student_id: i64,
    pub section_id: i64,
    pub given_names: String,
    pub last_names: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRow {
    pub topic_id: i64,
    pub teacher_id: i64,
    pub enrollment_id: i64,
    pub category_id: i64,
    pub scale_code: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub evaluated_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogImport {
    pub bimesters: Vec<NamedRow>,
    pub weeks: Vec<WeekRow>,
    pub grades: Vec<NamedRow>,
    pub sections: Vec<SectionRow>,
    pub courses: Vec<CourseRow>,
    pub topics: Vec<TopicRow>,
    pub categories: Vec<Category>,
    pub scale: Vec<ScaleLevel>,
    pub enrollments: Vec<EnrollmentRow>,
    pub evaluations: Vec<EvaluationRow>,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportCounts {
    pub bimesters: usize,
    pub weeks: usize,
    pub grades: usize,
    pub sections: usize,
    pub courses: usize,
    pub topics: usize,
    pub categories: usize,
    pub scale: usize,
    pub enrollments: usize,
    pub evaluations: usize,
}

/// Upserts every row of the payload in one transaction.
pub fn import_catalog(conn: &Connection, data: &CatalogImport) -> anyhow::Result<ImportCounts> {
    let tx = conn.unchecked_transaction()?;
    let mut counts = ImportCounts::default();

    for (i, b) in data.bimesters.iter().enumerate() {
        tx.execute(
            "INSERT INTO bimesters(id, name, sort_order) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, sort_order = excluded.sort_order",
            (b.id, &b.name, if b.order != 0 { b.order } else { i as i64 }),
        )?;
        counts.bimesters += 1;
    }
    for w in &data.weeks {
        tx.execute(
            "INSERT INTO academic_weeks(id, bimester_id, name, week_number) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               bimester_id = excluded.bimester_id,
               name = excluded.name,
               week_number = excluded.week_number",
            (w.id, w.bimester_id, &w.name, w.week_number),
        )
        .with_context(|| format!("week {}", w.id))?;
        counts.weeks += 1;
    }
    for (i, g) in data.grades.iter().enumerate() {
        tx.execute(
            "INSERT INTO grades(id, name, sort_order) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, sort_order = excluded.sort_order",
            (g.id, &g.name, if g.order != 0 { g.order } else { i as i64 }),
        )?;
        counts.grades += 1;
    }
    for s in &data.sections {
        tx.execute(
            "INSERT INTO sections(id, grade_id, name) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET grade_id = excluded.grade_id, name = excluded.name",
            (s.id, s.grade_id, &s.name),
        )
        .with_context(|| format!("section {}", s.id))?;
        counts.sections += 1;
    }
    for c in &data.courses {
        tx.execute(
            "INSERT INTO courses(id, grade_id, section_id, name) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               grade_id = excluded.grade_id,
               section_id = excluded.section_id,
               name = excluded.name",
            (c.id, c.grade_id, c.section_id, &c.name),
        )
        .with_context(|| format!("course {}", c.id))?;
        counts.courses += 1;
    }
    for t in &data.topics {
        tx.execute(
            "INSERT INTO topics(id, course_id, section_id, academic_week_id, name, is_active)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               course_id = excluded.course_id,
               section_id = excluded.section_id,
               academic_week_id = excluded.academic_week_id,
               name = excluded.name,
               is_active = excluded.is_active",
            (
                t.id,
                t.course_id,
                t.section_id,
                t.academic_week_id,
                &t.name,
                t.is_active as i64,
            ),
        )
        .with_context(|| format!("topic {}", t.id))?;
        counts.topics += 1;
    }
    for c in &data.categories {
        tx.execute(
            "INSERT INTO categories(id, code, name, sort_order) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               code = excluded.code,
               name = excluded.name,
               sort_order = excluded.sort_order",
            (c.id, &c.code, &c.name, c.order),
        )?;
        counts.categories += 1;
    }
    for (i, s) in data.scale.iter().enumerate() {
        tx.execute(
            "INSERT INTO scale_levels(code, name, points, sort_order) VALUES(?, ?, ?, ?)
             ON CONFLICT(code) DO UPDATE SET
               name = excluded.name,
               points = excluded.points,
               sort_order = excluded.sort_order",
            (s.code.trim().to_ascii_uppercase(), &s.name, s.points, i as i64),
        )?;
        counts.scale += 1;
    }
    for e in &data.enrollments {
        tx.execute(
            "INSERT INTO enrollments(id, student_id, section_id, given_names, last_names, active)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
               student_id = excluded.student_id,
               section_id = excluded.section_id,
               given_names = excluded.given_names,
               last_names = excluded.last_names,
               active = excluded.active",
            (
                e.enrollment_id,
                e.student_id,
                e.section_id,
                &e.given_names,
                &e.last_names,
                e.active as i64,
            ),
        )
        .with_context(|| format!("enrollment {}", e.enrollment_id))?;
        counts.enrollments += 1;
    }

    let scale = scale_points(&tx)?;
    for ev in &data.evaluations {
        let code = ev.scale_code.trim().to_ascii_uppercase();
        let Some(points) = scale.get(&code).copied() else {
            anyhow::bail!(
                "evaluation for enrollment {} category {} uses unknown scale code {}",
                ev.enrollment_id,
                ev.category_id,
                ev.scale_code
            );
        };
        let scope = GridScope {
            topic_id: ev.topic_id,
            teacher_id: ev.teacher_id,
        };
        let evaluated_at = ev.evaluated_at.clone().unwrap_or_else(now_rfc3339);
        upsert_evaluation(
            &tx,
            &scope,
            ev.enrollment_id,
            ev.category_id,
            &code,
            points,
            ev.notes.as_deref(),
            &evaluated_at,
        )
        .with_context(|| {
            format!(
                "evaluation for enrollment {} category {}",
                ev.enrollment_id, ev.category_id
            )
        })?;
        counts.evaluations += 1;
    }

    tx.commit()?;
    Ok(counts)
}

fn scale_points(conn: &Connection) -> anyhow::Result<HashMap<String, f64>> {
    let mut stmt = conn.prepare("SELECT code, points FROM scale_levels")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

#[allow(clippy::too_many_arguments)]
fn upsert_evaluation(
    conn: &Connection,
    scope: &GridScope,
    enrollment_id: i64,
    category_id: i64,
    scale_code: &str,
    points: f64,
    notes: Option<&str>,
    evaluated_at: &str,
) -> anyhow::Result<()> {
    let id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    conn.execute(
        "INSERT INTO evaluations(
            id, topic_id, teacher_id, enrollment_id, category_id,
            scale_code, points, notes, evaluated_at, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(topic_id, teacher_id, enrollment_id, category_id) DO UPDATE SET
           scale_code = excluded.scale_code,
           points = excluded.points,
           notes = excluded.notes,
           evaluated_at = excluded.evaluated_at",
        rusqlite::params![
            id,
            scope.topic_id,
            scope.teacher_id,
            enrollment_id,
            category_id,
            scale_code,
            points,
            notes,
            evaluated_at,
            created_at
        ],
    )?;
    Ok(())
}

// --- collaborator implementation ---------------------------------------------

/// The sqlite workspace acting as the school backend.
pub struct SqliteBackend<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteBackend<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn entities<P: rusqlite::Params>(&self, sql: &str, params: P) -> anyhow::Result<Vec<EntityRef>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |r| Ok(EntityRef::new(r.get(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl CatalogSource for SqliteBackend<'_> {
    fn bimesters(&self) -> anyhow::Result<Vec<EntityRef>> {
        self.entities("SELECT id, name FROM bimesters ORDER BY sort_order, id", [])
    }

    fn weeks(&self, bimester_id: i64) -> anyhow::Result<Vec<EntityRef>> {
        self.entities(
            "SELECT id, name FROM academic_weeks WHERE bimester_id = ? ORDER BY week_number, id",
            [bimester_id],
        )
    }

    fn grades(&self) -> anyhow::Result<Vec<EntityRef>> {
        self.entities("SELECT id, name FROM grades ORDER BY sort_order, id", [])
    }

    fn sections(&self, grade_id: i64) -> anyhow::Result<Vec<EntityRef>> {
        self.entities(
            "SELECT id, name FROM sections WHERE grade_id = ? ORDER BY name, id",
            [grade_id],
        )
    }

    fn courses(&self, grade_id: i64, section_id: i64) -> anyhow::Result<Vec<EntityRef>> {
        self.entities(
            "SELECT id, name FROM courses
             WHERE grade_id = ? AND (section_id IS NULL OR section_id = ?)
             ORDER BY name, id",
            [grade_id, section_id],
        )
    }

    fn topics(&self, query: &TopicQuery) -> anyhow::Result<Vec<Topic>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, course_id, section_id, academic_week_id, is_active FROM topics
             WHERE course_id = ? AND section_id = ? AND academic_week_id = ?
               AND (? IS NULL OR is_active = ?)
             ORDER BY name, id",
        )?;
        let active = query.is_active.map(|b| b as i64);
        let rows = stmt
            .query_map(
                rusqlite::params![
                    query.course_id,
                    query.section_id,
                    query.academic_week_id,
                    active,
                    active
                ],
                |r| {
                    Ok(Topic {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        course_id: r.get(2)?,
                        section_id: r.get(3)?,
                        academic_week_id: r.get(4)?,
                        is_active: r.get::<_, i64>(5)? != 0,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl EvaluationBackend for SqliteBackend<'_> {
    fn students(&self, section_id: i64) -> anyhow::Result<Vec<Student>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, given_names, last_names FROM enrollments
             WHERE section_id = ? AND active = 1",
        )?;
        let rows = stmt
            .query_map([section_id], |r| {
                Ok(Student {
                    enrollment_id: r.get(0)?,
                    student_id: r.get(1)?,
                    given_names: r.get(2)?,
                    last_names: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn categories(&self) -> anyhow::Result<Vec<Category>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, code, name, sort_order FROM categories")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(Category {
                    id: r.get(0)?,
                    code: r.get(1)?,
                    name: r.get(2)?,
                    order: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn scale(&self) -> anyhow::Result<Vec<ScaleLevel>> {
        let mut stmt = self
            .conn
            .prepare("SELECT code, name, points FROM scale_levels ORDER BY sort_order, code")?;
        let rows = stmt
            .query_map([], |r| {
                Ok(ScaleLevel {
                    code: r.get(0)?,
                    name: r.get(1)?,
                    points: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn fetch_evaluations(&self, scope: &GridScope) -> anyhow::Result<Vec<EvaluationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, enrollment_id, category_id, scale_code, points, notes, evaluated_at, created_at
             FROM evaluations
             WHERE topic_id = ? AND teacher_id = ?
             ORDER BY enrollment_id, category_id",
        )?;
        let rows = stmt
            .query_map([scope.topic_id, scope.teacher_id], |r| {
                Ok(EvaluationRecord {
                    evaluation_id: r.get(0)?,
                    enrollment_id: r.get(1)?,
                    category_id: r.get(2)?,
                    scale_code: r.get(3)?,
                    points: r.get(4)?,
                    notes: r.get(5)?,
                    evaluated_at: r.get(6)?,
                    created_at: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Validates each change independently; a rejected write does not stop
    /// the others.
    fn save_evaluations(
        &self,
        scope: &GridScope,
        changes: &[PendingChange],
    ) -> anyhow::Result<Vec<WriteOutcome>> {
        let scale = scale_points(self.conn)?;
        let categories: HashSet<i64> = self.categories()?.into_iter().map(|c| c.id).collect();
        let topic_section: Option<i64> = self
            .conn
            .query_row(
                "SELECT section_id FROM topics WHERE id = ?",
                [scope.topic_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(section_id) = topic_section else {
            anyhow::bail!("topic {} does not exist", scope.topic_id);
        };
        let enrolled: HashSet<i64> = self
            .students(section_id)?
            .into_iter()
            .map(|s| s.enrollment_id)
            .collect();

        let evaluated_at = now_rfc3339();
        let mut outcomes = Vec::with_capacity(changes.len());
        for change in changes {
            if !enrolled.contains(&change.enrollment_id) {
                outcomes.push(WriteOutcome::rejected(
                    change,
                    "not_found",
                    "enrollment is not part of the topic's section",
                ));
                continue;
            }
            if !categories.contains(&change.category_id) {
                outcomes.push(WriteOutcome::rejected(change, "not_found", "category not found"));
                continue;
            }
            let code = change.scale_code.trim().to_ascii_uppercase();
            let Some(points) = scale.get(&code).copied() else {
                outcomes.push(WriteOutcome::rejected(
                    change,
                    "unknown_scale",
                    format!("unknown scale code: {}", change.scale_code),
                ));
                continue;
            };
            let notes = change
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty());
            match upsert_evaluation(
                self.conn,
                scope,
                change.enrollment_id,
                change.category_id,
                &code,
                points,
                notes,
                &evaluated_at,
            ) {
                Ok(()) => outcomes.push(WriteOutcome::saved(change)),
                Err(e) => outcomes.push(WriteOutcome::rejected(
                    change,
                    "db_insert_failed",
                    e.to_string(),
                )),
            }
        }
        Ok(outcomes)
    }
}
