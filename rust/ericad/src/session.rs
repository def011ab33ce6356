//! Evaluation session: the cascade plus, once a topic is chosen, the grid
//! editor scoped to (topic, teacher).

use crate::cascade::{CascadeEngine, SelectOutcome, SelectionLevel};
use crate::copy::{self, CopyPreview, CopyRequest};
use crate::error::EricaResult;
use crate::model::{
    sort_categories, sort_students, Category, CellKey, EntityRef, EvaluationRecord, GridScope,
    Student,
};
use crate::overlay::{EffectiveCell, OverlayStore};
use crate::source::{CatalogSource, EvaluationBackend, WriteOutcome};
use crate::topics::{RequestGate, RequestTag};
use serde::Serialize;
use tracing::{info, warn};

pub struct GridSession {
    scope: GridScope,
    topic: EntityRef,
    students: Vec<Student>,
    categories: Vec<Category>,
    overlay: OverlayStore,
    gate: RequestGate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCellView {
    #[serde(flatten)]
    pub cell: EffectiveCell,
    pub dirty: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub scope: GridScope,
    pub topic: EntityRef,
    pub students: Vec<Student>,
    pub categories: Vec<Category>,
    /// `cells[row][col]`, `None` for an unfilled cell.
    pub cells: Vec<Vec<Option<GridCellView>>>,
    pub pending_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub enrollment_id: i64,
    pub filled: usize,
    pub pending: usize,
    pub total: usize,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSummary {
    pub students: Vec<StudentProgress>,
    pub total_cells: usize,
    pub filled_cells: usize,
    pub pending_cells: usize,
    pub complete_students: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReport {
    pub attempted: usize,
    pub saved: usize,
    pub rejected: Vec<WriteOutcome>,
    pub pending_after: usize,
    pub persisted_after: usize,
}

impl GridSession {
    pub fn open(
        scope: GridScope,
        topic: EntityRef,
        section_id: i64,
        backend: &dyn EvaluationBackend,
        revision: u64,
    ) -> EricaResult<Self> {
        let mut students = backend.students(section_id)?;
        sort_students(&mut students);
        let mut categories = backend.categories()?;
        sort_categories(&mut categories);

        let mut grid = Self {
            scope,
            topic,
            students,
            categories,
            overlay: OverlayStore::new(),
            gate: RequestGate::default(),
        };
        grid.reload(backend, revision)?;
        Ok(grid)
    }

    pub fn scope(&self) -> GridScope {
        self.scope
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn overlay(&self) -> &OverlayStore {
        &self.overlay
    }

    pub fn overlay_mut(&mut self) -> &mut OverlayStore {
        &mut self.overlay
    }

    pub fn has_student(&self, enrollment_id: i64) -> bool {
        self.students.iter().any(|s| s.enrollment_id == enrollment_id)
    }

    pub fn has_category(&self, category_id: i64) -> bool {
        self.categories.iter().any(|c| c.id == category_id)
    }

    pub fn begin_reload(&mut self, revision: u64) -> RequestTag {
        self.gate.issue(revision)
    }

    pub fn finish_reload(
        &mut self,
        tag: RequestTag,
        revision: u64,
        records: Vec<EvaluationRecord>,
    ) -> EricaResult<usize> {
        self.gate.admit(tag, revision)?;
        self.overlay.load(records);
        Ok(self.overlay.persisted_len())
    }

    /// Re-fetches the persisted snapshot; pending edits are kept.
    pub fn reload(&mut self, backend: &dyn EvaluationBackend, revision: u64) -> EricaResult<usize> {
        let tag = self.begin_reload(revision);
        let records = backend.fetch_evaluations(&self.scope)?;
        self.finish_reload(tag, revision, records)
    }

    /// Sends every pending change to the backend. Confirmed writes leave the
    /// pending map only once the refreshed snapshot is loaded; any backend
    /// error, including a failed re-fetch, keeps everything pending.
    pub fn save(&mut self, backend: &dyn EvaluationBackend, revision: u64) -> EricaResult<SaveReport> {
        let diff = self.overlay.diff();
        if diff.is_empty() {
            return Ok(SaveReport {
                attempted: 0,
                saved: 0,
                rejected: Vec::new(),
                pending_after: 0,
                persisted_after: self.overlay.persisted_len(),
            });
        }

        let outcomes = backend.save_evaluations(&self.scope, &diff)?;
        let confirmed: Vec<CellKey> = outcomes
            .iter()
            .filter(|o| o.ok)
            .map(|o| CellKey::new(o.enrollment_id, o.category_id))
            .collect();
        let rejected: Vec<WriteOutcome> = outcomes.into_iter().filter(|o| !o.ok).collect();

        info!(
            topic_id = self.scope.topic_id,
            teacher_id = self.scope.teacher_id,
            saved = confirmed.len(),
            rejected = rejected.len(),
            "evaluations saved"
        );

        // Saving again is an idempotent upsert, so a failed re-fetch can
        // leave the confirmed writes pending.
        if let Err(e) = self.reload(backend, revision) {
            warn!(
                topic_id = self.scope.topic_id,
                confirmed = confirmed.len(),
                error = %e,
                "re-fetch after save failed, edits kept pending"
            );
            return Err(e);
        }
        self.overlay.clear_pending(Some(confirmed.as_slice()));
        Ok(SaveReport {
            attempted: diff.len(),
            saved: confirmed.len(),
            rejected,
            pending_after: self.overlay.pending_len(),
            persisted_after: self.overlay.persisted_len(),
        })
    }

    pub fn copy_preview(
        &self,
        source_enrollment_id: i64,
        target_enrollment_ids: &[i64],
        copy_only_empty: bool,
    ) -> CopyPreview {
        copy::preview(
            &self.overlay,
            &CopyRequest {
                source_enrollment_id,
                target_enrollment_ids,
                categories: &self.categories,
                copy_only_empty,
            },
        )
    }

    pub fn copy_apply(
        &mut self,
        source_enrollment_id: i64,
        target_enrollment_ids: &[i64],
        copy_only_empty: bool,
    ) -> EricaResult<usize> {
        let writes = self
            .copy_preview(source_enrollment_id, target_enrollment_ids, copy_only_empty)
            .into_writes()?;
        Ok(copy::apply(&mut self.overlay, &writes))
    }

    pub fn view(&self) -> GridView {
        let cells = self
            .students
            .iter()
            .map(|s| {
                self.categories
                    .iter()
                    .map(|c| {
                        self.overlay
                            .effective(s.enrollment_id, c.id)
                            .map(|eff| GridCellView {
                                cell: eff.to_cell(),
                                dirty: eff.is_pending(),
                            })
                    })
                    .collect()
            })
            .collect();

        GridView {
            scope: self.scope,
            topic: self.topic.clone(),
            students: self.students.clone(),
            categories: self.categories.clone(),
            cells,
            pending_count: self.overlay.pending_len(),
        }
    }

    pub fn summary(&self) -> GridSummary {
        let total = self.categories.len();
        let students: Vec<StudentProgress> = self
            .students
            .iter()
            .map(|s| {
                let filled = self
                    .categories
                    .iter()
                    .filter(|c| self.overlay.effective(s.enrollment_id, c.id).is_some())
                    .count();
                let pending = self
                    .categories
                    .iter()
                    .filter(|c| self.overlay.is_dirty(s.enrollment_id, c.id))
                    .count();
                StudentProgress {
                    enrollment_id: s.enrollment_id,
                    filled,
                    pending,
                    total,
                    complete: total > 0 && filled == total,
                }
            })
            .collect();

        GridSummary {
            total_cells: total * students.len(),
            filled_cells: students.iter().map(|p| p.filled).sum(),
            pending_cells: students.iter().map(|p| p.pending).sum(),
            complete_students: students.iter().filter(|p| p.complete).count(),
            students,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionReport {
    pub changed: bool,
    pub cleared: Vec<SelectionLevel>,
    pub grid_open: bool,
    /// Unsaved edits lost because the grid session ended.
    pub dropped_pending: usize,
}

pub struct EvaluationSession {
    teacher_id: i64,
    cascade: CascadeEngine,
    grid: Option<GridSession>,
}

impl EvaluationSession {
    pub fn new(teacher_id: i64, include_inactive_topics: bool) -> Self {
        Self {
            teacher_id,
            cascade: CascadeEngine::new(include_inactive_topics),
            grid: None,
        }
    }

    pub fn teacher_id(&self) -> i64 {
        self.teacher_id
    }

    pub fn cascade(&self) -> &CascadeEngine {
        &self.cascade
    }

    pub fn cascade_mut(&mut self) -> &mut CascadeEngine {
        &mut self.cascade
    }

    pub fn grid(&self) -> Option<&GridSession> {
        self.grid.as_ref()
    }

    pub fn grid_mut(&mut self) -> Option<&mut GridSession> {
        self.grid.as_mut()
    }

    pub fn revision(&self) -> u64 {
        self.cascade.state().revision()
    }

    pub fn options_for(
        &mut self,
        level: SelectionLevel,
        source: &dyn CatalogSource,
    ) -> EricaResult<Vec<EntityRef>> {
        self.cascade.options_for(level, source)
    }

    fn close_grid(&mut self) -> usize {
        let Some(grid) = self.grid.take() else {
            return 0;
        };
        let dropped = grid.overlay().pending_len();
        if dropped > 0 {
            warn!(
                topic_id = grid.scope().topic_id,
                dropped, "grid closed with unsaved evaluations"
            );
        }
        dropped
    }

    fn after_change(
        &mut self,
        outcome: SelectOutcome,
        backend: &dyn EvaluationBackend,
    ) -> EricaResult<SelectionReport> {
        let mut report = SelectionReport {
            changed: outcome.changed,
            cleared: outcome.cleared,
            grid_open: self.grid.is_some(),
            dropped_pending: 0,
        };
        if !outcome.changed {
            return Ok(report);
        }

        report.dropped_pending = self.close_grid();
        let state = self.cascade.state();
        if let (Some(topic), Some(section_id)) = (
            state.get(SelectionLevel::Topic).cloned(),
            state.id(SelectionLevel::Section),
        ) {
            let scope = GridScope {
                topic_id: topic.id,
                teacher_id: self.teacher_id,
            };
            let revision = state.revision();
            match GridSession::open(scope, topic, section_id, backend, revision) {
                Ok(grid) => {
                    info!(
                        topic_id = scope.topic_id,
                        teacher_id = scope.teacher_id,
                        students = grid.students().len(),
                        categories = grid.categories().len(),
                        persisted = grid.overlay().persisted_len(),
                        "grid opened"
                    );
                    self.grid = Some(grid);
                }
                Err(e) => {
                    // Keep the cascade consistent with the (absent) grid.
                    let _ = self.cascade.select_level(SelectionLevel::Topic, None);
                    return Err(e);
                }
            }
        }
        report.grid_open = self.grid.is_some();
        Ok(report)
    }

    pub fn select_level(
        &mut self,
        level: SelectionLevel,
        value: Option<EntityRef>,
        backend: &dyn EvaluationBackend,
    ) -> EricaResult<SelectionReport> {
        let outcome = self.cascade.select_level(level, value)?;
        self.after_change(outcome, backend)
    }

    pub fn go_back(&mut self, backend: &dyn EvaluationBackend) -> EricaResult<SelectionReport> {
        let outcome = self.cascade.go_back();
        self.after_change(outcome, backend)
    }

    pub fn reload_grid(&mut self, backend: &dyn EvaluationBackend) -> Option<EricaResult<usize>> {
        let revision = self.revision();
        self.grid.as_mut().map(|g| g.reload(backend, revision))
    }

    pub fn save_grid(&mut self, backend: &dyn EvaluationBackend) -> Option<EricaResult<SaveReport>> {
        let revision = self.revision();
        self.grid.as_mut().map(|g| g.save(backend, revision))
    }
}

impl std::fmt::Debug for GridSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GridSession")
            .field("scope", &self.scope)
            .field("students", &self.students.len())
            .field("categories", &self.categories.len())
            .field("pending", &self.overlay.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PendingChange, ScaleLevel, Topic};
    use crate::topics::TopicQuery;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct MemoryBackend {
        records: RefCell<Vec<EvaluationRecord>>,
        fail_save: bool,
        fail_fetch: Cell<bool>,
    }

    impl CatalogSource for MemoryBackend {
        fn bimesters(&self) -> anyhow::Result<Vec<EntityRef>> {
            Ok(vec![EntityRef::new(1, "I")])
        }
        fn weeks(&self, _: i64) -> anyhow::Result<Vec<EntityRef>> {
            Ok(vec![EntityRef::new(2, "S1")])
        }
        fn grades(&self) -> anyhow::Result<Vec<EntityRef>> {
            Ok(vec![EntityRef::new(3, "1°")])
        }
        fn sections(&self, _: i64) -> anyhow::Result<Vec<EntityRef>> {
            Ok(vec![EntityRef::new(4, "A")])
        }
        fn courses(&self, _: i64, _: i64) -> anyhow::Result<Vec<EntityRef>> {
            Ok(vec![EntityRef::new(5, "Math")])
        }
        fn topics(&self, q: &TopicQuery) -> anyhow::Result<Vec<Topic>> {
            Ok(vec![Topic {
                id: 6,
                name: "Sets".into(),
                course_id: q.course_id,
                section_id: q.section_id,
                academic_week_id: q.academic_week_id,
                is_active: true,
            }])
        }
    }

    impl EvaluationBackend for MemoryBackend {
        fn students(&self, _: i64) -> anyhow::Result<Vec<Student>> {
            Ok([(21, "Zoe", "Vargas"), (10, "Ana", "Alva"), (20, "Luis", "Lopez")]
                .into_iter()
                .map(|(e, g, l)| Student {
                    enrollment_id: e,
                    student_id: e + 1000,
                    given_names: g.into(),
                    last_names: l.into(),
                })
                .collect())
        }
        fn categories(&self) -> anyhow::Result<Vec<Category>> {
            Ok(vec![
                Category {
                    id: 2,
                    code: "B".into(),
                    name: "B".into(),
                    order: 2,
                },
                Category {
                    id: 1,
                    code: "E".into(),
                    name: "E".into(),
                    order: 1,
                },
            ])
        }
        fn scale(&self) -> anyhow::Result<Vec<ScaleLevel>> {
            Ok(vec![])
        }
        fn fetch_evaluations(&self, _: &GridScope) -> anyhow::Result<Vec<EvaluationRecord>> {
            if self.fail_fetch.get() {
                anyhow::bail!("fetch timed out");
            }
            Ok(self.records.borrow().clone())
        }
        fn save_evaluations(
            &self,
            _: &GridScope,
            changes: &[PendingChange],
        ) -> anyhow::Result<Vec<WriteOutcome>> {
            if self.fail_save {
                anyhow::bail!("backend unavailable");
            }
            let mut out = Vec::new();
            for c in changes {
                if c.scale_code == "X" {
                    out.push(WriteOutcome::rejected(c, "unknown_scale", "bad"));
                    continue;
                }
                let mut records = self.records.borrow_mut();
                records.retain(|r| r.key() != c.key());
                records.push(EvaluationRecord {
                    evaluation_id: c.key().to_string(),
                    enrollment_id: c.enrollment_id,
                    category_id: c.category_id,
                    scale_code: c.scale_code.clone(),
                    points: 1.0,
                    notes: c.notes.clone(),
                    evaluated_at: "now".into(),
                    created_at: "now".into(),
                });
                out.push(WriteOutcome::saved(c));
            }
            Ok(out)
        }
    }

    fn open_session(backend: &MemoryBackend) -> EvaluationSession {
        let mut session = EvaluationSession::new(77, false);
        for level in SelectionLevel::ALL {
            let option = session
                .options_for(level, backend)
                .unwrap()
                .into_iter()
                .next()
                .unwrap();
            session.select_level(level, Some(option), backend).unwrap();
        }
        session
    }

    #[test]
    fn selecting_topic_opens_sorted_grid() {
        let backend = MemoryBackend::default();
        let session = open_session(&backend);
        let grid = session.grid().expect("grid open");
        assert_eq!(grid.scope().teacher_id, 77);
        assert_eq!(grid.scope().topic_id, 6);
        let rows: Vec<i64> = grid.students().iter().map(|s| s.enrollment_id).collect();
        assert_eq!(rows, vec![10, 20, 21]);
        let cols: Vec<i64> = grid.categories().iter().map(|c| c.id).collect();
        assert_eq!(cols, vec![1, 2]);
    }

    #[test]
    fn changing_an_ancestor_closes_grid_and_reports_dropped_edits() {
        let backend = MemoryBackend::default();
        let mut session = open_session(&backend);
        session
            .grid_mut()
            .unwrap()
            .overlay_mut()
            .set_pending(10, 1, "E", None);

        let report = session
            .select_level(SelectionLevel::Grade, Some(EntityRef::new(99, "2°")), &backend)
            .unwrap();
        assert!(report.changed);
        assert!(!report.grid_open);
        assert_eq!(report.dropped_pending, 1);
        assert!(session.grid().is_none());
    }

    #[test]
    fn reselecting_topic_keeps_pending_edits() {
        let backend = MemoryBackend::default();
        let mut session = open_session(&backend);
        session
            .grid_mut()
            .unwrap()
            .overlay_mut()
            .set_pending(10, 1, "E", None);
        let report = session
            .select_level(SelectionLevel::Topic, Some(EntityRef::new(6, "Sets")), &backend)
            .unwrap();
        assert!(!report.changed);
        assert!(report.grid_open);
        assert_eq!(session.grid().unwrap().overlay().pending_len(), 1);
    }

    #[test]
    fn save_keeps_rejected_writes_pending() {
        let backend = MemoryBackend::default();
        let mut session = open_session(&backend);
        {
            let overlay = session.grid_mut().unwrap().overlay_mut();
            overlay.set_pending(10, 1, "E", None);
            overlay.set_pending(20, 2, "X", None);
        }
        let report = session.save_grid(&backend).unwrap().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.saved, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.pending_after, 1);
        assert_eq!(report.persisted_after, 1);

        let grid = session.grid().unwrap();
        assert!(!grid.overlay().is_dirty(10, 1));
        assert_eq!(grid.overlay().effective(10, 1).unwrap().scale_code(), "E");
        assert!(grid.overlay().is_dirty(20, 2));
    }

    #[test]
    fn failed_save_loses_nothing() {
        let backend = MemoryBackend {
            fail_save: true,
            ..Default::default()
        };
        let mut session = open_session(&backend);
        session
            .grid_mut()
            .unwrap()
            .overlay_mut()
            .set_pending(10, 1, "E", None);
        assert!(session.save_grid(&backend).unwrap().is_err());
        assert_eq!(session.grid().unwrap().overlay().pending_len(), 1);
    }

    #[test]
    fn failed_refetch_after_save_keeps_edits_pending() {
        let backend = MemoryBackend::default();
        let mut session = open_session(&backend);
        session
            .grid_mut()
            .unwrap()
            .overlay_mut()
            .set_pending(10, 1, "E", None);

        backend.fail_fetch.set(true);
        let err = session
            .save_grid(&backend)
            .unwrap()
            .expect_err("re-fetch fails");
        assert_eq!(err.code(), "source_failed");

        let grid = session.grid().unwrap();
        assert_eq!(grid.overlay().pending_len(), 1);
        let cell = grid.overlay().effective(10, 1).expect("edit still visible");
        assert_eq!(cell.scale_code(), "E");
        assert!(cell.is_pending());

        // The retry re-sends the same write and settles once fetching works.
        backend.fail_fetch.set(false);
        let report = session.save_grid(&backend).unwrap().unwrap();
        assert_eq!(report.saved, 1);
        assert_eq!(report.pending_after, 0);
        assert_eq!(report.persisted_after, 1);
        let grid = session.grid().unwrap();
        assert!(!grid.overlay().effective(10, 1).unwrap().is_pending());
    }

    #[test]
    fn stale_reload_is_discarded() {
        let backend = MemoryBackend::default();
        let mut session = open_session(&backend);
        let revision = session.revision();
        let grid = session.grid_mut().unwrap();
        let first = grid.begin_reload(revision);
        let second = grid.begin_reload(revision);
        assert!(grid.finish_reload(first, revision, vec![]).is_err());
        assert!(grid.finish_reload(second, revision, vec![]).is_ok());
    }

    #[test]
    fn summary_counts_effective_cells() {
        let backend = MemoryBackend::default();
        backend.records.borrow_mut().push(EvaluationRecord {
            evaluation_id: "x".into(),
            enrollment_id: 10,
            category_id: 2,
            scale_code: "B".into(),
            points: 2.0,
            notes: None,
            evaluated_at: "t".into(),
            created_at: "t".into(),
        });
        let mut session = open_session(&backend);
        session
            .grid_mut()
            .unwrap()
            .overlay_mut()
            .set_pending(10, 1, "E", None);

        let summary = session.grid().unwrap().summary();
        assert_eq!(summary.total_cells, 6);
        assert_eq!(summary.filled_cells, 2);
        assert_eq!(summary.pending_cells, 1);
        assert_eq!(summary.complete_students, 1);
        assert!(summary.students[0].complete);
    }

    #[test]
    fn copy_apply_writes_pending_cells() {
        let backend = MemoryBackend::default();
        let mut session = open_session(&backend);
        let grid = session.grid_mut().unwrap();
        grid.overlay_mut().set_pending(10, 1, "E", None);
        assert_eq!(grid.copy_apply(10, &[20, 21], true).unwrap(), 2);
        assert!(grid.overlay().is_dirty(21, 1));

        // 21 already holds everything 20 could give it.
        assert_eq!(grid.copy_apply(20, &[21], true).unwrap(), 0);

        let empty = grid.copy_apply(99, &[21], true).expect_err("nothing to copy");
        assert_eq!(empty.code(), "empty_source_evaluation");
    }
}
