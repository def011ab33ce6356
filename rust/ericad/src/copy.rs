//! Bulk copy of one student's evaluation set onto other students.
//!
//! `preview` is a pure function over the overlay: it can be called as often
//! as the UI likes (e.g. to show "N evaluations will be applied") without
//! mutating anything. `apply` turns the planned writes into pending changes.

use crate::error::{EricaError, EricaResult};
use crate::model::Category;
use crate::overlay::OverlayStore;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CopyRequest<'a> {
    pub source_enrollment_id: i64,
    pub target_enrollment_ids: &'a [i64],
    pub categories: &'a [Category],
    pub copy_only_empty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyWrite {
    pub enrollment_id: i64,
    pub category_id: i64,
    pub scale_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPreview {
    pub source_enrollment_id: i64,
    pub writes: Vec<CopyWrite>,
    pub count: usize,
    pub nothing_to_copy: bool,
    /// Cells left alone because they already hold a value (only-empty mode).
    pub skipped_existing: usize,
    /// Targets dropped from the request (the source itself).
    pub ignored_targets: Vec<i64>,
}

impl CopyPreview {
    pub fn into_writes(self) -> EricaResult<Vec<CopyWrite>> {
        if self.nothing_to_copy {
            return Err(EricaError::EmptySourceEvaluation {
                source_enrollment_id: self.source_enrollment_id,
            });
        }
        Ok(self.writes)
    }
}

struct SourceCell {
    category_id: i64,
    scale_code: String,
    notes: Option<String>,
}

/// Targets as an ordered set: caller order, first occurrence wins, and the
/// source is never its own target.
fn normalize_targets(source: i64, targets: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let mut kept: Vec<i64> = Vec::with_capacity(targets.len());
    let mut ignored = Vec::new();
    for &t in targets {
        if t == source {
            if !ignored.contains(&t) {
                ignored.push(t);
            }
            continue;
        }
        if !kept.contains(&t) {
            kept.push(t);
        }
    }
    (kept, ignored)
}

pub fn preview(overlay: &OverlayStore, req: &CopyRequest<'_>) -> CopyPreview {
    let source_cells: Vec<SourceCell> = req
        .categories
        .iter()
        .filter_map(|c| {
            overlay
                .effective(req.source_enrollment_id, c.id)
                .map(|eff| SourceCell {
                    category_id: c.id,
                    scale_code: eff.scale_code().to_string(),
                    notes: eff.notes().map(str::to_string),
                })
        })
        .collect();

    let (targets, ignored_targets) =
        normalize_targets(req.source_enrollment_id, req.target_enrollment_ids);

    let mut writes = Vec::new();
    let mut skipped_existing = 0usize;
    for &target in &targets {
        for cell in &source_cells {
            if req.copy_only_empty && overlay.effective(target, cell.category_id).is_some() {
                skipped_existing += 1;
                continue;
            }
            writes.push(CopyWrite {
                enrollment_id: target,
                category_id: cell.category_id,
                scale_code: cell.scale_code.clone(),
                notes: cell.notes.clone(),
            });
        }
    }

    CopyPreview {
        source_enrollment_id: req.source_enrollment_id,
        count: writes.len(),
        writes,
        nothing_to_copy: source_cells.is_empty(),
        skipped_existing,
        ignored_targets,
    }
}

pub fn apply(overlay: &mut OverlayStore, writes: &[CopyWrite]) -> usize {
    for w in writes {
        overlay.set_pending(
            w.enrollment_id,
            w.category_id,
            w.scale_code.clone(),
            w.notes.clone(),
        );
    }
    writes.len()
}
