//! Pending edits layered over the persisted evaluation snapshot.
//!
//! Reads go through [`OverlayStore::effective`]: a pending change always
//! shadows the persisted record for the same (enrollment, category) cell.
//! The store never touches the network and none of its operations fail.

use crate::model::{CellKey, EvaluationRecord, PendingChange};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effective<'a> {
    Pending(&'a PendingChange),
    Persisted(&'a EvaluationRecord),
}

impl<'a> Effective<'a> {
    pub fn scale_code(&self) -> &'a str {
        match self {
            Self::Pending(p) => &p.scale_code,
            Self::Persisted(r) => &r.scale_code,
        }
    }

    pub fn notes(&self) -> Option<&'a str> {
        match self {
            Self::Pending(p) => p.notes.as_deref(),
            Self::Persisted(r) => r.notes.as_deref(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn to_cell(&self) -> EffectiveCell {
        EffectiveCell {
            scale_code: self.scale_code().to_string(),
            notes: self.notes().map(str::to_string),
            source: if self.is_pending() {
                CellSource::Pending
            } else {
                CellSource::Persisted
            },
            points: match self {
                Self::Persisted(r) => Some(r.points),
                Self::Pending(_) => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellSource {
    Pending,
    Persisted,
}

/// Owned, serializable view of an effective cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveCell {
    pub scale_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub source: CellSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<f64>,
}

#[derive(Debug, Default)]
pub struct OverlayStore {
    persisted: HashMap<CellKey, EvaluationRecord>,
    pending: BTreeMap<CellKey, PendingChange>,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the persisted snapshot. Pending changes survive the reload.
    pub fn load(&mut self, persisted: Vec<EvaluationRecord>) {
        self.persisted.clear();
        for record in persisted {
            let key = record.key();
            if let Some(previous) = self.persisted.insert(key, record) {
                warn!(
                    cell = %key,
                    dropped = %previous.evaluation_id,
                    "duplicate persisted evaluation for cell; keeping the later one"
                );
            }
        }
    }

    pub fn set_pending(
        &mut self,
        enrollment_id: i64,
        category_id: i64,
        scale_code: impl Into<String>,
        notes: Option<String>,
    ) {
        let change = PendingChange {
            enrollment_id,
            category_id,
            scale_code: scale_code.into(),
            notes,
        };
        self.pending.insert(change.key(), change);
    }

    pub fn effective(&self, enrollment_id: i64, category_id: i64) -> Option<Effective<'_>> {
        let key = CellKey::new(enrollment_id, category_id);
        if let Some(p) = self.pending.get(&key) {
            return Some(Effective::Pending(p));
        }
        self.persisted.get(&key).map(Effective::Persisted)
    }

    pub fn is_dirty(&self, enrollment_id: i64, category_id: i64) -> bool {
        self.pending
            .contains_key(&CellKey::new(enrollment_id, category_id))
    }

    /// All pending changes, ordered by (enrollment, category).
    pub fn diff(&self) -> Vec<PendingChange> {
        self.pending.values().cloned().collect()
    }

    /// Removes the listed keys, or everything when `keys` is `None`.
    /// Only call this once persistence has been confirmed (or on discard).
    pub fn clear_pending(&mut self, keys: Option<&[CellKey]>) -> usize {
        match keys {
            None => {
                let n = self.pending.len();
                self.pending.clear();
                n
            }
            Some(keys) => keys
                .iter()
                .filter(|k| self.pending.remove(*k).is_some())
                .count(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn persisted_len(&self) -> usize {
        self.persisted.len()
    }
}
