//! Hierarchical selection (bimester → week → grade → section → course →
//! topic) that gates the evaluation grid.
//!
//! `CascadeState` keeps the prefix-filled invariant: a level can only hold a
//! value when every earlier level does, and changing a level clears every
//! later one.

use crate::error::{EricaError, EricaResult};
use crate::model::EntityRef;
use crate::source::CatalogSource;
use crate::topics::TopicLoader;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionLevel {
    Bimester,
    Week,
    Grade,
    Section,
    Course,
    Topic,
}

impl SelectionLevel {
    pub const ALL: [SelectionLevel; 6] = [
        SelectionLevel::Bimester,
        SelectionLevel::Week,
        SelectionLevel::Grade,
        SelectionLevel::Section,
        SelectionLevel::Course,
        SelectionLevel::Topic,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bimester => "bimester",
            Self::Week => "week",
            Self::Grade => "grade",
            Self::Section => "section",
            Self::Course => "course",
            Self::Topic => "topic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for SelectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the wizard currently is: the first empty level, or ready once the
/// topic is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Bimester,
    Week,
    Grade,
    Section,
    Course,
    Topic,
    Ready,
}

impl From<SelectionLevel> for WizardStep {
    fn from(level: SelectionLevel) -> Self {
        match level {
            SelectionLevel::Bimester => Self::Bimester,
            SelectionLevel::Week => Self::Week,
            SelectionLevel::Grade => Self::Grade,
            SelectionLevel::Section => Self::Section,
            SelectionLevel::Course => Self::Course,
            SelectionLevel::Topic => Self::Topic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectOutcome {
    pub changed: bool,
    pub cleared: Vec<SelectionLevel>,
}

#[derive(Debug, Clone, Default)]
pub struct CascadeState {
    slots: [Option<EntityRef>; 6],
    revision: u64,
}

impl CascadeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, level: SelectionLevel) -> Option<&EntityRef> {
        self.slots[level.index()].as_ref()
    }

    pub fn id(&self, level: SelectionLevel) -> Option<i64> {
        self.get(level).map(|e| e.id)
    }

    /// Bumped on every effective change; used to tag in-flight fetches.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn current_step(&self) -> WizardStep {
        SelectionLevel::ALL
            .into_iter()
            .find(|l| self.get(*l).is_none())
            .map(WizardStep::from)
            .unwrap_or(WizardStep::Ready)
    }

    pub fn deepest_filled(&self) -> Option<SelectionLevel> {
        SelectionLevel::ALL
            .into_iter()
            .rev()
            .find(|l| self.get(*l).is_some())
    }

    /// First empty level strictly before `level`, if any.
    pub fn missing_ancestor(&self, level: SelectionLevel) -> Option<SelectionLevel> {
        SelectionLevel::ALL[..level.index()]
            .iter()
            .copied()
            .find(|l| self.get(*l).is_none())
    }

    pub fn require_ancestors(&self, level: SelectionLevel) -> EricaResult<()> {
        match self.missing_ancestor(level) {
            Some(missing) => Err(EricaError::InvalidSelectionOrder { level, missing }),
            None => Ok(()),
        }
    }

    pub fn select_level(
        &mut self,
        level: SelectionLevel,
        value: Option<EntityRef>,
    ) -> EricaResult<SelectOutcome> {
        if let Some(v) = &value {
            self.require_ancestors(level)?;
            // Redundant clicks must not wipe descendants.
            if self.get(level).map(|cur| cur.id) == Some(v.id) {
                return Ok(SelectOutcome::default());
            }
        } else if self.get(level).is_none() {
            return Ok(SelectOutcome::default());
        }

        let cleared: Vec<SelectionLevel> = SelectionLevel::ALL[level.index() + 1..]
            .iter()
            .copied()
            .filter(|l| self.get(*l).is_some())
            .collect();
        for l in &SelectionLevel::ALL[level.index() + 1..] {
            self.slots[l.index()] = None;
        }
        self.slots[level.index()] = value;
        self.revision += 1;

        Ok(SelectOutcome {
            changed: true,
            cleared,
        })
    }

    pub fn go_back(&mut self) -> SelectOutcome {
        let Some(level) = self.deepest_filled() else {
            return SelectOutcome::default();
        };
        // Clearing never checks ancestor order, so this cannot fail.
        self.select_level(level, None).unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for level in SelectionLevel::ALL {
            obj.insert(
                level.as_str().to_string(),
                serde_json::to_value(self.get(level)).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(obj)
    }
}

/// Owns the selection together with the topic loader that serves step 6.
#[derive(Debug, Default)]
pub struct CascadeEngine {
    state: CascadeState,
    topics: TopicLoader,
    include_inactive_topics: bool,
}

impl CascadeEngine {
    pub fn new(include_inactive_topics: bool) -> Self {
        Self {
            state: CascadeState::new(),
            topics: TopicLoader::default(),
            include_inactive_topics,
        }
    }

    pub fn state(&self) -> &CascadeState {
        &self.state
    }

    pub fn set_include_inactive_topics(&mut self, include: bool) {
        self.include_inactive_topics = include;
    }

    pub fn include_inactive_topics(&self) -> bool {
        self.include_inactive_topics
    }

    pub fn current_step(&self) -> WizardStep {
        self.state.current_step()
    }

    pub fn select_level(
        &mut self,
        level: SelectionLevel,
        value: Option<EntityRef>,
    ) -> EricaResult<SelectOutcome> {
        let outcome = self.state.select_level(level, value)?;
        if outcome.changed {
            debug!(
                level = %level,
                revision = self.state.revision(),
                cleared = outcome.cleared.len(),
                "cascade level changed"
            );
        }
        Ok(outcome)
    }

    pub fn go_back(&mut self) -> SelectOutcome {
        let outcome = self.state.go_back();
        if outcome.changed {
            debug!(revision = self.state.revision(), "cascade went back");
        }
        outcome
    }

    /// Candidates for `level`, filtered by the ancestors selected right now.
    pub fn options_for(
        &mut self,
        level: SelectionLevel,
        source: &dyn CatalogSource,
    ) -> EricaResult<Vec<EntityRef>> {
        self.state.require_ancestors(level)?;
        let id = |l: SelectionLevel| self.state.id(l).unwrap_or_default();

        let options = match level {
            SelectionLevel::Bimester => source.bimesters()?,
            SelectionLevel::Week => source.weeks(id(SelectionLevel::Bimester))?,
            SelectionLevel::Grade => source.grades()?,
            SelectionLevel::Section => source.sections(id(SelectionLevel::Grade))?,
            SelectionLevel::Course => {
                source.courses(id(SelectionLevel::Grade), id(SelectionLevel::Section))?
            }
            SelectionLevel::Topic => {
                let include_inactive = self.include_inactive_topics;
                self.topics
                    .load(&self.state, source, include_inactive)?
                    .iter()
                    .map(|t| t.as_entity())
                    .collect()
            }
        };
        Ok(options)
    }
}
