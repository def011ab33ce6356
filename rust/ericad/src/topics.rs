//! Topic fetch for the last cascade step, with last-request-wins correlation.

use crate::cascade::{CascadeState, SelectionLevel};
use crate::error::{EricaError, EricaResult};
use crate::model::Topic;
use crate::source::CatalogSource;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicQuery {
    pub course_id: i64,
    pub section_id: i64,
    pub academic_week_id: i64,
    /// `None` means active and inactive topics alike.
    pub is_active: Option<bool>,
}

impl TopicQuery {
    pub fn from_state(state: &CascadeState, include_inactive: bool) -> EricaResult<Self> {
        state.require_ancestors(SelectionLevel::Topic)?;
        Ok(Self {
            course_id: state.id(SelectionLevel::Course).unwrap_or_default(),
            section_id: state.id(SelectionLevel::Section).unwrap_or_default(),
            academic_week_id: state.id(SelectionLevel::Week).unwrap_or_default(),
            is_active: if include_inactive { None } else { Some(true) },
        })
    }
}

/// Tag attached to an outgoing fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RequestTag {
    pub seq: u64,
    pub revision: u64,
}

/// Only the most recent request may land, and only while the cascade is
/// still at the revision that triggered it.
#[derive(Debug, Default)]
pub struct RequestGate {
    next_seq: u64,
    latest: Option<u64>,
}

impl RequestGate {
    pub fn issue(&mut self, revision: u64) -> RequestTag {
        self.next_seq += 1;
        self.latest = Some(self.next_seq);
        RequestTag {
            seq: self.next_seq,
            revision,
        }
    }

    pub fn admit(&mut self, tag: RequestTag, current_revision: u64) -> EricaResult<()> {
        if self.latest != Some(tag.seq) || tag.revision != current_revision {
            warn!(
                seq = tag.seq,
                tag_revision = tag.revision,
                current_revision,
                "discarding stale response"
            );
            return Err(EricaError::StaleResponseDiscarded { seq: tag.seq });
        }
        self.latest = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TopicLoader {
    gate: RequestGate,
}

impl TopicLoader {
    /// Starts a fetch for the current (course, section, week).
    pub fn begin(
        &mut self,
        state: &CascadeState,
        include_inactive: bool,
    ) -> EricaResult<(RequestTag, TopicQuery)> {
        let query = TopicQuery::from_state(state, include_inactive)?;
        Ok((self.gate.issue(state.revision()), query))
    }

    /// Accepts a fetched topic list, or discards it if the selection moved on.
    pub fn finish(
        &mut self,
        state: &CascadeState,
        tag: RequestTag,
        mut topics: Vec<Topic>,
    ) -> EricaResult<Vec<Topic>> {
        self.gate.admit(tag, state.revision())?;
        topics.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(topics)
    }

    pub fn load(
        &mut self,
        state: &CascadeState,
        source: &dyn CatalogSource,
        include_inactive: bool,
    ) -> EricaResult<Vec<Topic>> {
        let (tag, query) = self.begin(state, include_inactive)?;
        let topics = source.topics(&query)?;
        self.finish(state, tag, topics)
    }
}
