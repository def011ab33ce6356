use crate::cascade::SelectionLevel;
use thiserror::Error;

/// Recoverable conditions raised by the evaluation core. None of them leave
/// the session unusable.
#[derive(Debug, Error)]
pub enum EricaError {
    #[error("cannot select {level} before {missing} is selected")]
    InvalidSelectionOrder {
        level: SelectionLevel,
        missing: SelectionLevel,
    },

    #[error("enrollment {source_enrollment_id} has no evaluations to copy")]
    EmptySourceEvaluation { source_enrollment_id: i64 },

    #[error("response for request {seq} arrived after the selection changed")]
    StaleResponseDiscarded { seq: u64 },

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl EricaError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSelectionOrder { .. } => "invalid_selection_order",
            Self::EmptySourceEvaluation { .. } => "empty_source_evaluation",
            Self::StaleResponseDiscarded { .. } => "stale_response_discarded",
            Self::Source(_) => "source_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidSelectionOrder { level, missing } => Some(serde_json::json!({
                "level": level,
                "missing": missing,
            })),
            Self::EmptySourceEvaluation {
                source_enrollment_id,
            } => Some(serde_json::json!({ "sourceEnrollmentId": source_enrollment_id })),
            Self::StaleResponseDiscarded { seq } => Some(serde_json::json!({ "seq": seq })),
            Self::Source(_) => None,
        }
    }
}

pub type EricaResult<T> = Result<T, EricaError>;
