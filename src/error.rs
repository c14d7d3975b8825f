use uuid::Uuid;

use crate::models::ReportStatus;

/// Failure of a single language-model attempt, or of the whole fallback chain.
///
/// None of these ever reach a citizen: the orchestrator converts them into the
/// unclassified fallback result.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    #[error("model service unavailable")]
    ServiceUnavailable,

    #[error("HTTP {0} from model service")]
    HttpStatus(u16),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("no JSON object found in model output")]
    MissingJson,

    #[error("malformed JSON in model output: {0}")]
    MalformedJson(String),

    #[error("classification deadline of {0} seconds exceeded")]
    DeadlineExceeded(u64),

    #[error("classification unavailable: all {attempted} model identifiers failed")]
    Exhausted { attempted: usize },
}

impl ClassificationError {
    /// Transient conditions that earn a short pause before the next model.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ServiceUnavailable)
    }
}

/// Rejected report operations. Every variant is a real, caller-visible error.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("invalid status '{0}'")]
    InvalidStatus(String),

    #[error("status change from {from} to {to} is not allowed")]
    TransitionNotAllowed { from: ReportStatus, to: ReportStatus },

    #[error("report is deleted")]
    AlreadyDeleted,

    #[error("report {0} not found")]
    NotFound(Uuid),

    #[error("report {0} was modified concurrently")]
    ConcurrentUpdate(Uuid),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

impl ReportError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for callers that map errors onto a wire format.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::InvalidStatus(_) => "invalid_status",
            Self::TransitionNotAllowed { .. } => "transition_not_allowed",
            Self::AlreadyDeleted => "already_deleted",
            Self::NotFound(_) => "not_found",
            Self::ConcurrentUpdate(_) => "concurrent_update",
            Self::Storage(_) => "storage_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_transient() {
        assert!(ClassificationError::ServiceUnavailable.is_transient());
        assert!(!ClassificationError::Timeout(5).is_transient());
        assert!(!ClassificationError::HttpStatus(500).is_transient());
        assert!(!ClassificationError::MissingJson.is_transient());
    }

    #[test]
    fn validation_error_names_the_field() {
        let err = ReportError::validation("title", "must be at least 5 characters");
        assert_eq!(err.code(), "validation_error");
        assert_eq!(
            err.to_string(),
            "invalid title: must be at least 5 characters"
        );
    }
}
