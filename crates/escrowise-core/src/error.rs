//! Error types for Escrowise.

use thiserror::Error;

/// Errors produced while generating, delivering or administering reports.
#[derive(Debug, Error)]
pub enum EscrowiseError {
    #[error("Unknown report type: {0}")]
    UnknownReportType(String),

    #[error("Invalid report parameters: {0}")]
    InvalidParameters(String),

    #[error("Scheduled report not found: {0}")]
    ReportNotFound(String),

    #[error("Scheduled report {0} has no recipients")]
    NoRecipients(String),

    #[error("Scheduled report {0} is already being dispatched")]
    ReportInProgress(String),

    #[error("Data query failed ({context}): {message}")]
    DataQuery { context: String, message: String },

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Report {id} timed out after {secs}s")]
    Timeout { id: String, secs: u64 },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EscrowiseError {
    /// Shorthand for a store failure.
    pub fn query(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::DataQuery {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Re-label a store failure with the operation that triggered it.
    /// Other variants pass through untouched.
    pub fn with_context(self, context: &str) -> Self {
        match self {
            Self::DataQuery { message, .. } => Self::DataQuery {
                context: context.to_string(),
                message,
            },
            other => other,
        }
    }

    /// Whether leaving `next_run_at` untouched gives this failure another chance
    /// on the next poll. Non-retryable failures will still be re-attempted,
    /// they just cannot succeed until someone edits the report.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DataQuery { .. }
                | Self::Notifier(_)
                | Self::Timeout { .. }
                | Self::ReportInProgress(_)
                | Self::Io(_)
        )
    }
}

/// Result type alias for Escrowise operations.
pub type Result<T> = std::result::Result<T, EscrowiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_context_relabels_query_errors() {
        let err = EscrowiseError::query("transactions", "no such table").with_context("financial report");
        assert_eq!(
            err.to_string(),
            "Data query failed (financial report): no such table"
        );
    }

    #[test]
    fn test_with_context_keeps_other_variants() {
        let err = EscrowiseError::UnknownReportType("bogus".into()).with_context("x");
        assert!(matches!(err, EscrowiseError::UnknownReportType(t) if t == "bogus"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EscrowiseError::Notifier("smtp down".into()).is_retryable());
        assert!(EscrowiseError::query("q", "locked").is_retryable());
        assert!(!EscrowiseError::UnknownReportType("x".into()).is_retryable());
        assert!(!EscrowiseError::ReportNotFound("id".into()).is_retryable());
    }
}
