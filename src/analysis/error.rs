use axum::http::StatusCode;
use thiserror::Error;

/// Failures at the oracle boundary. For create operations these never reach
/// the caller: the reconciler falls back to defaults and records the reason
/// in notes. Reanalysis surfaces them instead of overwriting stored values
/// with placeholders.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle transport error: {0}")]
    Transport(String),
    #[error("oracle returned status {0}")]
    Status(u16),
    #[error("oracle returned an empty response")]
    EmptyResponse,
}

/// Caller-facing failures of the analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Empty image/text input or a negative numeric override, rejected
    /// before any oracle call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller-supplied timestamp that cannot be repaired into a valid instant.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Reanalysis requested for a record with no underlying image.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Oracle failure during reanalysis only; creates degrade to defaults.
    #[error(transparent)]
    OracleUnavailable(#[from] OracleError),
}

impl AnalysisError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AnalysisError::InvalidInput(_)
            | AnalysisError::InvalidTimestamp(_)
            | AnalysisError::UnsupportedOperation(_) => StatusCode::BAD_REQUEST,
            AnalysisError::OracleUnavailable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn into_response_tuple(self) -> (StatusCode, String) {
        (self.status_code(), self.to_string())
    }
}
