use axum::http::StatusCode;
use thiserror::Error;

use crate::session::Step;

/// Domain errors of the wizard and the collation tool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WizardError {
    /// Programming error: a processing step ran without its prerequisite
    /// handler. Surfaced loudly, never recovered from.
    #[error("step {0} expected an active image handler, found none")]
    MissingHandler(Step),
    #[error("action belongs to step {expected}, session is at step {actual}")]
    StepMismatch { expected: Step, actual: Step },
    #[error("no shop and item files present, cannot collate; process some images first")]
    NothingToCollate,
    #[error("no compiled tables present; run collation first")]
    NotCollated,
    #[error("not logged in")]
    NotLoggedIn,
}

impl WizardError {
    pub fn status(&self) -> StatusCode {
        match self {
            WizardError::MissingHandler(_) => StatusCode::INTERNAL_SERVER_ERROR,
            WizardError::StepMismatch { .. } => StatusCode::CONFLICT,
            WizardError::NothingToCollate | WizardError::NotCollated => StatusCode::BAD_REQUEST,
            WizardError::NotLoggedIn => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<WizardError> for (StatusCode, String) {
    fn from(err: WizardError) -> Self {
        (err.status(), err.to_string())
    }
}

pub fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_handler_is_a_server_error() {
        assert_eq!(
            WizardError::MissingHandler(Step::Rotate).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn step_mismatch_is_a_conflict() {
        let err = WizardError::StepMismatch {
            expected: Step::Crop,
            actual: Step::Upload,
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.to_string().contains("crop"));
        assert!(err.to_string().contains("upload"));
    }
}
