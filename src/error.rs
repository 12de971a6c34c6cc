//! Fatal error taxonomy for a scoring run.
//!
//! Anything here aborts the run. Conditions that only reduce the richness of
//! the result (unknown schema, dropped columns, missing probabilities) are
//! logged as warnings instead and never surface as a `ScoringError`.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of one model source, kept for the `ModelNotFound` report.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFailure {
    pub source: String,
    pub reason: String,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("model '{name}' ({version_or_stage}) not found in any source: {}", format_failures(.failures))]
    ModelNotFound {
        name: String,
        version_or_stage: String,
        failures: Vec<SourceFailure>,
    },

    #[error("identifier column '{0}' not found in input table")]
    MissingIdentifier(String),

    #[error("feature schema is invalid: duplicate feature name '{0}'")]
    InvalidSchema(String),

    #[error("input is missing required features {0:?}")]
    MissingFeatures(Vec<String>),

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("{stage} returned {actual} rows for {expected} input rows")]
    RowCountMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("could not write results to {primary} nor to fallback {fallback}: {reason}")]
    SinkWrite {
        primary: String,
        fallback: PathBuf,
        reason: String,
    },

    #[error("failed to read input table: {0}")]
    Input(String),

    #[error("storage error: {0}")]
    Storage(String),
}

fn format_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, ScoringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found_lists_every_source() {
        let err = ScoringError::ModelNotFound {
            name: "credit-rfc".to_string(),
            version_or_stage: "Production".to_string(),
            failures: vec![
                SourceFailure {
                    source: "registry".to_string(),
                    reason: "stage not defined".to_string(),
                },
                SourceFailure {
                    source: "artifacts".to_string(),
                    reason: "model.onnx not found".to_string(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("registry: stage not defined"));
        assert!(msg.contains("artifacts: model.onnx not found"));
    }
}
