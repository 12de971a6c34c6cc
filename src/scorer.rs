//! Batch scoring over a reconciled feature matrix

use crate::config::ScoringConfig;
use crate::error::{Result, ScoringError};
use crate::models::handle::{ClassProbabilities, ModelHandle, Predictions};
use crate::types::table::{Column, ColumnData, Table};
use tracing::{debug, info, warn};

/// Output column for single-label predictions
pub const PREDICTION_COLUMN: &str = "prediction";
/// Prefix for each column of a multi-output prediction
pub const PREDICTION_PREFIX: &str = "pred_";
/// Prefix for per-class probability columns
pub const CLASS_PROBABILITY_PREFIX: &str = "proba_class_";

/// Identifiers joined with predictions and probabilities
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringResult {
    /// Identifier columns, then prediction columns, then probability columns
    pub table: Table,
    /// Prediction column names
    pub prediction_columns: Vec<String>,
    /// Probability column names (empty when unavailable)
    pub probability_columns: Vec<String>,
    /// Positive-class probability column, for binary models
    pub positive_probability_column: Option<String>,
}

impl ScoringResult {
    pub fn n_rows(&self) -> usize {
        self.table.n_rows()
    }

    pub fn has_probabilities(&self) -> bool {
        !self.probability_columns.is_empty()
    }
}

/// Runs a model over a matrix and shapes the result table
pub struct Scorer {
    positive_probability_column: String,
}

impl Scorer {
    pub fn new(positive_probability_column: impl Into<String>) -> Self {
        Self {
            positive_probability_column: positive_probability_column.into(),
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(config.positive_probability_column.clone())
    }

    /// Score every row of `matrix` and join the output to `identifiers`.
    ///
    /// Prediction failures and row-count disagreements are fatal; anything
    /// wrong with probabilities only drops the probability columns.
    pub fn score(
        &self,
        handle: &dyn ModelHandle,
        matrix: &Table,
        identifiers: &Table,
    ) -> Result<ScoringResult> {
        let rows = matrix.n_rows();
        if identifiers.n_rows() != rows {
            return Err(ScoringError::RowCountMismatch {
                stage: "identifier table",
                expected: rows,
                actual: identifiers.n_rows(),
            });
        }

        let mut table = identifiers.clone();
        let prediction_columns = self.append_predictions(&mut table, handle, matrix)?;

        let mut probability_columns = Vec::new();
        let mut positive_probability_column = None;
        if let Some(probabilities) = self.probabilities(handle, matrix) {
            let binary = probabilities.n_classes() == 2;
            let columns = self.probability_columns(probabilities);
            let clashing: Vec<&str> = columns
                .iter()
                .map(|c| c.name.as_str())
                .filter(|name| table.contains(name))
                .collect();

            if clashing.is_empty() {
                for column in columns {
                    probability_columns.push(column.name.clone());
                    table.push(column)?;
                }
                if binary {
                    positive_probability_column = Some(self.positive_probability_column.clone());
                }
            } else {
                warn!(
                    columns = ?clashing,
                    "Probability columns clash with existing output columns, returning predictions only"
                );
            }
        }

        info!(
            model = %handle.describe(),
            rows = rows,
            predictions = ?prediction_columns,
            probabilities = probability_columns.len(),
            "Scoring complete"
        );

        Ok(ScoringResult {
            table,
            prediction_columns,
            probability_columns,
            positive_probability_column,
        })
    }

    fn append_predictions(
        &self,
        table: &mut Table,
        handle: &dyn ModelHandle,
        matrix: &Table,
    ) -> Result<Vec<String>> {
        let rows = matrix.n_rows();

        let predictions = if rows == 0 {
            debug!("Empty input, skipping model call");
            Predictions::Labels(ColumnData::Int(Vec::new()))
        } else {
            handle
                .predict(matrix)
                .map_err(|e| ScoringError::Prediction(format!("{:#}", e)))?
        };

        let actual = predictions.n_rows().unwrap_or(usize::MAX);
        if actual != rows {
            return Err(ScoringError::RowCountMismatch {
                stage: "prediction",
                expected: rows,
                actual,
            });
        }

        let columns = match predictions {
            Predictions::Labels(data) => vec![Column::new(PREDICTION_COLUMN, data)],
            Predictions::Outputs(columns) => columns
                .into_iter()
                .map(|c| Column::new(format!("{}{}", PREDICTION_PREFIX, c.name), c.data))
                .collect(),
        };

        let names = columns.iter().map(|c| c.name.clone()).collect();
        for column in columns {
            table.push(column)?;
        }
        Ok(names)
    }

    /// Probabilities when the model provides usable ones.
    fn probabilities(
        &self,
        handle: &dyn ModelHandle,
        matrix: &Table,
    ) -> Option<ClassProbabilities> {
        if matrix.n_rows() == 0 {
            return None;
        }

        match handle.predict_proba(matrix) {
            None => {
                debug!(model = %handle.describe(), "Model does not estimate probabilities");
                None
            }
            Some(Err(e)) => {
                warn!(
                    model = %handle.describe(),
                    error = %format!("{:#}", e),
                    "Probability estimation failed, returning predictions only"
                );
                None
            }
            Some(Ok(probabilities)) if probabilities.n_rows() != matrix.n_rows() => {
                warn!(
                    model = %handle.describe(),
                    expected = matrix.n_rows(),
                    actual = probabilities.n_rows(),
                    "Probability output does not match input rows, discarding it"
                );
                None
            }
            Some(Ok(probabilities)) if probabilities.n_classes() == 0 => {
                warn!(model = %handle.describe(), "Probability output has no classes");
                None
            }
            Some(Ok(probabilities)) => Some(probabilities),
        }
    }

    /// Binary models expose only the positive class; others one column per class.
    fn probability_columns(&self, probabilities: ClassProbabilities) -> Vec<Column> {
        let mut classes = probabilities.into_classes();
        if classes.len() == 2 {
            let positive = classes.swap_remove(1);
            return vec![Column::floats(self.positive_probability_column.clone(), positive)];
        }

        classes
            .into_iter()
            .enumerate()
            .map(|(i, values)| Column::floats(format!("{}{}", CLASS_PROBABILITY_PREFIX, i), values))
            .collect()
    }
}
