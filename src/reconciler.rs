//! Feature reconciliation: align an arbitrary input table to the feature
//! schema a model was trained on.
//!
//! Rows are never reordered, filtered or duplicated. Row `i` of the
//! reconciled matrix and row `i` of the identifier table always come from
//! row `i` of the input.

use crate::config::{MissingFill, ScoringConfig};
use crate::error::{Result, ScoringError};
use crate::models::schema::{FeatureKind, FeatureSchema};
use crate::types::table::{Column, ColumnData, Table};
use tracing::{debug, info, warn};

/// What reconciliation changed, for logs and callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Input columns absent from the schema, dropped
    pub dropped_extra: Vec<String>,
    /// Schema features absent from the input, filled
    pub filled_missing: Vec<String>,
    /// Text columns that could not be parsed as numbers
    pub kept_as_text: Vec<String>,
    /// Features declared numeric that are still text after coercion
    pub type_mismatches: Vec<String>,
    /// Non-numeric columns skipped in degraded mode
    pub skipped_non_numeric: Vec<String>,
    /// No schema was available
    pub degraded: bool,
}

/// Reconciled feature matrix plus the identifiers of each row.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub matrix: Table,
    pub identifiers: Table,
    pub report: ReconcileReport,
}

/// Column alignment and type coercion policy
pub struct FeatureReconciler {
    /// Target-like columns never used as features
    target_columns: Vec<String>,
    /// Policy for schema features missing from the input
    missing_fill: MissingFill,
}

impl FeatureReconciler {
    pub fn new(target_columns: Vec<String>, missing_fill: MissingFill) -> Self {
        Self {
            target_columns,
            missing_fill,
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(config.target_columns.clone(), config.missing_fill)
    }

    /// Reconcile `table` against `schema`, or against the numeric subset of
    /// its own columns when the schema is unknown.
    pub fn reconcile(
        &self,
        table: &Table,
        schema: Option<&FeatureSchema>,
        id_columns: &[String],
    ) -> Result<Reconciliation> {
        let identifiers = extract_identifiers(table, id_columns)?;

        let working: Vec<&Column> = table
            .columns()
            .iter()
            .filter(|c| !id_columns.contains(&c.name) && !self.target_columns.contains(&c.name))
            .collect();

        let reconciliation = match schema {
            Some(schema) => self.align_to_schema(table.n_rows(), &working, schema, identifiers)?,
            None => numeric_subset(table.n_rows(), &working, identifiers)?,
        };

        ensure_aligned(&reconciliation, table.n_rows())?;

        info!(
            rows = reconciliation.matrix.n_rows(),
            features = reconciliation.matrix.n_cols(),
            degraded = reconciliation.report.degraded,
            "Input reconciled"
        );
        Ok(reconciliation)
    }

    fn align_to_schema(
        &self,
        n_rows: usize,
        working: &[&Column],
        schema: &FeatureSchema,
        identifiers: Table,
    ) -> Result<Reconciliation> {
        let mut report = ReconcileReport::default();

        report.dropped_extra = working
            .iter()
            .filter(|c| !schema.contains(&c.name))
            .map(|c| c.name.clone())
            .collect();
        if !report.dropped_extra.is_empty() {
            warn!(
                columns = ?report.dropped_extra,
                "Dropping columns not seen in training"
            );
        }

        report.filled_missing = schema
            .names()
            .filter(|name| !working.iter().any(|c| c.name == *name))
            .map(str::to_string)
            .collect();
        if !report.filled_missing.is_empty() {
            let Some(fill) = self.missing_fill.value() else {
                return Err(ScoringError::MissingFeatures(report.filled_missing));
            };
            warn!(
                columns = ?report.filled_missing,
                fill = fill,
                "Creating missing feature columns with fill value"
            );
        }

        let mut matrix = Table::with_rows(n_rows);
        for feature in schema.features() {
            let column = match working.iter().find(|c| c.name == feature.name) {
                Some(column) => {
                    let data = coerce(&column.data);
                    if !data.is_numeric() {
                        report.kept_as_text.push(feature.name.clone());
                        if feature.kind == Some(FeatureKind::Numeric) {
                            report.type_mismatches.push(feature.name.clone());
                        }
                    }
                    Column::new(feature.name.clone(), data)
                }
                None => {
                    let fill = self.missing_fill.value().unwrap_or_default();
                    Column::floats(feature.name.clone(), vec![fill; n_rows])
                }
            };
            matrix.push(column)?;
        }

        if !report.kept_as_text.is_empty() {
            debug!(columns = ?report.kept_as_text, "Columns left as text after numeric coercion");
        }
        if !report.type_mismatches.is_empty() {
            warn!(
                columns = ?report.type_mismatches,
                "Features declared numeric contain non-numeric values"
            );
        }

        Ok(Reconciliation {
            matrix,
            identifiers,
            report,
        })
    }
}

/// Copy the identifier columns, in input row order.
fn extract_identifiers(table: &Table, id_columns: &[String]) -> Result<Table> {
    let mut identifiers = Table::with_rows(table.n_rows());
    for name in id_columns {
        if identifiers.contains(name) {
            continue;
        }
        let column = table
            .column(name)
            .ok_or_else(|| ScoringError::MissingIdentifier(name.clone()))?;
        identifiers.push(column.clone())?;
    }
    Ok(identifiers)
}

/// Degraded path: numeric columns in input order, untouched.
fn numeric_subset(
    n_rows: usize,
    working: &[&Column],
    identifiers: Table,
) -> Result<Reconciliation> {
    let mut report = ReconcileReport {
        degraded: true,
        ..Default::default()
    };

    let mut matrix = Table::with_rows(n_rows);
    for column in working {
        if column.data.is_numeric() {
            matrix.push((*column).clone())?;
        } else {
            report.skipped_non_numeric.push(column.name.clone());
        }
    }

    warn!(
        features = ?matrix.column_names(),
        skipped = ?report.skipped_non_numeric,
        "Feature schema unknown, using numeric columns only"
    );
    if matrix.n_cols() == 0 {
        warn!("No numeric feature columns available in degraded mode");
    }

    Ok(Reconciliation {
        matrix,
        identifiers,
        report,
    })
}

/// Text columns become floats only if every value parses; integers widen to floats.
fn coerce(data: &ColumnData) -> ColumnData {
    match data {
        ColumnData::Text(values) => values
            .iter()
            .map(|v| v.trim().parse::<f64>().ok())
            .collect::<Option<Vec<_>>>()
            .map(ColumnData::Float)
            .unwrap_or_else(|| data.clone()),
        ColumnData::Int(values) => ColumnData::Float(values.iter().map(|&v| v as f64).collect()),
        ColumnData::Float(_) => data.clone(),
    }
}

fn ensure_aligned(reconciliation: &Reconciliation, expected: usize) -> Result<()> {
    for (stage, actual) in [
        ("reconciled matrix", reconciliation.matrix.n_rows()),
        ("identifier table", reconciliation.identifiers.n_rows()),
    ] {
        if actual != expected {
            return Err(ScoringError::RowCountMismatch {
                stage,
                expected,
                actual,
            });
        }
    }
    Ok(())
}
