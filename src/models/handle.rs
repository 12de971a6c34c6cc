//! The `ModelHandle` interface every loaded model is normalized into.

use crate::types::table::{Column, ColumnData, Table};
use anyhow::Result;
use serde::Deserialize;

/// Where a handle was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelOrigin {
    Registry,
    Artifact,
}

impl std::fmt::Display for ModelOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelOrigin::Registry => write!(f, "registry"),
            ModelOrigin::Artifact => write!(f, "artifact"),
        }
    }
}

/// One declared input of a model signature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignatureInput {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub dtype: Option<String>,
}

/// Declared input schema attached to a model package.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ModelSignature {
    #[serde(default)]
    pub inputs: Vec<SignatureInput>,
}

/// Contents of a package's `metadata.json`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub flavor: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub signature: Option<ModelSignature>,
}

/// Output of a predict call.
#[derive(Debug, Clone, PartialEq)]
pub enum Predictions {
    /// One label per row.
    Labels(ColumnData),
    /// Several derived outputs per row, one column each.
    Outputs(Vec<Column>),
}

impl Predictions {
    /// Row count of the prediction, or `None` if the output columns disagree.
    pub fn n_rows(&self) -> Option<usize> {
        match self {
            Predictions::Labels(data) => Some(data.len()),
            Predictions::Outputs(columns) => {
                let first = columns.first().map(Column::len).unwrap_or(0);
                columns.iter().all(|c| c.len() == first).then_some(first)
            }
        }
    }
}

/// Per-class probabilities, stored one vector per class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    classes: Vec<Vec<f64>>,
}

impl ClassProbabilities {
    /// Build from per-class columns. All columns must be equally long.
    pub fn from_class_columns(classes: Vec<Vec<f64>>) -> Result<Self> {
        if let Some(first) = classes.first() {
            anyhow::ensure!(
                classes.iter().all(|c| c.len() == first.len()),
                "probability columns have different lengths"
            );
        }
        Ok(Self { classes })
    }

    /// Build from row-major `[rows, classes]` data.
    pub fn from_row_major(data: &[f64], n_classes: usize) -> Result<Self> {
        anyhow::ensure!(n_classes > 0, "probability output has no classes");
        anyhow::ensure!(
            data.len() % n_classes == 0,
            "probability output of {} values is not divisible into {} classes",
            data.len(),
            n_classes
        );

        let classes = (0..n_classes)
            .map(|class| data.iter().skip(class).step_by(n_classes).copied().collect())
            .collect();
        Ok(Self { classes })
    }

    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn n_rows(&self) -> usize {
        self.classes.first().map(Vec::len).unwrap_or(0)
    }

    pub fn class(&self, index: usize) -> Option<&[f64]> {
        self.classes.get(index).map(Vec::as_slice)
    }

    pub fn into_classes(self) -> Vec<Vec<f64>> {
        self.classes
    }

    /// Index of the most likely class for each row.
    pub fn argmax(&self) -> Vec<i64> {
        (0..self.n_rows())
            .map(|row| {
                let mut best = 0;
                for (class, values) in self.classes.iter().enumerate() {
                    if values[row] > self.classes[best][row] {
                        best = class;
                    }
                }
                best as i64
            })
            .collect()
    }
}

/// A loaded, callable classifier.
///
/// Downstream stages depend only on this trait. Optional capabilities have
/// default implementations that report them as absent.
pub trait ModelHandle {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// Predict over the whole matrix in one call.
    fn predict(&self, features: &Table) -> Result<Predictions>;

    /// Class probabilities, or `None` when the model cannot estimate them.
    fn predict_proba(&self, _features: &Table) -> Option<Result<ClassProbabilities>> {
        None
    }

    /// Metadata attached to the artifact, if any.
    fn metadata(&self) -> Option<&ModelMetadata> {
        None
    }

    /// Feature names recorded by the fitted estimator itself.
    fn feature_names_in(&self) -> Option<Vec<String>> {
        None
    }

    /// The wrapped model, for adapter handles.
    fn inner(&self) -> Option<&dyn ModelHandle> {
        None
    }
}

/// Adapter produced by the loader: package metadata around a native model.
pub struct PackagedModel {
    name: String,
    version: String,
    origin: ModelOrigin,
    metadata: ModelMetadata,
    model: Box<dyn ModelHandle>,
}

impl PackagedModel {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        origin: ModelOrigin,
        metadata: ModelMetadata,
        model: Box<dyn ModelHandle>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            origin,
            metadata,
            model,
        }
    }

    pub fn origin(&self) -> ModelOrigin {
        self.origin
    }
}

impl ModelHandle for PackagedModel {
    fn describe(&self) -> String {
        format!(
            "{}/{} via {} ({})",
            self.name,
            self.version,
            self.origin,
            self.model.describe()
        )
    }

    fn predict(&self, features: &Table) -> Result<Predictions> {
        self.model.predict(features)
    }

    fn predict_proba(&self, features: &Table) -> Option<Result<ClassProbabilities>> {
        self.model.predict_proba(features)
    }

    fn metadata(&self) -> Option<&ModelMetadata> {
        Some(&self.metadata)
    }

    fn inner(&self) -> Option<&dyn ModelHandle> {
        Some(self.model.as_ref())
    }
}
