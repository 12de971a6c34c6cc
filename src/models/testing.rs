//! In-memory model handles for tests.

use crate::models::handle::{ClassProbabilities, ModelHandle, ModelMetadata, Predictions};
use crate::types::table::{Column, ColumnData, Table};
use anyhow::Result;
use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbaMode {
    Absent,
    Classes(usize),
    Failing,
    Truncated,
}

/// Predicts `row % 2`; class 1 probability is 0.8 on odd rows and 0.2 on even ones.
pub struct StubModel {
    proba: ProbaMode,
    multi_output: bool,
    feature_names: Option<Vec<String>>,
    metadata: Option<ModelMetadata>,
    inner: Option<Box<StubModel>>,
    pub seen_columns: RefCell<Vec<Vec<String>>>,
}

impl StubModel {
    pub fn binary() -> Self {
        Self {
            proba: ProbaMode::Classes(2),
            multi_output: false,
            feature_names: None,
            metadata: None,
            inner: None,
            seen_columns: RefCell::new(Vec::new()),
        }
    }

    pub fn with_proba(mut self, proba: ProbaMode) -> Self {
        self.proba = proba;
        self
    }

    pub fn with_multi_output(mut self) -> Self {
        self.multi_output = true;
        self
    }

    pub fn with_feature_names(mut self, names: &[&str]) -> Self {
        self.feature_names = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn with_metadata(mut self, metadata: ModelMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn wrapping(mut self, inner: StubModel) -> Self {
        self.inner = Some(Box::new(inner));
        self
    }
}

impl ModelHandle for StubModel {
    fn describe(&self) -> String {
        "stub".to_string()
    }

    fn predict(&self, features: &Table) -> Result<Predictions> {
        self.seen_columns.borrow_mut().push(
            features
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );

        let labels: Vec<i64> = (0..features.n_rows()).map(|row| (row % 2) as i64).collect();
        if self.multi_output {
            let scores = labels.iter().map(|&l| l as f64 * 10.0).collect();
            return Ok(Predictions::Outputs(vec![
                Column::ints("label", labels),
                Column::floats("score", scores),
            ]));
        }
        Ok(Predictions::Labels(ColumnData::Int(labels)))
    }

    fn predict_proba(&self, features: &Table) -> Option<Result<ClassProbabilities>> {
        let rows = features.n_rows();
        let positive: Vec<f64> = (0..rows)
            .map(|row| if row % 2 == 1 { 0.8 } else { 0.2 })
            .collect();

        match self.proba {
            ProbaMode::Absent => None,
            ProbaMode::Failing => Some(Err(anyhow::anyhow!("predict_proba exploded"))),
            ProbaMode::Truncated => Some(ClassProbabilities::from_class_columns(vec![
                vec![0.5; rows.saturating_sub(1)],
                vec![0.5; rows.saturating_sub(1)],
            ])),
            ProbaMode::Classes(2) => Some(ClassProbabilities::from_class_columns(vec![
                positive.iter().map(|p| 1.0 - p).collect(),
                positive,
            ])),
            ProbaMode::Classes(n) => Some(ClassProbabilities::from_class_columns(
                (0..n).map(|_| vec![1.0 / n as f64; rows]).collect(),
            )),
        }
    }

    fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    fn feature_names_in(&self) -> Option<Vec<String>> {
        self.feature_names.clone()
    }

    fn inner(&self) -> Option<&dyn ModelHandle> {
        self.inner.as_deref().map(|m| m as &dyn ModelHandle)
    }
}
