//! ONNX Runtime backed classifier handle

use crate::models::handle::{ClassProbabilities, ModelHandle, Predictions};
use crate::types::table::{Column, ColumnData, Table};
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, DynValue, Tensor};
use std::sync::Mutex;
use tracing::{debug, info};

/// Custom metadata key holding the fitted feature names.
pub const FEATURE_NAMES_KEY: &str = "feature_names_in";

/// Initialize the process-wide ONNX Runtime environment.
pub fn init_runtime() -> Result<()> {
    ort::init().commit()?;
    info!("ONNX Runtime initialized");
    Ok(())
}

/// Exported classifier running in an ONNX Runtime session
pub struct OnnxModel {
    /// Model name, for logs
    name: String,
    /// Session (runs need exclusive access)
    session: Mutex<Session>,
    /// Graph input names, in declaration order
    inputs: Vec<String>,
    /// Outputs treated as predictions
    prediction_outputs: Vec<String>,
    /// Output carrying class probabilities
    probability_output: Option<String>,
    /// Fitted feature names, when the export recorded them
    feature_names: Option<Vec<String>>,
}

impl OnnxModel {
    /// Build a session from serialized model bytes
    pub fn from_bytes(name: &str, bytes: &[u8], threads: usize) -> Result<Self> {
        info!(model = %name, size = bytes.len(), threads = threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads)?
            .commit_from_memory(bytes)
            .with_context(|| format!("Failed to load ONNX model '{}'", name))?;

        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        anyhow::ensure!(!inputs.is_empty(), "model '{}' declares no inputs", name);

        let probability_output = session
            .outputs
            .iter()
            .find(|o| o.name.contains("prob"))
            .map(|o| o.name.clone());

        let mut prediction_outputs: Vec<String> = session
            .outputs
            .iter()
            .filter(|o| o.name.contains("label"))
            .map(|o| o.name.clone())
            .collect();
        if prediction_outputs.is_empty() {
            prediction_outputs = session
                .outputs
                .iter()
                .filter(|o| Some(&o.name) != probability_output.as_ref())
                .map(|o| o.name.clone())
                .collect();
        }

        let feature_names = match read_feature_names(&session) {
            Ok(Some(names)) => Some(names),
            Ok(None) if inputs.len() > 1 => Some(inputs.clone()),
            Ok(None) => None,
            Err(e) => {
                debug!(model = %name, error = %e, "Could not read feature names from model metadata");
                None
            }
        };

        info!(
            model = %name,
            inputs = ?inputs,
            predictions = ?prediction_outputs,
            probabilities = ?probability_output,
            "Model loaded successfully"
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            inputs,
            prediction_outputs,
            probability_output,
            feature_names,
        })
    }

    /// Build input tensors: one `[rows, features]` tensor, or one `[rows, 1]`
    /// tensor per feature when the graph takes named columns.
    fn build_inputs(&self, features: &Table) -> Result<Vec<(String, Tensor<f32>)>> {
        let text: Vec<&str> = features
            .columns()
            .iter()
            .filter(|c| !c.data.is_numeric())
            .map(|c| c.name.as_str())
            .collect();
        anyhow::ensure!(
            text.is_empty(),
            "model '{}' takes numeric input but columns {:?} are text",
            self.name,
            text
        );

        let rows = features.n_rows();

        if self.inputs.len() == 1 {
            let columns: Vec<Vec<f64>> = features
                .columns()
                .iter()
                .filter_map(|c| c.data.as_f64())
                .collect();
            let mut data = Vec::with_capacity(rows * columns.len());
            for row in 0..rows {
                data.extend(columns.iter().map(|col| col[row] as f32));
            }
            let shape = vec![rows as i64, columns.len() as i64];
            let tensor =
                Tensor::from_array((shape, data)).context("Failed to create input tensor")?;
            return Ok(vec![(self.inputs[0].clone(), tensor)]);
        }

        self.inputs
            .iter()
            .map(|input| {
                let values = features
                    .column(input)
                    .and_then(|c| c.data.as_f64())
                    .with_context(|| format!("no numeric column for model input '{}'", input))?;
                let data: Vec<f32> = values.iter().map(|&v| v as f32).collect();
                let tensor = Tensor::from_array((vec![rows as i64, 1_i64], data))
                    .context("Failed to create input tensor")?;
                Ok((input.clone(), tensor))
            })
            .collect()
    }

    fn run<T>(
        &self,
        features: &Table,
        extract: impl FnOnce(&SessionOutputs) -> Result<T>,
    ) -> Result<T> {
        let inputs = self.build_inputs(features)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let outputs = session.run(inputs)?;
        extract(&outputs)
    }
}

impl ModelHandle for OnnxModel {
    fn describe(&self) -> String {
        format!("onnx:{}", self.name)
    }

    fn predict(&self, features: &Table) -> Result<Predictions> {
        if self.prediction_outputs.is_empty() {
            let probabilities = self
                .predict_proba(features)
                .context("model has neither label nor probability outputs")??;
            return Ok(Predictions::Labels(ColumnData::Int(probabilities.argmax())));
        }

        let mut columns = self.run(features, |outputs| {
            let mut columns = Vec::new();
            for name in &self.prediction_outputs {
                let output = outputs
                    .get(name.as_str())
                    .with_context(|| format!("output '{}' missing from run", name))?;
                columns.extend(extract_columns(output, name)?);
            }
            Ok(columns)
        })?;

        debug!(model = %self.name, outputs = columns.len(), "Prediction complete");

        if columns.len() == 1 {
            let column = columns.remove(0);
            Ok(Predictions::Labels(column.data))
        } else {
            Ok(Predictions::Outputs(columns))
        }
    }

    fn predict_proba(&self, features: &Table) -> Option<Result<ClassProbabilities>> {
        let name = self.probability_output.as_deref()?;
        Some(self.run(features, |outputs| {
            let output = outputs
                .get(name)
                .with_context(|| format!("output '{}' missing from run", name))?;
            extract_probabilities(output, &self.name)
        }))
    }

    fn feature_names_in(&self) -> Option<Vec<String>> {
        self.feature_names.clone()
    }
}

fn read_feature_names(session: &Session) -> Result<Option<Vec<String>>> {
    let metadata = session.metadata()?;
    Ok(metadata
        .custom(FEATURE_NAMES_KEY)?
        .and_then(|raw| parse_feature_names(&raw)))
}

/// Parse a JSON list or a comma-separated list of feature names.
pub fn parse_feature_names(raw: &str) -> Option<Vec<String>> {
    let names: Vec<String> = match serde_json::from_str::<Vec<String>>(raw) {
        Ok(names) => names,
        Err(_) => raw.split(',').map(|s| s.trim().to_string()).collect(),
    };
    let names: Vec<String> = names.into_iter().filter(|n| !n.is_empty()).collect();
    (!names.is_empty()).then_some(names)
}

/// Turn a label tensor into columns; `[rows, k]` with `k > 1` yields `k` columns.
fn extract_columns(output: &DynValue, name: &str) -> Result<Vec<Column>> {
    if let Ok((shape, data)) = output.try_extract_tensor::<i64>() {
        return Ok(split_columns(name, shape, data, ColumnData::Int));
    }

    if let Ok((shape, data)) = output.try_extract_tensor::<i32>() {
        let data: Vec<i64> = data.iter().map(|&v| v as i64).collect();
        return Ok(split_columns(name, shape, &data, ColumnData::Int));
    }

    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let data: Vec<f64> = data.iter().map(|&v| widen(v)).collect();
        return Ok(split_columns(name, shape, &data, ColumnData::Float));
    }

    if let Ok((shape, data)) = output.try_extract_tensor::<f64>() {
        return Ok(split_columns(name, shape, data, ColumnData::Float));
    }

    // string class labels
    if let Ok((shape, data)) = output.try_extract_strings() {
        return Ok(split_columns(name, shape, &data, ColumnData::Text));
    }

    anyhow::bail!(
        "output '{}' has unsupported label type {:?}",
        name,
        output.dtype()
    )
}

/// `f32` to `f64` keeping the shortest decimal form, so 0.8f32 stays 0.8.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(value as f64)
}

fn split_columns<T: Clone>(
    name: &str,
    dims: &[i64],
    data: &[T],
    wrap: fn(Vec<T>) -> ColumnData,
) -> Vec<Column> {
    let width = if dims.len() == 2 { dims[1].max(1) as usize } else { 1 };
    if width == 1 {
        return vec![Column::new(name, wrap(data.to_vec()))];
    }

    (0..width)
        .map(|j| {
            let values = data.iter().skip(j).step_by(width).cloned().collect();
            Column::new(format!("{}_{}", name, j), wrap(values))
        })
        .collect()
}

/// Extract class probabilities.
/// Handles `[rows, classes]` tensors and `seq(map(int64, float))` outputs.
fn extract_probabilities(output: &DynValue, model_name: &str) -> Result<ClassProbabilities> {
    if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
        let n_classes = if shape.len() == 2 { shape[1] as usize } else { 1 };
        let data: Vec<f64> = data.iter().map(|&v| widen(v)).collect();
        debug!(model = %model_name, classes = n_classes, "Extracted probabilities from tensor");
        return ClassProbabilities::from_row_major(&data, n_classes);
    }

    let dtype = output.dtype();
    if DynSequenceValueType::can_downcast(&dtype) {
        return extract_from_sequence_map(output, model_name);
    }

    anyhow::bail!("probability output of '{}' has an unsupported type", model_name)
}

/// One map per row, keyed by class id.
fn extract_from_sequence_map(output: &DynValue, model_name: &str) -> Result<ClassProbabilities> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;

    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;

    let mut rows: Vec<Vec<(i64, f32)>> = Vec::with_capacity(maps.len());
    for map_value in &maps {
        let mut kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
        kv_pairs.sort_by_key(|(class_id, _)| *class_id);
        rows.push(kv_pairs);
    }

    let n_classes = rows.first().map(Vec::len).unwrap_or(0);
    anyhow::ensure!(
        rows.iter().all(|r| r.len() == n_classes),
        "rows of '{}' disagree on the number of classes",
        model_name
    );

    let classes = (0..n_classes)
        .map(|class| rows.iter().map(|r| widen(r[class].1)).collect())
        .collect();

    debug!(model = %model_name, rows = rows.len(), classes = n_classes, "Extracted from seq(map)");
    ClassProbabilities::from_class_columns(classes)
}
