//! Run statistics and the end-of-run summary.

use crate::scorer::ScoringResult;
use crate::sink::SinkOutcome;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Wall-clock time spent in each pipeline stage, in execution order
#[derive(Debug, Clone, Default)]
pub struct StageTimings {
    stages: Vec<(&'static str, Duration)>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` and record how long it took under `stage`.
    pub fn time<T>(&mut self, stage: &'static str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.stages.push((stage, start.elapsed()));
        out
    }

    pub fn stages(&self) -> &[(&'static str, Duration)] {
        &self.stages
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, d)| *d).sum()
    }
}

/// How the feature matrix was built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    /// Aligned to a schema of this many features
    Known { features: usize },
    /// No schema; numeric input columns only
    Degraded,
}

impl std::fmt::Display for SchemaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaMode::Known { features } => write!(f, "schema ({} features)", features),
            SchemaMode::Degraded => write!(f, "degraded (numeric columns only)"),
        }
    }
}

/// Outcome of one scoring run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub model: String,
    pub records: usize,
    /// Predicted class label -> row count
    pub class_counts: BTreeMap<String, u64>,
    /// Mean positive-class probability, for binary models
    pub mean_positive_probability: Option<f64>,
    pub output_path: String,
    pub uploaded_to: Option<String>,
    pub schema_mode: SchemaMode,
    pub timings: StageTimings,
}

impl RunSummary {
    pub fn new(
        run_id: impl Into<String>,
        model: impl Into<String>,
        result: &ScoringResult,
        outcome: &SinkOutcome,
        schema_mode: SchemaMode,
        timings: StageTimings,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            model: model.into(),
            records: result.n_rows(),
            class_counts: class_counts(result),
            mean_positive_probability: mean_positive_probability(result),
            output_path: outcome.path.display().to_string(),
            uploaded_to: outcome.uploaded_to.clone(),
            schema_mode,
            timings,
        }
    }

    /// Boxed multi-line report
    pub fn render(&self) -> String {
        let mut out = String::new();
        let bar = "═".repeat(62);

        let _ = writeln!(out, "╔{}╗", bar);
        let _ = writeln!(out, "║{:^62}║", "BATCH SCORING - RUN SUMMARY");
        let _ = writeln!(out, "╠{}╣", bar);
        let _ = writeln!(out, "║ {:<60} ║", format!("Run:     {}", self.run_id));
        let _ = writeln!(out, "║ {:<60} ║", format!("Model:   {}", self.model));
        let _ = writeln!(out, "║ {:<60} ║", format!("Schema:  {}", self.schema_mode));
        let _ = writeln!(out, "║ {:<60} ║", format!("Records: {}", self.records));
        let _ = writeln!(out, "╠{}╣", bar);
        let _ = writeln!(out, "║ {:<60} ║", "Predictions by class:");
        for (class, count) in &self.class_counts {
            let pct = if self.records > 0 {
                *count as f64 / self.records as f64 * 100.0
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "║ {:<60} ║",
                format!("  {:>10}: {:>8} ({:>5.1}%)", class, count, pct)
            );
        }
        if let Some(mean) = self.mean_positive_probability {
            let _ = writeln!(
                out,
                "║ {:<60} ║",
                format!("Mean positive-class probability: {:.4}", mean)
            );
        }
        let _ = writeln!(out, "╠{}╣", bar);
        let _ = writeln!(out, "║ {:<60} ║", "Stage timings (ms):");
        for (stage, duration) in self.timings.stages() {
            let _ = writeln!(
                out,
                "║ {:<60} ║",
                format!("  {:<12} {:>10.1}", stage, duration.as_secs_f64() * 1000.0)
            );
        }
        let _ = writeln!(
            out,
            "║ {:<60} ║",
            format!("  {:<12} {:>10.1}", "total", self.timings.total().as_secs_f64() * 1000.0)
        );
        let _ = writeln!(out, "╠{}╣", bar);
        let _ = writeln!(out, "║ {:<60} ║", "Output:");
        let _ = writeln!(out, "║ {:<60} ║", format!("  {}", self.output_path));
        if let Some(uri) = &self.uploaded_to {
            let _ = writeln!(out, "║ {:<60} ║", format!("  {}", uri));
        }
        let _ = writeln!(out, "╚{}╝", bar);
        out
    }

    /// Print the summary to stdout; logs stay on stderr.
    pub fn print_summary(&self) {
        print!("{}", self.render());
    }
}

fn class_counts(result: &ScoringResult) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    let Some(column) = result
        .prediction_columns
        .first()
        .and_then(|name| result.table.column(name))
    else {
        return counts;
    };

    for row in 0..column.len() {
        *counts.entry(column.data.render(row)).or_insert(0) += 1;
    }
    counts
}

fn mean_positive_probability(result: &ScoringResult) -> Option<f64> {
    let values = result
        .positive_probability_column
        .as_deref()
        .and_then(|name| result.table.column(name))
        .and_then(|c| c.data.as_f64())?;

    let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}
