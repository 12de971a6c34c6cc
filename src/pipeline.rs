//! End-to-end batch scoring run
//!
//! Loader, schema extractor, reconciler, scorer and sink run strictly in
//! sequence. Each run loads its own model; nothing is shared between runs.

use crate::config::AppConfig;
use crate::error::Result;
use crate::metrics::{RunSummary, SchemaMode, StageTimings};
use crate::models::loader::ModelLoader;
use crate::models::schema::SchemaExtractor;
use crate::reconciler::FeatureReconciler;
use crate::scorer::Scorer;
use crate::sink::ResultSink;
use crate::source::TableSource;
use crate::storage::{BlobStore, Location};
use std::sync::Arc;
use tracing::{info, info_span};
use uuid::Uuid;

/// What to score and where to put it
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRequest {
    pub model_name: String,
    /// Version number or registry stage
    pub version_or_stage: String,
    pub input: Location,
    pub id_columns: Vec<String>,
    pub output_prefix: String,
    pub upload: bool,
}

impl ScoringRequest {
    /// Request for `input` with every other field taken from configuration
    pub fn from_config(config: &AppConfig, input: Location) -> Self {
        Self {
            model_name: config.model.name.clone(),
            version_or_stage: config.version_or_stage().to_string(),
            input,
            id_columns: config.scoring.id_columns.clone(),
            output_prefix: config.output.prefix.clone(),
            upload: config.output.upload,
        }
    }
}

/// The assembled scoring stages
pub struct ScoringPipeline {
    loader: ModelLoader,
    extractor: SchemaExtractor,
    reconciler: FeatureReconciler,
    scorer: Scorer,
    source: TableSource,
    sink: ResultSink,
}

impl ScoringPipeline {
    pub fn new(
        loader: ModelLoader,
        extractor: SchemaExtractor,
        reconciler: FeatureReconciler,
        scorer: Scorer,
        source: TableSource,
        sink: ResultSink,
    ) -> Self {
        Self {
            loader,
            extractor,
            reconciler,
            scorer,
            source,
            sink,
        }
    }

    /// Build every stage from one configuration value
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let store = Arc::new(BlobStore::new()?);
        Ok(Self::new(
            ModelLoader::from_config(config, store.clone())?,
            SchemaExtractor::new(),
            FeatureReconciler::from_config(&config.scoring),
            Scorer::from_config(&config.scoring),
            TableSource::new(store.clone()),
            ResultSink::from_config(&config.output, &config.storage, store),
        ))
    }

    /// Score one input table end to end.
    pub fn run(&self, request: &ScoringRequest) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "scoring_run",
            run_id = %run_id,
            model = %request.model_name,
            version = %request.version_or_stage
        );
        let _guard = span.enter();

        info!(input = %request.input, id_columns = ?request.id_columns, "Starting scoring run");
        let mut timings = StageTimings::new();

        let handle = timings.time("load_model", || {
            self.loader
                .load(&request.model_name, &request.version_or_stage)
        })?;
        let schema = timings.time("schema", || self.extractor.extract(handle.as_ref()));
        let input = timings.time("read_input", || {
            self.source.load(&request.input, &request.id_columns)
        })?;

        let reconciliation = timings.time("reconcile", || {
            self.reconciler
                .reconcile(&input.table, schema.as_ref(), &request.id_columns)
        })?;
        let result = timings.time("score", || {
            self.scorer.score(
                handle.as_ref(),
                &reconciliation.matrix,
                &reconciliation.identifiers,
            )
        })?;

        let preferred_dir = input.preferred_output_dir();
        let outcome = timings.time("write", || {
            self.sink.persist(
                &result,
                preferred_dir.as_deref(),
                &request.output_prefix,
                request.upload,
            )
        })?;

        let schema_mode = match &schema {
            Some(schema) => SchemaMode::Known {
                features: schema.len(),
            },
            None => SchemaMode::Degraded,
        };

        info!(
            records = result.n_rows(),
            output = %outcome.path.display(),
            fallback = outcome.used_fallback,
            elapsed_ms = timings.total().as_millis() as u64,
            "Scoring run finished"
        );

        Ok(RunSummary::new(
            run_id,
            handle.describe(),
            &result,
            &outcome,
            schema_mode,
            timings,
        ))
    }
}
