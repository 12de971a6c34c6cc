//! Batch Scoring Library
//!
//! Scores tabular records with a previously trained classifier whose
//! expected input schema may not match the table at hand. The pipeline
//! loads a model handle, discovers its feature schema, reconciles the
//! input to it, scores every row and persists the results.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod reconciler;
pub mod scorer;
pub mod sink;
pub mod source;
pub mod storage;
pub mod types;

pub use config::AppConfig;
pub use error::ScoringError;
pub use models::{ModelHandle, ModelLoader, SchemaExtractor};
pub use pipeline::{ScoringPipeline, ScoringRequest};
pub use reconciler::FeatureReconciler;
pub use scorer::{Scorer, ScoringResult};
pub use sink::ResultSink;
pub use types::{Column, ColumnData, Table};
