//! Batch Scoring - Main Entry Point
//!
//! Loads a model from the registry or artifact store, aligns an input table
//! to the model's feature schema, scores every row and writes the results
//! as CSV.

use anyhow::{Context, Result};
use batch_scoring::{
    config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH},
    models::onnx,
    pipeline::{ScoringPipeline, ScoringRequest},
    storage::Location,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

/// Command-line arguments; each overrides the matching config value
#[derive(Parser, Debug)]
#[command(name = "batch-scoring")]
#[command(about = "Score a table of records with a registered classifier")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Registered model name
    #[arg(long)]
    model_name: Option<String>,

    /// Model version
    #[arg(long)]
    model_version: Option<String>,

    /// Registry stage (e.g. Production); takes precedence over the version
    #[arg(long)]
    registry_stage: Option<String>,

    /// Input table: local CSV path or gs://bucket/key
    #[arg(long)]
    input: String,

    /// Identifier column carried to the output (repeatable)
    #[arg(long = "id-cols", num_args = 1..)]
    id_cols: Vec<String>,

    /// Output file name prefix
    #[arg(long)]
    output_prefix: Option<String>,

    /// Upload the results to the configured bucket
    #[arg(long)]
    upload_output: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(name) = &self.model_name {
            config.model.name = name.clone();
        }
        if let Some(version) = &self.model_version {
            config.model.version = version.clone();
        }
        if let Some(stage) = &self.registry_stage {
            config.model.stage = Some(stage.clone());
        }
        if !self.id_cols.is_empty() {
            config.scoring.id_columns = self.id_cols.clone();
        }
        if let Some(prefix) = &self.output_prefix {
            config.output.prefix = prefix.clone();
        }
        if self.upload_output {
            config.output.upload = true;
        }
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_from_path(&args.config)?;
    args.apply(&mut config);
    init_tracing(&config.logging)?;

    info!(
        config = %args.config.display(),
        model = %config.model.name,
        version = %config.version_or_stage(),
        "Configuration loaded"
    );

    onnx::init_runtime()?;

    let input = Location::parse(&args.input)?;
    let request = ScoringRequest::from_config(&config, input);
    let pipeline =
        ScoringPipeline::from_config(&config).context("Failed to initialize scoring pipeline")?;

    let summary = pipeline.run(&request)?;
    summary.print_summary();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "batch-scoring",
            "--input",
            "data/clients.csv",
            "--model-name",
            "credit-xgb",
            "--registry-stage",
            "Staging",
            "--id-cols",
            "ID_Cliente",
            "--id-cols",
            "CPF",
            "--upload-output",
        ]);

        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.model.name, "credit-xgb");
        assert_eq!(config.version_or_stage(), "Staging");
        assert_eq!(config.scoring.id_columns, vec!["ID_Cliente", "CPF"]);
        assert!(config.output.upload);
        assert_eq!(config.output.prefix, "predictions");
    }

    #[test]
    fn test_input_is_required() {
        assert!(Args::try_parse_from(["batch-scoring"]).is_err());
    }
}
