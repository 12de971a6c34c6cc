//! Configuration management for the scoring pipeline

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Value used for expected features the input does not provide.
///
/// Zero is only neutral for centered or scaled features; pick another
/// policy when the model was trained on raw values or category codes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum MissingFill {
    /// Fill with `0`
    #[default]
    Zero,
    /// Fill with a fixed value
    Constant { value: f64 },
    /// Refuse to score when any expected feature is missing
    Reject,
}

impl MissingFill {
    /// Fill value, or `None` when missing features must be rejected.
    pub fn value(&self) -> Option<f64> {
        match self {
            MissingFill::Zero => Some(0.0),
            MissingFill::Constant { value } => Some(*value),
            MissingFill::Reject => None,
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    pub artifacts: ArtifactsConfig,
    pub model: ModelConfig,
    pub scoring: ScoringConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Cloud project the bucket belongs to (informational)
    #[serde(default)]
    pub project_id: Option<String>,
    /// Bucket for artifacts and uploaded predictions
    pub bucket: String,
}

/// Model registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry root: local directory or `gs://` URI
    pub root: String,
}

/// Direct artifact store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Artifact base; defaults to `gs://{bucket}/mlflow/models`
    #[serde(default)]
    pub base: Option<String>,
}

/// Which model to score with, unless overridden on the command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub version: String,
    /// Registry stage; takes precedence over `version` when set
    #[serde(default)]
    pub stage: Option<String>,
    /// Number of threads for ONNX inference (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

/// Reconciliation and result shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Identifier columns carried through to the output
    pub id_columns: Vec<String>,
    /// Target-like columns never used as features
    #[serde(default = "default_target_columns")]
    pub target_columns: Vec<String>,
    /// Output column for the positive-class probability of binary models
    #[serde(default = "default_positive_probability_column")]
    pub positive_probability_column: String,
    /// Policy for expected features missing from the input
    #[serde(default)]
    pub missing_fill: MissingFill,
}

fn default_target_columns() -> Vec<String> {
    ["target", "label", "inadimplente", "Status_Pagamento"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_positive_probability_column() -> String {
    "probability_default".to_string()
}

/// Result persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// File name prefix; a UTC timestamp and `.csv` are appended
    pub prefix: String,
    /// Local directory used when the preferred location is not writable
    pub fallback_dir: String,
    /// Folder inside the bucket for uploaded results
    pub upload_folder: String,
    /// Upload results after writing them locally
    #[serde(default)]
    pub upload: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl AppConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Defaults, then the file at `path` if it exists, then `SCORING__*`
    /// environment variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_layered(path, Self::environment())
    }

    /// Environment layer. List keys take comma-separated values, e.g.
    /// `SCORING__SCORING__ID_COLUMNS=ID_Cliente,CPF`.
    fn environment() -> Environment {
        Environment::with_prefix("SCORING")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("scoring.id_columns")
            .with_list_parse_key("scoring.target_columns")
    }

    fn load_layered<P: AsRef<Path>>(path: P, environment: Environment) -> Result<Self> {
        let config = Config::builder()
            .add_source(
                Config::try_from(&AppConfig::default())
                    .context("Failed to serialize default configuration")?,
            )
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(environment)
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Artifact base location, derived from the bucket when not configured
    pub fn artifact_base(&self) -> String {
        self.artifacts
            .base
            .clone()
            .unwrap_or_else(|| format!("gs://{}/mlflow/models", self.storage.bucket))
    }

    /// Registry stage when set, otherwise the version
    pub fn version_or_stage(&self) -> &str {
        self.model.stage.as_deref().unwrap_or(&self.model.version)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                project_id: None,
                bucket: "ml-scoring-artifacts".to_string(),
            },
            registry: RegistryConfig {
                root: "mlruns/registry".to_string(),
            },
            artifacts: ArtifactsConfig { base: None },
            model: ModelConfig {
                name: "credit-default-rfc".to_string(),
                version: "1".to_string(),
                stage: None,
                onnx_threads: default_onnx_threads(),
            },
            scoring: ScoringConfig {
                id_columns: vec!["ID_Cliente".to_string()],
                target_columns: default_target_columns(),
                positive_probability_column: default_positive_probability_column(),
                missing_fill: MissingFill::Zero,
            },
            output: OutputConfig {
                prefix: "predictions".to_string(),
                fallback_dir: "outputs".to_string(),
                upload_folder: "predictions".to_string(),
                upload: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.model.version, "1");
        assert_eq!(config.version_or_stage(), "1");
        assert_eq!(config.scoring.missing_fill, MissingFill::Zero);
        assert_eq!(
            config.artifact_base(),
            "gs://ml-scoring-artifacts/mlflow/models"
        );
        assert!(config
            .scoring
            .target_columns
            .contains(&"Status_Pagamento".to_string()));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.output.fallback_dir, "outputs");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[model]
name = "credit-xgb"
version = "4"
stage = "Production"

[scoring]
id_columns = ["customer_id"]

[scoring.missing_fill]
strategy = "constant"
value = -1.0

[artifacts]
base = "/srv/models"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from_path(&path).unwrap();
        assert_eq!(config.model.name, "credit-xgb");
        assert_eq!(config.version_or_stage(), "Production");
        assert_eq!(config.scoring.id_columns, vec!["customer_id"]);
        assert_eq!(
            config.scoring.missing_fill,
            MissingFill::Constant { value: -1.0 }
        );
        assert_eq!(config.artifact_base(), "/srv/models");
        // untouched sections keep their defaults
        assert_eq!(config.output.prefix, "predictions");
    }

    #[test]
    fn test_environment_overrides_lists() {
        let dir = tempfile::tempdir().unwrap();
        let vars: config::Map<String, String> = [
            ("SCORING__SCORING__ID_COLUMNS", "customer_id,cpf"),
            ("SCORING__SCORING__TARGET_COLUMNS", "churn"),
            ("SCORING__MODEL__VERSION", "7"),
            ("SCORING__OUTPUT__UPLOAD", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = AppConfig::load_layered(
            dir.path().join("absent.toml"),
            AppConfig::environment().source(Some(vars)),
        )
        .unwrap();

        assert_eq!(config.scoring.id_columns, vec!["customer_id", "cpf"]);
        assert_eq!(config.scoring.target_columns, vec!["churn"]);
        assert_eq!(config.model.version, "7");
        assert!(config.output.upload);
    }

    #[test]
    fn test_missing_fill_values() {
        assert_eq!(MissingFill::Zero.value(), Some(0.0));
        assert_eq!(MissingFill::Constant { value: 3.5 }.value(), Some(3.5));
        assert_eq!(MissingFill::Reject.value(), None);
    }
}
