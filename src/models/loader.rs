//! Model handle loader: an ordered chain of model sources

use crate::config::AppConfig;
use crate::error::{ScoringError, SourceFailure};
use crate::models::handle::{ModelHandle, ModelMetadata, ModelOrigin, PackagedModel};
use crate::models::onnx::OnnxModel;
use crate::storage::{BlobStore, Location};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Serialized model inside a package
pub const MODEL_FILE: &str = "model.onnx";
/// Optional package metadata (signature, flavor)
pub const METADATA_FILE: &str = "metadata.json";
/// Stage-to-version mapping kept next to a registered model's versions
pub const STAGES_FILE: &str = "stages.json";

/// Turns serialized model bytes into a native handle.
pub type ModelDecoder = Arc<dyn Fn(&str, &[u8]) -> Result<Box<dyn ModelHandle>>>;

/// Decoder for ONNX exports.
pub fn onnx_decoder(threads: usize) -> ModelDecoder {
    Arc::new(move |name: &str, bytes: &[u8]| {
        let model = OnnxModel::from_bytes(name, bytes, threads)?;
        Ok(Box::new(model) as Box<dyn ModelHandle>)
    })
}

/// Raw contents of a model package
pub struct ModelPackage {
    pub location: Location,
    pub model_bytes: Vec<u8>,
    pub metadata: ModelMetadata,
}

impl ModelPackage {
    /// Fetch `model.onnx` and, when present, `metadata.json` under `location`.
    pub fn fetch(store: &BlobStore, location: &Location) -> Result<Self> {
        let model_bytes = store.get(&location.join(MODEL_FILE))?;

        let metadata = match store.get_optional(&location.join(METADATA_FILE))? {
            Some(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(location = %location, error = %e, "Ignoring unreadable package metadata");
                ModelMetadata::default()
            }),
            None => ModelMetadata::default(),
        };

        Ok(Self {
            location: location.clone(),
            model_bytes,
            metadata,
        })
    }

    fn into_handle(
        self,
        name: &str,
        version: &str,
        origin: ModelOrigin,
        decoder: &ModelDecoder,
    ) -> Result<Box<dyn ModelHandle>> {
        let model = decoder(name, &self.model_bytes)
            .with_context(|| format!("Failed to decode model at {}", self.location))?;
        Ok(Box::new(PackagedModel::new(
            name,
            version,
            origin,
            self.metadata,
            model,
        )))
    }
}

/// One place a model can be loaded from.
pub trait ModelSource {
    /// Short name used in logs and failure reports
    fn name(&self) -> &str;

    /// Single attempt to load `model_name` at `version_or_stage`.
    fn load(&self, model_name: &str, version_or_stage: &str) -> Result<Box<dyn ModelHandle>>;
}

/// File-backed versioned registry.
///
/// Layout: `<root>/<name>/stages.json` and `<root>/<name>/versions/<n>/`.
pub struct RegistrySource {
    root: Location,
    store: Arc<BlobStore>,
    decoder: ModelDecoder,
}

impl RegistrySource {
    pub fn new(root: Location, store: Arc<BlobStore>, decoder: ModelDecoder) -> Self {
        Self {
            root,
            store,
            decoder,
        }
    }

    /// Map a stage name to its version; anything else is taken as a version.
    pub fn resolve_version(&self, model_name: &str, version_or_stage: &str) -> Result<String> {
        let stages_location = self.root.join(model_name).join(STAGES_FILE);
        let stages: HashMap<String, String> = match self.store.get_optional(&stages_location)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("malformed registry state in {}", stages_location))?,
            None => HashMap::new(),
        };

        let version = stages
            .iter()
            .find(|(stage, _)| stage.eq_ignore_ascii_case(version_or_stage))
            .map(|(_, version)| version.clone())
            .unwrap_or_else(|| version_or_stage.to_string());

        anyhow::ensure!(
            !version.is_empty() && !version.contains('/'),
            "invalid model version '{}'",
            version
        );
        Ok(version)
    }

    pub fn package_location(&self, model_name: &str, version: &str) -> Location {
        self.root
            .join(model_name)
            .join("versions")
            .join(version)
    }
}

impl ModelSource for RegistrySource {
    fn name(&self) -> &str {
        "registry"
    }

    fn load(&self, model_name: &str, version_or_stage: &str) -> Result<Box<dyn ModelHandle>> {
        let version = self.resolve_version(model_name, version_or_stage)?;
        let location = self.package_location(model_name, &version);
        info!(model = %model_name, version = %version, location = %location, "Loading model from registry");

        ModelPackage::fetch(&self.store, &location)?.into_handle(
            model_name,
            &version,
            ModelOrigin::Registry,
            &self.decoder,
        )
    }
}

/// Convention-based artifact location: `<base>/<name>/<version_or_stage>/`.
pub struct ArtifactSource {
    base: Location,
    store: Arc<BlobStore>,
    decoder: ModelDecoder,
}

impl ArtifactSource {
    pub fn new(base: Location, store: Arc<BlobStore>, decoder: ModelDecoder) -> Self {
        Self {
            base,
            store,
            decoder,
        }
    }

    pub fn package_location(&self, model_name: &str, version_or_stage: &str) -> Location {
        self.base.join(model_name).join(version_or_stage)
    }
}

impl ModelSource for ArtifactSource {
    fn name(&self) -> &str {
        "artifacts"
    }

    fn load(&self, model_name: &str, version_or_stage: &str) -> Result<Box<dyn ModelHandle>> {
        let location = self.package_location(model_name, version_or_stage);
        info!(model = %model_name, location = %location, "Loading model from artifact store");

        ModelPackage::fetch(&self.store, &location)?.into_handle(
            model_name,
            version_or_stage,
            ModelOrigin::Artifact,
            &self.decoder,
        )
    }
}

/// Tries each source once, in order, until one yields a handle.
pub struct ModelLoader {
    sources: Vec<Box<dyn ModelSource>>,
}

impl ModelLoader {
    pub fn new(sources: Vec<Box<dyn ModelSource>>) -> Self {
        Self { sources }
    }

    /// Registry first, then the artifact store, both decoding ONNX exports.
    pub fn from_config(config: &AppConfig, store: Arc<BlobStore>) -> Result<Self> {
        let decoder = onnx_decoder(config.model.onnx_threads);
        let registry_root = Location::parse(&config.registry.root)?;
        let artifact_base = Location::parse(&config.artifact_base())?;

        Ok(Self::new(vec![
            Box::new(RegistrySource::new(
                registry_root,
                store.clone(),
                decoder.clone(),
            )),
            Box::new(ArtifactSource::new(artifact_base, store, decoder)),
        ]))
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Load a model, failing only after every source has failed.
    pub fn load(
        &self,
        model_name: &str,
        version_or_stage: &str,
    ) -> Result<Box<dyn ModelHandle>, ScoringError> {
        let mut failures = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.load(model_name, version_or_stage) {
                Ok(handle) => {
                    info!(
                        source = source.name(),
                        model = %handle.describe(),
                        "Model loaded"
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(
                        source = source.name(),
                        model = %model_name,
                        version = %version_or_stage,
                        error = %format!("{:#}", e),
                        "Model source failed, trying next"
                    );
                    failures.push(SourceFailure {
                        source: source.name().to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        Err(ScoringError::ModelNotFound {
            name: model_name.to_string(),
            version_or_stage: version_or_stage.to_string(),
            failures,
        })
    }
}
