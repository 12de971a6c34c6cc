//! Feature schema discovery.
//!
//! The extractor walks an ordered list of introspection strategies. The
//! first one that yields a valid schema wins; if none does, the schema is
//! unknown and scoring continues in degraded mode.

use crate::error::{Result, ScoringError};
use crate::models::handle::{ModelHandle, ModelSignature};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Expected kind of a feature, when the artifact declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    Numeric,
    Categorical,
}

impl FeatureKind {
    /// Map a signature type name to a kind.
    pub fn from_type_name(dtype: &str) -> Option<Self> {
        match dtype.to_ascii_lowercase().as_str() {
            "double" | "float" | "long" | "integer" => Some(FeatureKind::Numeric),
            "string" | "category" | "boolean" => Some(FeatureKind::Categorical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: Option<FeatureKind>,
}

/// Ordered, uniquely named feature list a model was trained on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
}

impl FeatureSchema {
    pub fn new(features: Vec<FeatureSpec>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(features.len());
        for feature in &features {
            if !seen.insert(feature.name.as_str()) {
                return Err(ScoringError::InvalidSchema(feature.name.clone()));
            }
        }
        Ok(Self { features })
    }

    /// Schema from names only, no type hints.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        Self::new(
            names
                .iter()
                .map(|n| FeatureSpec {
                    name: n.as_ref().to_string(),
                    kind: None,
                })
                .collect(),
        )
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|f| f.name.as_str())
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn contains(&self, name: &str) -> bool {
        self.features.iter().any(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// One way of reading a schema off a handle. `Ok(None)` means "not available here".
pub type SchemaStrategy = fn(&dyn ModelHandle) -> Result<Option<FeatureSchema>>;

/// Declared signature attached to the artifact.
pub fn from_signature(handle: &dyn ModelHandle) -> Result<Option<FeatureSchema>> {
    let Some(signature) = handle.metadata().and_then(|m| m.signature.as_ref()) else {
        return Ok(None);
    };
    schema_from_signature(signature)
}

fn schema_from_signature(signature: &ModelSignature) -> Result<Option<FeatureSchema>> {
    let features: Vec<FeatureSpec> = signature
        .inputs
        .iter()
        .filter_map(|input| {
            let name = input.name.as_deref().filter(|n| !n.is_empty())?;
            Some(FeatureSpec {
                name: name.to_string(),
                kind: input.dtype.as_deref().and_then(FeatureKind::from_type_name),
            })
        })
        .collect();

    if features.is_empty() {
        return Ok(None);
    }
    FeatureSchema::new(features).map(Some)
}

/// Feature names recorded by the fitted estimator.
pub fn from_native_attribute(handle: &dyn ModelHandle) -> Result<Option<FeatureSchema>> {
    match handle.feature_names_in() {
        Some(names) if !names.is_empty() => FeatureSchema::from_names(&names).map(Some),
        _ => Ok(None),
    }
}

/// Same attribute, read from the estimator behind an adapter.
pub fn from_unwrapped_model(handle: &dyn ModelHandle) -> Result<Option<FeatureSchema>> {
    match handle.inner() {
        Some(inner) => from_native_attribute(inner),
        None => Ok(None),
    }
}

/// Runs schema strategies in order until one succeeds.
pub struct SchemaExtractor {
    strategies: Vec<(&'static str, SchemaStrategy)>,
}

impl SchemaExtractor {
    pub fn new() -> Self {
        Self {
            strategies: vec![
                ("signature", from_signature as SchemaStrategy),
                ("native_attribute", from_native_attribute),
                ("unwrapped_model", from_unwrapped_model),
            ],
        }
    }

    pub fn with_strategies(strategies: Vec<(&'static str, SchemaStrategy)>) -> Self {
        Self { strategies }
    }

    /// The expected schema, or `None` when no strategy can determine it.
    pub fn extract(&self, handle: &dyn ModelHandle) -> Option<FeatureSchema> {
        for (name, strategy) in &self.strategies {
            match strategy(handle) {
                Ok(Some(schema)) => {
                    info!(
                        strategy = name,
                        features = schema.len(),
                        "Feature schema resolved"
                    );
                    return Some(schema);
                }
                Ok(None) => debug!(strategy = name, "Schema strategy not applicable"),
                Err(e) => debug!(strategy = name, error = %e, "Schema strategy failed"),
            }
        }

        warn!(
            model = %handle.describe(),
            "Could not determine the model's feature schema; scoring in degraded mode with numeric columns only"
        );
        None
    }
}

impl Default for SchemaExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::handle::ModelMetadata;
    use crate::models::testing::StubModel;

    fn signature_metadata(json: &str) -> ModelMetadata {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_signature_wins() {
        let handle = StubModel::binary()
            .with_metadata(signature_metadata(
                r#"{"signature": {"inputs": [{"name": "age", "type": "long"}, {"name": "city", "type": "string"}]}}"#,
            ))
            .with_feature_names(&["other"]);

        let schema = SchemaExtractor::new().extract(&handle).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["age", "city"]);
        assert_eq!(schema.features()[0].kind, Some(FeatureKind::Numeric));
        assert_eq!(schema.features()[1].kind, Some(FeatureKind::Categorical));
    }

    #[test]
    fn test_native_attribute_when_no_signature() {
        let handle = StubModel::binary()
            .with_metadata(ModelMetadata::default())
            .with_feature_names(&["income", "age"]);

        let schema = SchemaExtractor::new().extract(&handle).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["income", "age"]);
    }

    #[test]
    fn test_unwraps_adapter() {
        let handle = StubModel::binary()
            .wrapping(StubModel::binary().with_feature_names(&["score", "age"]));

        let schema = SchemaExtractor::new().extract(&handle).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["score", "age"]);
    }

    #[test]
    fn test_invalid_strategy_falls_through() {
        let handle = StubModel::binary()
            .with_metadata(signature_metadata(
                r#"{"signature": {"inputs": [{"name": "age"}, {"name": "age"}]}}"#,
            ))
            .with_feature_names(&["age", "income"]);

        let schema = SchemaExtractor::new().extract(&handle).unwrap();
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["age", "income"]);
    }

    #[test]
    fn test_unknown_schema_is_none() {
        let handle = StubModel::binary().wrapping(StubModel::binary());
        assert!(SchemaExtractor::new().extract(&handle).is_none());
    }

    #[test]
    fn test_empty_signature_is_not_applicable() {
        let handle = StubModel::binary().with_metadata(signature_metadata(
            r#"{"signature": {"inputs": [{"type": "double"}]}}"#,
        ));
        assert_eq!(from_signature(&handle).unwrap(), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = FeatureSchema::from_names(&["a", "b", "a"]).unwrap_err();
        assert!(matches!(err, ScoringError::InvalidSchema(name) if name == "a"));
    }
}
