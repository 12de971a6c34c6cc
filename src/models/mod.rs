//! Model loading, the handle interface and schema discovery

pub mod handle;
pub mod loader;
pub mod onnx;
pub mod schema;

#[cfg(test)]
pub(crate) mod testing;

pub use handle::{ModelHandle, PackagedModel};
pub use loader::ModelLoader;
pub use schema::{FeatureSchema, SchemaExtractor};
