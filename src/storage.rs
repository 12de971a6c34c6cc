//! Blocking byte storage over local paths and `gs://` URIs.

use anyhow::{Context, Result};
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

const GCS_SCHEME: &str = "gs://";

/// A named location: local path or object-store object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote { bucket: String, key: String },
}

impl Location {
    /// Parse `gs://bucket/key` or a local path.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.strip_prefix(GCS_SCHEME) {
            Some(rest) => {
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                anyhow::ensure!(!bucket.is_empty(), "missing bucket in '{}'", raw);
                Ok(Location::Remote {
                    bucket: bucket.to_string(),
                    key: key.trim_matches('/').to_string(),
                })
            }
            None => Ok(Location::Local(PathBuf::from(raw))),
        }
    }

    /// Append a relative segment (may contain `/`).
    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        match self {
            Location::Local(path) => Location::Local(path.join(segment)),
            Location::Remote { bucket, key } if key.is_empty() => Location::Remote {
                bucket: bucket.clone(),
                key: segment.to_string(),
            },
            Location::Remote { bucket, key } => Location::Remote {
                bucket: bucket.clone(),
                key: format!("{}/{}", key, segment),
            },
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote { .. })
    }

    /// Last path component.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Location::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Location::Remote { key, .. } => key.rsplit('/').next().filter(|n| !n.is_empty()).map(str::to_string),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote { bucket, key } => write!(f, "{}{}/{}", GCS_SCHEME, bucket, key),
        }
    }
}

/// Synchronous facade over `object_store`.
///
/// Each call drives its future to completion on a private current-thread
/// runtime, so callers stay blocking.
pub struct BlobStore {
    runtime: Runtime,
    remote_override: Option<Arc<dyn ObjectStore>>,
}

impl BlobStore {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build storage runtime")?;
        Ok(Self {
            runtime,
            remote_override: None,
        })
    }

    /// Serve every remote location from `store` regardless of bucket.
    pub fn with_remote_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.remote_override = Some(store);
        self
    }

    fn resolve(&self, location: &Location) -> Result<(Arc<dyn ObjectStore>, ObjectPath)> {
        match location {
            Location::Local(path) => {
                let absolute = std::path::absolute(path)
                    .with_context(|| format!("invalid local path {}", path.display()))?;
                let object_path = ObjectPath::from_absolute_path(&absolute)
                    .with_context(|| format!("invalid local path {}", path.display()))?;
                Ok((Arc::new(LocalFileSystem::new()), object_path))
            }
            Location::Remote { bucket, key } => {
                let store: Arc<dyn ObjectStore> = match &self.remote_override {
                    Some(store) => store.clone(),
                    None => Arc::new(
                        GoogleCloudStorageBuilder::from_env()
                            .with_bucket_name(bucket)
                            .build()
                            .with_context(|| format!("Failed to open bucket '{}'", bucket))?,
                    ),
                };
                Ok((store, ObjectPath::from(key.as_str())))
            }
        }
    }

    /// Read the whole object.
    pub fn get(&self, location: &Location) -> Result<Vec<u8>> {
        self.get_optional(location)?
            .with_context(|| format!("{} not found", location))
    }

    /// Read the whole object, `None` if it does not exist.
    pub fn get_optional(&self, location: &Location) -> Result<Option<Vec<u8>>> {
        let (store, path) = self.resolve(location)?;
        let result = self.runtime.block_on(async {
            match store.get(&path).await {
                Ok(result) => result.bytes().await.map(Some),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        });

        let bytes = result.with_context(|| format!("Failed to read {}", location))?;
        debug!(location = %location, found = bytes.is_some(), "Read object");
        Ok(bytes.map(|b| b.to_vec()))
    }

    /// Write (create or replace) the object.
    pub fn put(&self, location: &Location, bytes: Vec<u8>) -> Result<()> {
        let (store, path) = self.resolve(location)?;
        let size = bytes.len();
        self.runtime
            .block_on(store.put(&path, PutPayload::from(bytes)))
            .with_context(|| format!("Failed to write {}", location))?;
        debug!(location = %location, size = size, "Wrote object");
        Ok(())
    }

    /// Upload a local file to `location`.
    pub fn upload_file(&self, local: &Path, location: &Location) -> Result<()> {
        let bytes = std::fs::read(local)
            .with_context(|| format!("Failed to read {}", local.display()))?;
        self.put(location, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn test_parse_remote() {
        let loc = Location::parse("gs://scoring-bucket/data/clients.csv").unwrap();
        assert_eq!(
            loc,
            Location::Remote {
                bucket: "scoring-bucket".to_string(),
                key: "data/clients.csv".to_string(),
            }
        );
        assert_eq!(loc.file_name().as_deref(), Some("clients.csv"));
        assert_eq!(loc.to_string(), "gs://scoring-bucket/data/clients.csv");
    }

    #[test]
    fn test_parse_local_and_join() {
        let loc = Location::parse("models/registry").unwrap();
        assert!(!loc.is_remote());
        assert_eq!(
            loc.join("credit-rfc/stages.json"),
            Location::Local(PathBuf::from("models/registry/credit-rfc/stages.json"))
        );

        let bucket_root = Location::parse("gs://bucket").unwrap();
        assert_eq!(bucket_root.join("/predictions/a.csv").to_string(), "gs://bucket/predictions/a.csv");
        assert!(Location::parse("gs:///key").is_err());
    }

    #[test]
    fn test_local_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new().unwrap();
        let loc = Location::Local(dir.path().join("nested/object.bin"));

        assert_eq!(store.get_optional(&loc).unwrap(), None);
        store.put(&loc, b"payload".to_vec()).unwrap();
        assert_eq!(store.get(&loc).unwrap(), b"payload".to_vec());
    }

    #[test]
    fn test_remote_override() {
        let store = BlobStore::new()
            .unwrap()
            .with_remote_store(Arc::new(InMemory::new()));
        let loc = Location::parse("gs://any-bucket/predictions/out.csv").unwrap();

        store.put(&loc, b"id,prediction\n".to_vec()).unwrap();
        assert_eq!(store.get(&loc).unwrap(), b"id,prediction\n".to_vec());
        assert!(store.get(&Location::parse("gs://any-bucket/missing").unwrap()).is_err());
    }
}
