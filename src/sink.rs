//! Result persistence: local CSV with a fallback directory, optional upload

use crate::config::{OutputConfig, StorageConfig};
use crate::error::{Result, ScoringError};
use crate::scorer::ScoringResult;
use crate::storage::{BlobStore, Location};
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_NAME_ATTEMPTS: usize = 1000;

/// Where the results ended up
#[derive(Debug, Clone, PartialEq)]
pub struct SinkOutcome {
    /// Local file holding the results
    pub path: PathBuf,
    /// True when the preferred directory could not be written
    pub used_fallback: bool,
    /// Object-store URI, when the upload succeeded
    pub uploaded_to: Option<String>,
}

/// Writes scoring results as CSV
pub struct ResultSink {
    fallback_dir: PathBuf,
    bucket: String,
    upload_folder: String,
    store: Arc<BlobStore>,
}

impl ResultSink {
    pub fn new(
        fallback_dir: impl Into<PathBuf>,
        bucket: impl Into<String>,
        upload_folder: impl Into<String>,
        store: Arc<BlobStore>,
    ) -> Self {
        Self {
            fallback_dir: fallback_dir.into(),
            bucket: bucket.into(),
            upload_folder: upload_folder.into(),
            store,
        }
    }

    pub fn from_config(output: &OutputConfig, storage: &StorageConfig, store: Arc<BlobStore>) -> Self {
        Self::new(
            &output.fallback_dir,
            &storage.bucket,
            &output.upload_folder,
            store,
        )
    }

    /// `{prefix}_{YYYYMMDDHHMMSS}.csv` for the given instant
    pub fn file_name(prefix: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}.csv", prefix, at.format("%Y%m%d%H%M%S"))
    }

    /// Persist `result` next to the input, or in the fallback directory.
    pub fn persist(
        &self,
        result: &ScoringResult,
        preferred_dir: Option<&Path>,
        prefix: &str,
        upload: bool,
    ) -> Result<SinkOutcome> {
        self.persist_at(result, preferred_dir, prefix, upload, Utc::now())
    }

    pub fn persist_at(
        &self,
        result: &ScoringResult,
        preferred_dir: Option<&Path>,
        prefix: &str,
        upload: bool,
        at: DateTime<Utc>,
    ) -> Result<SinkOutcome> {
        let file_name = Self::file_name(prefix, at);

        let primary_error = match preferred_dir {
            Some(dir) => match write_table(result, dir, &file_name) {
                Ok(path) => {
                    info!(path = %path.display(), rows = result.n_rows(), "Results written");
                    return Ok(self.finish(path, false, upload));
                }
                Err(e) => {
                    warn!(
                        dir = %dir.display(),
                        fallback = %self.fallback_dir.display(),
                        error = %format!("{:#}", e),
                        "Could not write results, retrying in fallback directory"
                    );
                    Some((dir.join(&file_name), e))
                }
            },
            None => None,
        };

        let written = fs::create_dir_all(&self.fallback_dir)
            .with_context(|| format!("Failed to create {}", self.fallback_dir.display()))
            .and_then(|_| write_table(result, &self.fallback_dir, &file_name));

        match written {
            Ok(path) => {
                info!(path = %path.display(), rows = result.n_rows(), "Results written");
                Ok(self.finish(path, primary_error.is_some(), upload))
            }
            Err(e) => {
                let primary = match primary_error {
                    Some((path, primary)) => format!("{} ({:#})", path.display(), primary),
                    None => "<no preferred location>".to_string(),
                };
                Err(ScoringError::SinkWrite {
                    primary,
                    fallback: self.fallback_dir.join(&file_name),
                    reason: format!("{:#}", e),
                })
            }
        }
    }

    fn finish(&self, path: PathBuf, used_fallback: bool, upload: bool) -> SinkOutcome {
        let uploaded_to = if upload { self.upload(&path) } else { None };
        SinkOutcome {
            path,
            used_fallback,
            uploaded_to,
        }
    }

    /// Upload failures leave the local result in place.
    fn upload(&self, path: &Path) -> Option<String> {
        let file_name = path.file_name()?.to_string_lossy().into_owned();
        let destination = Location::Remote {
            bucket: self.bucket.clone(),
            key: self.upload_folder.trim_matches('/').to_string(),
        }
        .join(&file_name);

        match self.store.upload_file(path, &destination) {
            Ok(()) => {
                info!(destination = %destination, "Results uploaded");
                Some(destination.to_string())
            }
            Err(e) => {
                warn!(
                    destination = %destination,
                    error = %format!("{:#}", e),
                    "Upload failed, results are only available locally"
                );
                None
            }
        }
    }
}

/// Write into a file under `dir` that did not exist before. Runs landing
/// on the same name get a `_1`, `_2`, ... suffix; a failed write leaves no
/// partial file behind.
fn write_table(result: &ScoringResult, dir: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    let (path, file) = create_unique(dir, file_name)?;

    let written = result
        .table
        .write_csv(BufWriter::new(file))
        .with_context(|| format!("Failed to write {}", path.display()));
    if let Err(e) = written {
        let _ = fs::remove_file(&path);
        return Err(e);
    }
    Ok(path)
}

fn create_unique(dir: &Path, file_name: &str) -> anyhow::Result<(PathBuf, File)> {
    let stem = file_name.strip_suffix(".csv").unwrap_or(file_name);
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = match attempt {
            0 => dir.join(file_name),
            n => dir.join(format!("{}_{}.csv", stem, n)),
        };
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", path.display()))
            }
        }
    }
    anyhow::bail!(
        "no free file name for {} in {}",
        file_name,
        dir.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::table::{Column, Table};
    use chrono::TimeZone;
    use object_store::local::LocalFileSystem;
    use object_store::memory::InMemory;
    use pretty_assertions::assert_eq;

    fn result() -> ScoringResult {
        ScoringResult {
            table: Table::from_columns(vec![
                Column::ints("id", vec![1, 2]),
                Column::ints("prediction", vec![0, 1]),
                Column::floats("probability_default", vec![0.25, f64::NAN]),
            ])
            .unwrap(),
            prediction_columns: vec!["prediction".to_string()],
            probability_columns: vec!["probability_default".to_string()],
            positive_probability_column: Some("probability_default".to_string()),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn sink(fallback: &Path, store: BlobStore) -> ResultSink {
        ResultSink::new(fallback, "scoring-bucket", "predictions", Arc::new(store))
    }

    #[test]
    fn test_file_name_pattern() {
        assert_eq!(
            ResultSink::file_name("scores", at()),
            "scores_20240309140507.csv"
        );
    }

    #[test]
    fn test_writes_next_to_input() {
        let input_dir = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let sink = sink(fallback.path(), BlobStore::new().unwrap());

        let outcome = sink
            .persist_at(&result(), Some(input_dir.path()), "predictions", false, at())
            .unwrap();

        assert_eq!(
            outcome.path,
            input_dir.path().join("predictions_20240309140507.csv")
        );
        assert!(!outcome.used_fallback);
        assert_eq!(
            fs::read_to_string(&outcome.path).unwrap(),
            "id,prediction,probability_default\n1,0,0.25\n2,1,\n"
        );
    }

    #[test]
    fn test_unwritable_preferred_dir_falls_back() {
        let root = tempfile::tempdir().unwrap();
        let fallback = root.path().join("outputs");
        let sink = sink(&fallback, BlobStore::new().unwrap());

        let outcome = sink
            .persist_at(
                &result(),
                Some(&root.path().join("does/not/exist")),
                "predictions",
                false,
                at(),
            )
            .unwrap();

        assert!(outcome.used_fallback);
        assert_eq!(outcome.path, fallback.join("predictions_20240309140507.csv"));
        assert!(outcome.path.exists());
    }

    #[test]
    fn test_fallback_failure_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        // a regular file where the fallback directory should be
        let blocker = root.path().join("outputs");
        fs::write(&blocker, b"").unwrap();
        let sink = sink(&blocker, BlobStore::new().unwrap());

        let err = sink
            .persist_at(&result(), Some(&root.path().join("missing")), "p", false, at())
            .unwrap_err();
        assert!(matches!(err, ScoringError::SinkWrite { .. }));
    }

    #[test]
    fn test_upload_to_bucket_folder() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(InMemory::new());
        let store = BlobStore::new().unwrap().with_remote_store(remote);
        let sink = sink(dir.path(), store);

        let outcome = sink
            .persist_at(&result(), Some(dir.path()), "predictions", true, at())
            .unwrap();

        let uri = "gs://scoring-bucket/predictions/predictions_20240309140507.csv";
        assert_eq!(outcome.uploaded_to.as_deref(), Some(uri));
        let uploaded = sink.store.get(&Location::parse(uri).unwrap()).unwrap();
        assert_eq!(uploaded, fs::read(&outcome.path).unwrap());
    }

    #[test]
    fn test_failed_upload_keeps_local_result() {
        let dir = tempfile::tempdir().unwrap();
        // the remote root is a regular file, so every write into it fails
        let not_a_dir = dir.path().join("bucket-root");
        fs::write(&not_a_dir, b"").unwrap();
        let remote = Arc::new(LocalFileSystem::new_with_prefix(&not_a_dir).unwrap());
        let sink = sink(dir.path(), BlobStore::new().unwrap().with_remote_store(remote));

        let outcome = sink
            .persist_at(&result(), Some(dir.path()), "predictions", true, at())
            .unwrap();

        assert_eq!(outcome.uploaded_to, None);
        assert!(!outcome.used_fallback);
        assert!(outcome.path.exists());
        assert_eq!(
            fs::read_to_string(&outcome.path).unwrap(),
            "id,prediction,probability_default\n1,0,0.25\n2,1,\n"
        );
    }

    #[test]
    fn test_same_second_runs_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink(&dir.path().join("outputs"), BlobStore::new().unwrap());

        let first = sink
            .persist_at(&result(), Some(dir.path()), "predictions", false, at())
            .unwrap();
        let second = sink
            .persist_at(&result(), Some(dir.path()), "predictions", false, at())
            .unwrap();

        assert_eq!(first.path, dir.path().join("predictions_20240309140507.csv"));
        assert_eq!(second.path, dir.path().join("predictions_20240309140507_1.csv"));
        assert!(!second.used_fallback);
        assert_eq!(
            fs::read(&first.path).unwrap(),
            fs::read(&second.path).unwrap()
        );
    }
}
