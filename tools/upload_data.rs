//! Upload Data
//!
//! Copies every CSV in a local directory to `gs://{bucket}/{folder}/` so
//! scoring runs can read their input straight from the bucket.

use anyhow::{Context, Result};
use batch_scoring::config::{AppConfig, DEFAULT_CONFIG_PATH};
use batch_scoring::storage::{BlobStore, Location};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "upload-data")]
#[command(about = "Upload local CSV files to the scoring bucket")]
struct Args {
    /// Configuration file (for the bucket name)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Local directory holding the CSV files
    #[arg(long, default_value = "data")]
    dir: PathBuf,

    /// Destination folder inside the bucket
    #[arg(long, default_value = "data")]
    folder: String,

    /// Bucket override
    #[arg(long)]
    bucket: Option<String>,
}

/// CSV files directly inside `dir`, sorted by name
fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load_from_path(&args.config)?;
    let bucket = args.bucket.unwrap_or(config.storage.bucket);
    let destination = Location::Remote {
        bucket,
        key: args.folder.trim_matches('/').to_string(),
    };

    let store = BlobStore::new()?;
    let files = csv_files(&args.dir)?;
    info!(dir = %args.dir.display(), files = files.len(), destination = %destination, "Uploading");

    let mut failed = 0usize;
    for path in &files {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let target = destination.join(&name);
        match store.upload_file(path, &target) {
            Ok(()) => info!(file = %name, target = %target, "Uploaded"),
            Err(e) => {
                failed += 1;
                error!(file = %name, error = %format!("{:#}", e), "Upload failed");
            }
        }
    }

    anyhow::ensure!(failed == 0, "{} of {} uploads failed", failed, files.len());
    info!(uploaded = files.len(), "Upload complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_only_csv_files_are_selected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "id\n1\n").unwrap();
        fs::write(dir.path().join("a.csv"), "id\n2\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "skip").unwrap();
        fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let files = csv_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }
}
