//! Input table loading from local files or object storage

use crate::error::{Result, ScoringError};
use crate::storage::{BlobStore, Location};
use crate::types::table::Table;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// A loaded input table and where it came from
#[derive(Debug, Clone)]
pub struct InputTable {
    pub location: Location,
    pub table: Table,
}

impl InputTable {
    /// Directory results should be written next to, for local inputs.
    ///
    /// Remote inputs have no local directory; results go straight to the
    /// fallback directory.
    pub fn preferred_output_dir(&self) -> Option<PathBuf> {
        match &self.location {
            Location::Local(path) => Some(
                path.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from(".")),
            ),
            Location::Remote { .. } => None,
        }
    }
}

/// Reads CSV input tables
pub struct TableSource {
    store: Arc<BlobStore>,
}

impl TableSource {
    pub fn new(store: Arc<BlobStore>) -> Self {
        Self { store }
    }

    /// Load the table at `location`. Local and remote inputs produce the
    /// same table shape; `id_columns` are kept as raw text.
    pub fn load(&self, location: &Location, id_columns: &[String]) -> Result<InputTable> {
        let table = match location {
            Location::Local(path) => {
                let file = File::open(path)
                    .map_err(|e| ScoringError::Input(format!("{}: {}", path.display(), e)))?;
                Table::read_csv_with_text(BufReader::new(file), id_columns)?
            }
            Location::Remote { .. } => {
                let bytes = self
                    .store
                    .get(location)
                    .map_err(|e| ScoringError::Storage(format!("{:#}", e)))?;
                Table::read_csv_with_text(bytes.as_slice(), id_columns)?
            }
        };

        info!(
            location = %location,
            rows = table.n_rows(),
            columns = table.n_cols(),
            "Input table loaded"
        );
        Ok(InputTable {
            location: location.clone(),
            table,
        })
    }
}
