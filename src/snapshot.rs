//! # Schema snapshot
//!
//! A JSON file holding one [`TableRow`] per discovered column, optionally
//! annotated with a human readable description. The file is the assistant's
//! cached view of the connected database; discovery and description generation
//! both write through [`SnapshotStore::update`], which merges instead of
//! replacing so descriptions survive a later rediscovery.
//!
//! ```json
//! [
//!   {
//!     "table_name": "orders",
//!     "column_name": "total",
//!     "data_type": "numeric",
//!     "description": "Order total in USD"
//!   }
//! ]
//! ```
//!
//! Rows are never pruned: a column dropped from the database stays in the
//! snapshot until the file is removed by hand.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DbaiError, Result};

/// One column of one table in the connected database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub table_name: String,
    pub column_name: String,
    /// Vendor type name as reported by `information_schema`.
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TableRow {
    pub fn new(table_name: &str, column_name: &str, data_type: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
            data_type: data_type.to_string(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Identity of the row within a snapshot: `table:column`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.table_name, self.column_name)
    }
}

/// Merge `incoming` into `existing`, keyed by [`TableRow::key`].
///
/// Keys keep the position of their first appearance. When a key exists on both
/// sides the incoming fields win, except that an incoming row without a
/// description keeps the existing one.
pub fn merge_rows(existing: Vec<TableRow>, incoming: Vec<TableRow>) -> Vec<TableRow> {
    let mut merged: Vec<TableRow> = Vec::with_capacity(existing.len() + incoming.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for row in existing.into_iter().chain(incoming) {
        match positions.get(&row.key()) {
            Some(&index) => {
                let slot = &mut merged[index];
                let description = row.description.or_else(|| slot.description.take());
                *slot = TableRow { description, ..row };
            }
            None => {
                positions.insert(row.key(), merged.len());
                merged.push(row);
            }
        }
    }

    merged
}

/// File-backed snapshot of the connected database's columns.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot.
    ///
    /// A missing or empty file is an empty snapshot. Content that is not a JSON
    /// array of rows is a [`DbaiError::Snapshot`].
    pub fn load(&self) -> Result<Vec<TableRow>> {
        if !self.path.exists() {
            debug!("No snapshot at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|err| {
            DbaiError::Snapshot(format!("{}: {}", self.path.display(), err))
        })
    }

    /// Overwrite the snapshot with `rows`, pretty-printed.
    pub fn save(&self, rows: &[TableRow]) -> Result<()> {
        let json = serde_json::to_string_pretty(rows)
            .map_err(|err| DbaiError::Snapshot(err.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)?;

        debug!("Saved {} rows to {}", rows.len(), self.path.display());
        Ok(())
    }

    /// Merge `rows` into the stored snapshot and write the result back.
    ///
    /// # Returns
    /// The merged snapshot as written.
    pub fn update(&self, rows: Vec<TableRow>) -> Result<Vec<TableRow>> {
        let merged = merge_rows(self.load()?, rows);
        self.save(&merged)?;
        Ok(merged)
    }
}
