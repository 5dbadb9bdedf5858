//! # Schema discovery
//!
//! Reads the live column list from the connected database and folds it into
//! the snapshot.

use std::sync::Arc;

use tracing::info;

use crate::{
    error::{DbaiError, Result},
    snapshot::{SnapshotStore, TableRow},
    source::SourceDatabase,
};

pub struct SchemaDiscovery {
    source: Arc<dyn SourceDatabase>,
    snapshot: SnapshotStore,
}

impl SchemaDiscovery {
    pub fn new(source: Arc<dyn SourceDatabase>, snapshot: SnapshotStore) -> Self {
        Self { source, snapshot }
    }

    pub fn snapshot(&self) -> &SnapshotStore {
        &self.snapshot
    }

    /// Query the live schema and merge it into the snapshot.
    ///
    /// # Returns
    /// The live rows, without descriptions. An empty database yields an empty
    /// list; the snapshot is rewritten either way.
    ///
    /// # Errors
    /// - [`DbaiError::Configuration`] when no database name is configured.
    /// - [`DbaiError::Query`] when the metadata query fails.
    pub async fn discover(&self) -> Result<Vec<TableRow>> {
        if self.source.database_name().is_none_or(str::is_empty) {
            return Err(DbaiError::Configuration("DB_NAME is not set".to_string()));
        }

        let rows = self.source.fetch_table_rows().await?;
        self.snapshot.update(rows.clone())?;

        info!(
            "Discovered {} columns in {} ({})",
            rows.len(),
            self.source.database_name().unwrap_or_default(),
            self.source.dialect().as_str()
        );
        Ok(rows)
    }

    /// The stored snapshot, or a fresh discovery when nothing is stored yet.
    pub async fn snapshot_or_discover(&self) -> Result<Vec<TableRow>> {
        let rows = self.snapshot.load()?;
        if rows.is_empty() {
            return self.discover().await;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSource;

    fn discovery(source: FakeSource) -> (tempfile::TempDir, SchemaDiscovery) {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotStore::new(dir.path().join("database_structure.json"));
        (dir, SchemaDiscovery::new(Arc::new(source), snapshot))
    }

    #[tokio::test]
    async fn test_discover_persists_and_returns_live_rows() {
        let (_dir, discovery) = discovery(FakeSource::orders());
        discovery
            .snapshot()
            .save(&[TableRow::new("orders", "id", "integer").with_description("Primary key")])
            .unwrap();

        let live = discovery.discover().await.unwrap();

        assert_eq!(live, FakeSource::orders().rows());
        assert!(live.iter().all(|row| row.description.is_none()));

        let stored = discovery.snapshot().load().unwrap();
        assert_eq!(stored.len(), 4);
        assert_eq!(stored[0].description.as_deref(), Some("Primary key"));
    }

    #[tokio::test]
    async fn test_empty_database_discovers_nothing() {
        let (_dir, discovery) = discovery(FakeSource::new(Vec::new()));

        assert!(discovery.discover().await.unwrap().is_empty());
        assert!(discovery.snapshot().path().exists());
        assert!(discovery.snapshot().load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_leaves_snapshot_untouched() {
        let (_dir, discovery) =
            discovery(FakeSource::orders().with_metadata_error("permission denied"));

        assert!(matches!(discovery.discover().await, Err(DbaiError::Query(_))));
        assert!(!discovery.snapshot().path().exists());
    }

    #[tokio::test]
    async fn test_snapshot_is_preferred_over_discovery() {
        let (_dir, discovery) = discovery(FakeSource::orders());
        let cached = vec![TableRow::new("legacy", "id", "integer")];
        discovery.snapshot().save(&cached).unwrap();

        assert_eq!(discovery.snapshot_or_discover().await.unwrap(), cached);
    }

    #[tokio::test]
    async fn test_empty_snapshot_falls_back_to_discovery() {
        let (_dir, discovery) = discovery(FakeSource::orders());
        assert_eq!(
            discovery.snapshot_or_discover().await.unwrap(),
            FakeSource::orders().rows()
        );
    }
}
