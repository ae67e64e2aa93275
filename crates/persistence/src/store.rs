//! Store handle and connection management

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::schema::SCHEMA;
use crate::StoreError;

/// Handle to the local database file.
///
/// Cloning is cheap; the handle carries only the path. Connections are
/// opened per operation and never shared across awaits.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Apply the schema. Safe to call on every startup.
    pub async fn init(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        tracing::info!(path = %self.db_path.display(), "Database initialized");
        Ok(())
    }

    fn open(path: &Path) -> Result<Connection, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    /// Run `f` against a fresh connection on the blocking pool.
    pub(crate) async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("test.db"));
        store.init().await.unwrap();

        let tables: Vec<String> = store
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(names)
            })
            .await
            .unwrap();

        for table in [
            "cache_stats",
            "documents",
            "eval_results",
            "eval_runs",
            "ingestion_jobs",
            "query_log",
            "test_sets",
        ] {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("test.db"));
        store.init().await.unwrap();
        store.init().await.unwrap();
    }
}
