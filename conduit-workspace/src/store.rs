//! SQLite-backed [`conduit::WorkspaceProvisioner`]: tracks one row per provisioned run
//! workspace. The sandboxed filesystem/exec session itself is an external capability (out of
//! scope for this crate); what's provisioned here is the durable record of which workspace id
//! belongs to which run and whether it's been torn down.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

fn system_time_to_i64(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// SQLite-backed run-workspace ledger. Own DB, independent of the run store.
pub struct Store {
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl Store {
    /// Opens or creates the database and tables.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&path).map_err(|e| StoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS run_workspaces (
                run_id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                config TEXT,
                provisioned_at INTEGER NOT NULL,
                torn_down_at INTEGER
            );
            "#,
        )
        .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Records a freshly provisioned workspace for `run_id`. Returns the generated workspace id.
    pub async fn provision(&self, run_id: &str, config: &Value) -> Result<String, StoreError> {
        let workspace_id = uuid::Uuid::new_v4().to_string();
        let now = system_time_to_i64(SystemTime::now());
        let db = self.db.clone();
        let run_id = run_id.to_string();
        let config_json = config.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO run_workspaces (run_id, workspace_id, config, provisioned_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![run_id, workspace_id, config_json, now],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(workspace_id)
        })
    }

    /// Marks a workspace torn down. No-op (not an error) if the workspace id is unknown —
    /// teardown must never fail the run that's already finishing.
    pub async fn teardown(&self, workspace_id: &str) -> Result<(), StoreError> {
        let now = system_time_to_i64(SystemTime::now());
        let db = self.db.clone();
        let workspace_id = workspace_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| StoreError::Storage("lock".into()))?;
            conn.execute(
                "UPDATE run_workspaces SET torn_down_at = ?1 WHERE workspace_id = ?2",
                rusqlite::params![now, workspace_id],
            )
            .map_err(|e| StoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }
}

/// Adapts [`Store`] to the Executor's [`conduit::WorkspaceProvisioner`] contract.
pub struct SqliteWorkspaceProvisioner {
    store: Store,
}

impl SqliteWorkspaceProvisioner {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self { store: Store::new(path)? })
    }
}

#[async_trait]
impl conduit::WorkspaceProvisioner for SqliteWorkspaceProvisioner {
    async fn provision(&self, run_id: &str, config: &Value) -> Result<String, String> {
        self.store.provision(run_id, config).await.map_err(|e| e.to_string())
    }

    async fn teardown(&self, workspace_id: &str) -> Result<(), String> {
        self.store.teardown(workspace_id).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit::WorkspaceProvisioner;
    use serde_json::json;

    #[tokio::test]
    async fn provision_then_teardown_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = SqliteWorkspaceProvisioner::new(dir.path().join("ws.sqlite")).unwrap();
        let workspace_id = provisioner.provision("run-1", &json!({"image": "default"})).await.unwrap();
        assert!(!workspace_id.is_empty());
        provisioner.teardown(&workspace_id).await.unwrap();
    }

    #[tokio::test]
    async fn teardown_of_unknown_workspace_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = SqliteWorkspaceProvisioner::new(dir.path().join("ws.sqlite")).unwrap();
        assert!(provisioner.teardown("no-such-workspace").await.is_ok());
    }
}
