//! SQLite-backed registry of webhook hooks (`agent_webhook_hooks`): which agent/project a
//! hook id triggers, and the hashed bearer token required to invoke it.
//!
//! Tokens are hashed with `sha2::Sha256` at rest and compared in constant time
//! (`subtle::ConstantTimeEq`) — a received token never short-circuits a byte comparison
//! against the stored hash.

use std::path::Path;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum HookStoreError {
    #[error("storage: {0}")]
    Storage(String),
}

fn hash_token(token: &str) -> [u8; 32] {
    let digest = Sha256::digest(token.as_bytes());
    digest.into()
}

#[derive(Debug, Clone)]
pub struct HookBinding {
    pub agent_id: String,
    pub project_id: String,
}

pub struct HookStore {
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl HookStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, HookStoreError> {
        let conn = rusqlite::Connection::open(path.as_ref()).map_err(|e| HookStoreError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agent_webhook_hooks (
                hook_id TEXT PRIMARY KEY,
                agent_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                token_hash BLOB NOT NULL
            );
            "#,
        )
        .map_err(|e| HookStoreError::Storage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Registers a hook, replacing any existing binding/token under the same id.
    pub async fn register(
        &self,
        hook_id: &str,
        agent_id: &str,
        project_id: &str,
        token: &str,
    ) -> Result<(), HookStoreError> {
        let hash = hash_token(token).to_vec();
        let db = self.db.clone();
        let (hook_id, agent_id, project_id) = (hook_id.to_string(), agent_id.to_string(), project_id.to_string());
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| HookStoreError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO agent_webhook_hooks (hook_id, agent_id, project_id, token_hash) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(hook_id) DO UPDATE SET agent_id = ?2, project_id = ?3, token_hash = ?4",
                rusqlite::params![hook_id, agent_id, project_id, hash],
            )
            .map_err(|e| HookStoreError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    /// Returns the hook's binding only if `token` hashes to the stored value. A missing hook
    /// and a bad token are indistinguishable to the caller (both `None`) — the webhook
    /// receiver must not leak which hook ids exist.
    pub async fn authenticate(&self, hook_id: &str, token: &str) -> Result<Option<HookBinding>, HookStoreError> {
        let db = self.db.clone();
        let hook_id = hook_id.to_string();
        let presented = hash_token(token);
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| HookStoreError::Storage("lock".into()))?;
            let row: Option<(String, String, Vec<u8>)> = conn
                .query_row(
                    "SELECT agent_id, project_id, token_hash FROM agent_webhook_hooks WHERE hook_id = ?1",
                    [&hook_id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .ok();
            let Some((agent_id, project_id, stored_hash)) = row else {
                return Ok(None);
            };
            if stored_hash.len() != presented.len() || presented.ct_eq(&stored_hash).unwrap_u8() != 1 {
                return Ok(None);
            }
            Ok(Some(HookBinding { agent_id, project_id }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn authenticate_accepts_the_registered_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = HookStore::new(dir.path().join("hooks.sqlite")).unwrap();
        store.register("hook-1", "agent-1", "proj-1", "s3cr3t").await.unwrap();

        let binding = store.authenticate("hook-1", "s3cr3t").await.unwrap().unwrap();
        assert_eq!(binding.agent_id, "agent-1");
        assert_eq!(binding.project_id, "proj-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authenticate_rejects_wrong_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = HookStore::new(dir.path().join("hooks.sqlite")).unwrap();
        store.register("hook-1", "agent-1", "proj-1", "s3cr3t").await.unwrap();

        assert!(store.authenticate("hook-1", "wrong").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authenticate_rejects_unknown_hook() {
        let dir = tempfile::tempdir().unwrap();
        let store = HookStore::new(dir.path().join("hooks.sqlite")).unwrap();
        assert!(store.authenticate("no-such-hook", "s3cr3t").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn re_registering_a_hook_rotates_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = HookStore::new(dir.path().join("hooks.sqlite")).unwrap();
        store.register("hook-1", "agent-1", "proj-1", "old").await.unwrap();
        store.register("hook-1", "agent-1", "proj-1", "new").await.unwrap();

        assert!(store.authenticate("hook-1", "old").await.unwrap().is_none());
        assert!(store.authenticate("hook-1", "new").await.unwrap().is_some());
    }
}
