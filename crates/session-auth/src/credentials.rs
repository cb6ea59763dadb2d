//! Persisted credential jar
//!
//! A flat JSON object mapping entry names (`access_token`, `refresh_token`,
//! `user`) to string values. All writes go through a temp file + rename so a
//! crash never leaves a half-written jar, and a tokio Mutex serializes writers.
//!
//! The store is a pure accessor: it never looks inside the values it holds.
//! Reads never fail. A missing or unreadable jar behaves like an empty one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Credential jar backed by a JSON file, or by memory only.
pub struct CredentialStore {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, String>>,
}

impl CredentialStore {
    /// Load the jar from `path`.
    ///
    /// A missing file is created as `{}`. A file that fails to parse is
    /// logged and replaced by an empty jar on the next write, since a corrupt
    /// entry must read as absent rather than abort the client.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(entries) => {
                    info!(path = %path.display(), entries = entries.len(), "loaded credentials");
                    entries
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "credential file is corrupt, starting empty");
                    HashMap::new()
                }
            }
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let entries = HashMap::new();
            write_atomic(&path, &entries).await?;
            entries
        };

        Ok(Self {
            path: Some(path),
            entries: Mutex::new(entries),
        })
    }

    /// A store that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Read an entry. Missing entries and empty values both read as `None`.
    pub async fn read(&self, name: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries.get(name).filter(|v| !v.is_empty()).cloned()
    }

    /// Add or replace an entry and persist.
    pub async fn write(&self, name: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(name.to_string(), value.to_string());
        debug!(name, "wrote credential entry");
        self.persist(&entries).await
    }

    /// Remove an entry and persist. Clearing an absent entry is a no-op.
    pub async fn clear(&self, name: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if entries.remove(name).is_some() {
            debug!(name, "cleared credential entry");
            self.persist(&entries).await?;
        }
        Ok(())
    }

    /// Remove every named entry under one lock and persist once.
    pub async fn clear_all(&self, names: &[&str]) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        for name in names {
            entries.remove(*name);
        }
        if entries.len() != before {
            debug!(cleared = before - entries.len(), "cleared credential entries");
            self.persist(&entries).await?;
        }
        Ok(())
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the jar holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, entries).await,
            None => Ok(()),
        }
    }
}

/// Write the jar atomically with 0600 permissions (the file holds bearer tokens).
async fn write_atomic(path: &Path, entries: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
