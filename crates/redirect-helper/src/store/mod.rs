//! Entry store: path and domain mappings, the three shared tokens and the
//! capacity limits, persisted as one JSON document.
//!
//! Every mutation holds the write lock across the whole-file rewrite, so two
//! writers never interleave and readers never observe a half-applied change.
//! The file is written to a temporary sibling and renamed into place.

mod document;

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{self, TokenKind};

pub use document::{Document, Entry, Settings};

/// Which of the two mapping tables an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// `/go/<name>` redirects.
    Path,
    /// Host-header redirects.
    Domain,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Path => "path",
            EntryKind::Domain => "domain",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            EntryKind::Path => "forwarding name",
            EntryKind::Domain => "domain",
        }
    }

    fn limit_label(&self) -> &'static str {
        match self {
            EntryKind::Path => "redirect",
            EntryKind::Domain => "domain",
        }
    }

    /// Hostnames compare case-insensitively; names are kept verbatim.
    pub fn normalize_key(&self, key: &str) -> String {
        match self {
            EntryKind::Path => key.to_string(),
            EntryKind::Domain => key.trim().to_ascii_lowercase(),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{} not found", .0.subject())]
    NotFound(EntryKind),

    #[error("target not set")]
    TargetNotSet,

    #[error("maximum {} count ({limit}) reached", .kind.limit_label())]
    CapacityExceeded { kind: EntryKind, limit: usize },

    #[error("store document not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode store document: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// True for errors caused by the backing file rather than by the request.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::Missing(_)
                | StoreError::Io { .. }
                | StoreError::Parse { .. }
                | StoreError::Encode(_)
        )
    }
}

/// Whether an upsert created a new key or replaced an existing target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Created,
    Updated,
}

/// Shared, persisted store. Wrap in `Arc` to share between request tasks.
pub struct Store {
    document: RwLock<Document>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open an existing document. Fails with [`StoreError::Missing`] if there is none.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Err(StoreError::Missing(path));
        }
        let document = load_document(&path)?;
        Ok(Self {
            document: RwLock::new(document),
            path: Some(path),
        })
    }

    /// Open the document, creating it with freshly generated tokens if it does
    /// not exist yet. The flag is true when the document was created.
    pub async fn open_or_init(path: impl Into<PathBuf>) -> Result<(Self, bool), StoreError> {
        let path = path.into();
        if path.exists() {
            return Ok((Self::open(path)?, false));
        }

        let mut document = Document::default();
        document.server.admin_token = auth::generate_token();
        document.server.redirect_token = auth::generate_token();
        document.server.domain_token = auth::generate_token();

        let store = Self {
            document: RwLock::new(document),
            path: Some(path),
        };
        {
            let document = store.document.read().await;
            store.persist(&document).await?;
        }
        Ok((store, true))
    }

    /// A store that never touches disk.
    #[cfg(test)]
    pub fn in_memory(document: Document) -> Self {
        Self {
            document: RwLock::new(document),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Target for `key`. Entries whose target is empty are reported as unset.
    pub async fn get_target(&self, kind: EntryKind, key: &str) -> Result<String, StoreError> {
        let key = kind.normalize_key(key);
        let document = self.document.read().await;
        let entry = document
            .entries(kind)
            .get(&key)
            .ok_or(StoreError::NotFound(kind))?;
        if entry.target.is_empty() {
            return Err(StoreError::TargetNotSet);
        }
        Ok(entry.target.clone())
    }

    /// Create `key` or replace its target. The capacity limit applies only when
    /// the key is new.
    pub async fn upsert(
        &self,
        kind: EntryKind,
        key: &str,
        target: &str,
    ) -> Result<Upserted, StoreError> {
        let key = kind.normalize_key(key);
        self.mutate(|document| {
            let limit = document.capacity(kind);
            let entries = document.entries_mut(kind);
            if let Some(entry) = entries.get_mut(&key) {
                entry.target = target.to_string();
                entry.updated_at = chrono::Utc::now();
                return Ok(Upserted::Updated);
            }
            if entries.len() >= limit {
                return Err(StoreError::CapacityExceeded { kind, limit });
            }
            entries.insert(key, Entry::new(target));
            Ok(Upserted::Created)
        })
        .await
    }

    pub async fn remove(&self, kind: EntryKind, key: &str) -> Result<Entry, StoreError> {
        let key = kind.normalize_key(key);
        self.mutate(|document| {
            document
                .entries_mut(kind)
                .remove(&key)
                .ok_or(StoreError::NotFound(kind))
        })
        .await
    }

    /// All entries of one kind, ordered by key.
    pub async fn list(&self, kind: EntryKind) -> Vec<(String, Entry)> {
        let document = self.document.read().await;
        document
            .entries(kind)
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    pub async fn count(&self, kind: EntryKind) -> usize {
        self.document.read().await.entries(kind).len()
    }

    /// Snapshot of the server settings, tokens included.
    pub async fn settings(&self) -> Settings {
        self.document.read().await.server.clone()
    }

    pub async fn set_token(&self, kind: TokenKind, token: &str) -> Result<(), StoreError> {
        self.mutate(|document| {
            *kind.select_mut(&mut document.server) = token.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_port(&self, port: u16) -> Result<(), StoreError> {
        self.mutate(|document| {
            document.server.port = port;
            Ok(())
        })
        .await
    }

    async fn mutate<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Document) -> Result<T, StoreError>,
    {
        let mut document = self.document.write().await;
        let result = operation(&mut document)?;
        self.persist(&document).await?;
        Ok(result)
    }

    async fn persist(&self, document: &Document) -> Result<(), StoreError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let io_error = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let payload = serde_json::to_vec_pretty(document)?;
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, payload)
            .await
            .map_err(io_error)?;
        if let Err(source) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(io_error(source));
        }

        tracing::debug!(path = %path.display(), "Store persisted");
        Ok(())
    }
}

fn load_document(path: &Path) -> Result<Document, StoreError> {
    let raw = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
