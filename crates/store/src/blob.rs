//! Blob gateway port and local-filesystem implementation.
//!
//! The gateway issues scoped, time-bounded write URLs and probes object
//! existence. It carries no business rules; path construction and quota
//! checks happen in the gateway tier.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use cs_domain::error::{Error, Result};

/// A scoped, time-bounded upload target.
#[derive(Debug, Clone)]
pub struct UploadUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Object-store contract the core depends on.
pub trait BlobGateway: Send + Sync {
    /// Issue a write URL for `path` valid for `ttl`.
    fn generate_write_url(&self, path: &str, content_type: &str, ttl: Duration)
        -> Result<UploadUrl>;

    /// Probe existence; returns the object size when present.
    fn exists(&self, path: &str) -> Result<Option<u64>>;

    /// Full URI for handing the object to an STT back end.
    fn uri(&self, path: &str) -> String;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local filesystem implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filesystem-backed blob store for the dev composition. "Signed URLs"
/// are `file://` URIs — the dev upload endpoint writes directly under the
/// root. Cloud deployments implement [`BlobGateway`] against a real object
/// store instead.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(Error::Io)?;
        Ok(Self { root })
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        // Object paths are relative and must not escape the root.
        if path.starts_with('/') || path.split('/').any(|part| part == "..") {
            return Err(Error::Validation(format!("invalid blob path: {path}")));
        }
        Ok(self.root.join(path))
    }

    /// Store bytes at `path`, creating parent directories. Used by the dev
    /// upload endpoint and by tests.
    pub fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.full_path(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        std::fs::write(&full, bytes).map_err(Error::Io)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobGateway for LocalBlobStore {
    fn generate_write_url(
        &self,
        path: &str,
        _content_type: &str,
        ttl: Duration,
    ) -> Result<UploadUrl> {
        let full = self.full_path(path)?;
        Ok(UploadUrl {
            url: format!("file://{}", full.display()),
            expires_at: Utc::now() + ttl,
        })
    }

    fn exists(&self, path: &str) -> Result<Option<u64>> {
        let full = self.full_path(path)?;
        match std::fs::metadata(&full) {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn uri(&self, path: &str) -> String {
        format!("file://{}", self.root.join(path).display())
    }
}
