//! Persistence of the sync continuation token.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::StoreError;

/// Where the continuation token of the last successful run lives.
pub trait TokenStore: Send + Sync {
    /// The stored token, `None` if no token has been written yet.
    fn read(&self) -> Result<Option<String>, StoreError>;

    fn write(&self, token: &str) -> Result<(), StoreError>;

    /// Human-readable location for log and user messages.
    fn location(&self) -> String;
}

/// Plain-text token file holding the raw token string.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/space-sync-token-<source>-<destination>`.
    pub fn for_spaces(dir: &Path, source_space: &str, destination_space: &str) -> Self {
        Self::new(dir.join(format!(
            "space-sync-token-{}-{}",
            source_space, destination_space
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn read(&self) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                if token.is_empty() {
                    debug!(path = %self.path.display(), "token file is empty");
                    Ok(None)
                } else {
                    debug!(path = %self.path.display(), "read sync token");
                    Ok(Some(token.to_string()))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    fn write(&self, token: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(&self.path, token).map_err(|e| StoreError::Io {
            path: self.path.display().to_string(),
            source: e,
        })?;
        info!(path = %self.path.display(), "saved sync token");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token"));
        assert_eq!(store.read().unwrap(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::for_spaces(dir.path(), "src", "dst");
        assert!(store.location().ends_with("space-sync-token-src-dst"));
        store.write("nextsynctoken").unwrap();
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "nextsynctoken"
        );
        assert_eq!(store.read().unwrap().as_deref(), Some("nextsynctoken"));
    }

    #[test]
    fn test_whitespace_token_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token"));
        std::fs::write(store.path(), "  \n").unwrap();
        assert_eq!(store.read().unwrap(), None);
    }
}
