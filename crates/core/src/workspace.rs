//! File access rooted at the repository working tree.
//!
//! All paths handed to [`Workspace`] are repository-relative with forward
//! slashes, exactly as git reports them.

use std::io;
use std::path::PathBuf;

use tracing::debug;

/// The repository working tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path for a repository-relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).is_file()
    }

    /// Read a text file. `Ok(None)` if it does not exist; `InvalidData` if
    /// it is not UTF-8.
    pub fn read(&self, relative: &str) -> io::Result<Option<String>> {
        match std::fs::read(self.path(relative)) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write a file, creating parent directories as needed.
    pub fn write(&self, relative: &str, content: &str) -> io::Result<()> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        debug!(path = relative, bytes = content.len(), "wrote file");
        Ok(())
    }

    /// Remove a file. Returns `false` if it was already absent.
    pub fn remove(&self, relative: &str) -> io::Result<bool> {
        match std::fs::remove_file(self.path(relative)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
