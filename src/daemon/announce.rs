//! Port publication.
//!
//! The daemon's effective port is written as decimal text to a well-known
//! file so clients can find it. The file only exists while the daemon runs.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFile {
    path: PathBuf,
}

impl PortFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `port` through a temporary file and a rename, so readers never
    /// observe a partial value.
    pub fn publish(&self, port: u16) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("port.tmp");
        std::fs::write(&tmp, format!("{}\n", port))?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::info!(path = %self.path.display(), port, "published port");
        Ok(())
    }

    /// Currently published port, if any.
    pub fn read(&self) -> Option<u16> {
        std::fs::read_to_string(&self.path)
            .ok()?
            .trim()
            .parse()
            .ok()
            .filter(|port: &u16| *port != 0)
    }

    /// Removes the file only while it still names `port`. Another daemon
    /// that published over it keeps its entry. Returns whether the file was
    /// removed.
    pub fn release(&self, port: u16) -> io::Result<bool> {
        match self.read() {
            Some(published) if published == port => {
                self.clear()?;
                Ok(true)
            }
            Some(published) => {
                tracing::info!(path = %self.path.display(), port, published, "port file now belongs to another daemon");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Removes the file. A file that is already gone is not an error.
    pub fn clear(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "cleared port file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
