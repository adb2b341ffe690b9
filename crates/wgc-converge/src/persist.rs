//! File persistence with explicit overwrite policy.
//!
//! Convergence distinguishes two write semantics: "create if absent,
//! never overwrite" (secret material that must not be clobbered) and
//! "always converge to the latest content". Both are idempotent: a write
//! that would not change the file reports [`WriteOutcome::Unchanged`]
//! and performs no I/O beyond the initial read.

use std::collections::BTreeMap;
use std::fs;
use std::io;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ConvergeError, Result};

/// How a write treats an existing file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePolicy {
    /// Write only if the file does not exist; an existing file is left
    /// untouched regardless of its content.
    CreateOnly,
    /// Converge the file to the given content, writing only when the
    /// on-disk content differs.
    Overwrite,
}

/// Requested ownership and mode for a persisted file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileAttrs {
    /// Unix permission bits, e.g. `0o640`.
    pub mode: u32,
    /// Owning uid, applied only when set.
    pub uid: Option<u32>,
    /// Owning gid, applied only when set.
    pub gid: Option<u32>,
}

impl FileAttrs {
    /// Attributes with the given mode and no ownership change.
    #[must_use]
    pub const fn with_mode(mode: u32) -> Self {
        Self {
            mode,
            uid: None,
            gid: None,
        }
    }

    /// Sets the owning uid and gid.
    #[must_use]
    pub const fn owned_by(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

/// Outcome of a single write operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The file was created or its content replaced.
    Written,
    /// The file already satisfied the request; nothing was written.
    Unchanged,
}

/// Persistence collaborator for convergence passes.
pub trait FileStore {
    /// Reads a file, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Persistence`] for any I/O failure other
    /// than the file being absent.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Writes a file according to the given policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConvergeError::Persistence`] if the write fails.
    fn write(
        &mut self,
        path: &Path,
        content: &[u8],
        attrs: &FileAttrs,
        policy: WritePolicy,
    ) -> Result<WriteOutcome>;
}

/// [`FileStore`] backed by the local filesystem.
///
/// Parent directories are created as needed. On unix the requested mode
/// is applied at creation time and converged on later writes; ownership
/// is applied only when `FileAttrs` carries a uid/gid (the caller is
/// expected to run as root in that case).
#[derive(Debug, Default)]
pub struct FsStore;

impl FsStore {
    /// Creates a filesystem store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FileStore for FsStore {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConvergeError::persistence(path, e)),
        }
    }

    fn write(
        &mut self,
        path: &Path,
        content: &[u8],
        attrs: &FileAttrs,
        policy: WritePolicy,
    ) -> Result<WriteOutcome> {
        let existing = self.read(path)?;
        match (policy, &existing) {
            (WritePolicy::CreateOnly, Some(_)) => {
                debug!(path = %path.display(), "file exists, create-only write skipped");
                return Ok(WriteOutcome::Unchanged);
            }
            (WritePolicy::Overwrite, Some(current)) if current.as_slice() == content => {
                debug!(path = %path.display(), "content unchanged, write skipped");
                return Ok(WriteOutcome::Unchanged);
            }
            _ => {}
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConvergeError::persistence(path, e))?;
        }

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(attrs.mode)
                .open(path)
                .map_err(|e| ConvergeError::persistence(path, e))?;
            file.write_all(content)
                .map_err(|e| ConvergeError::persistence(path, e))?;

            // OpenOptions::mode only applies at creation; converge the
            // mode of pre-existing files too.
            if existing.is_some() {
                fs::set_permissions(path, fs::Permissions::from_mode(attrs.mode))
                    .map_err(|e| ConvergeError::persistence(path, e))?;
            }
            if attrs.uid.is_some() || attrs.gid.is_some() {
                std::os::unix::fs::chown(path, attrs.uid, attrs.gid)
                    .map_err(|e| ConvergeError::persistence(path, e))?;
            }
        }

        #[cfg(not(unix))]
        {
            fs::write(path, content).map_err(|e| ConvergeError::persistence(path, e))?;
        }

        debug!(path = %path.display(), bytes = content.len(), "file written");
        Ok(WriteOutcome::Written)
    }
}

/// A stored file in the in-memory store.
#[derive(Clone, Debug)]
struct StoredFile {
    content: Vec<u8>,
    attrs: FileAttrs,
}

/// In-memory [`FileStore`] for tests. Counts actual writes so tests can
/// assert that a converged pass performs none.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: BTreeMap<PathBuf, StoredFile>,
    write_count: usize,
}

impl MemoryStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes that actually modified the store.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Resets the write counter (between convergence passes in tests).
    pub fn reset_write_count(&mut self) {
        self.write_count = 0;
    }

    /// Returns the content of a stored file.
    #[must_use]
    pub fn content(&self, path: &Path) -> Option<&[u8]> {
        self.files.get(path).map(|f| f.content.as_slice())
    }

    /// Returns the content of a stored file as UTF-8 text.
    #[must_use]
    pub fn text(&self, path: &Path) -> Option<&str> {
        self.files
            .get(path)
            .and_then(|f| std::str::from_utf8(&f.content).ok())
    }

    /// Returns the attributes a file was stored with.
    #[must_use]
    pub fn attrs(&self, path: &Path) -> Option<&FileAttrs> {
        self.files.get(path).map(|f| &f.attrs)
    }

    /// Pre-seeds a file, as if it existed before the pass.
    pub fn seed(&mut self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>, attrs: FileAttrs) {
        self.files.insert(
            path.into(),
            StoredFile {
                content: content.into(),
                attrs,
            },
        );
    }
}

impl FileStore for MemoryStore {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        Ok(self.files.get(path).map(|f| f.content.clone()))
    }

    fn write(
        &mut self,
        path: &Path,
        content: &[u8],
        attrs: &FileAttrs,
        policy: WritePolicy,
    ) -> Result<WriteOutcome> {
        match (policy, self.files.get(path)) {
            (WritePolicy::CreateOnly, Some(_)) => Ok(WriteOutcome::Unchanged),
            (WritePolicy::Overwrite, Some(current)) if current.content == content => {
                Ok(WriteOutcome::Unchanged)
            }
            _ => {
                self.files.insert(
                    path.to_path_buf(),
                    StoredFile {
                        content: content.to_vec(),
                        attrs: *attrs,
                    },
                );
                self.write_count += 1;
                Ok(WriteOutcome::Written)
            }
        }
    }
}
