//! Advisory lock files shared by every process opening the same store.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive lock on a file, released on drop.
///
/// In-memory stores hand out [`StoreLock::unlocked`], which holds nothing.
#[derive(Debug, Default)]
#[must_use = "the lock is released as soon as it is dropped"]
pub struct StoreLock {
    file: Option<File>,
}

impl StoreLock {
    pub fn unlocked() -> Self {
        Self::default()
    }

    /// Block until `path` is exclusively locked, creating it if needed.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }

    /// Lock `path` if no one else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file: Some(file) })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to lock {}", path.display())),
        }
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }
}

/// `<path>.<suffix>`, next to the store file.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == fs2::lock_contended_error().kind()
}
