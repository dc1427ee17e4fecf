//! Atomic file operations.
//!
//! A thin layer for crash-safe writes of whole files and for the exclusive
//! lock a store directory holds while it is open.

use feedsync_core::error::{FeedError, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write as IoWrite};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A handle to one JSON file that is only ever replaced whole.
///
/// Provides:
/// - **Atomicity**: Updates are all-or-nothing via tmp file + atomic rename
/// - **Durability**: Explicit fsync before rename
///
/// Isolation comes from the caller: a store holds a [`StoreLock`] on its
/// directory for as long as it writes.
pub struct AtomicJsonFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> AtomicJsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads and deserializes the file.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(T))`: Successfully loaded and deserialized
    /// - `Ok(None)`: File doesn't exist or is empty
    /// - `Err`: Failed to read or parse the file
    pub fn load(&self) -> Result<Option<T>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        let data = serde_json::from_slice(&bytes)?;
        Ok(Some(data))
    }

    /// Saves data atomically.
    pub fn save(&self, data: &T) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_vec(data)?)
    }

    /// Removes the file. A missing file is not an error.
    ///
    /// # Returns
    ///
    /// `true` if a file was removed.
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Replaces `path` with `bytes` via a sibling tmp file, fsync and rename.
///
/// Missing parent directories are created.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| FeedError::io(format!("{} has no parent directory", path.display())))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| FeedError::io(format!("{} has no file name", path.display())))?;
    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = parent.join(format!(".{}.tmp", file_name.to_string_lossy()));
    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(bytes)?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Exclusive lock on a store directory, released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    #[allow(dead_code)]
    file: File,
    lock_path: PathBuf,
}

impl StoreLock {
    /// Takes the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::Io` if another process holds the lock.
    pub fn acquire(lock_path: PathBuf) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        use fs2::FileExt;
        file.try_lock_exclusive().map_err(|e| {
            FeedError::io(format!(
                "Failed to acquire lock {}: {}",
                lock_path.display(),
                e
            ))
        })?;

        Ok(Self { file, lock_path })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
