use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs4::tokio::AsyncFileExt;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("data"));
    name.push(suffix);
    path.with_file_name(name)
}

async fn open_lock_file(lock_path: &Path) -> std::io::Result<File> {
    File::options()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .await
}

/// Exclusive access to `path` through a sibling `.lock` file. Holding it across a read and a
/// replace makes the pair atomic for every process that goes through the same lock.
pub struct ExclusiveLock {
    lock: File,
    path: PathBuf,
}

impl ExclusiveLock {
    pub async fn acquire(path: &Path) -> Result<Self> {
        let lock_path = sibling(path, ".lock");
        let lock = open_lock_file(&lock_path)
            .await
            .with_context(|| format!("Failed to open lock file {lock_path:?}"))?;
        lock.lock_exclusive()?;
        Ok(Self {
            lock,
            path: path.to_path_buf(),
        })
    }

    /// The current contents, `None` when the file doesn't exist yet.
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        read_unlocked(&self.path).await
    }

    /// Replaces the contents so that readers either see the old or the new file, never a
    /// partially written one.
    pub async fn replace(&self, contents: &[u8]) -> Result<()> {
        let temp_path = sibling(&self.path, ".tmp");
        let mut temp = File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create {temp_path:?}"))?;
        temp.write_all(contents).await?;
        temp.sync_all().await?;
        drop(temp);
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .with_context(|| format!("Failed to move {temp_path:?} over {:?}", self.path))?;
        debug!("Replaced {:?} with {} bytes", self.path, contents.len());
        Ok(())
    }

    pub async fn release(self) -> Result<()> {
        self.lock.unlock_async().await?;
        Ok(())
    }
}

/// Replaces the contents of `path` with `contents` under an [ExclusiveLock].
pub async fn replace_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let lock = ExclusiveLock::acquire(path).await?;
    let result = lock.replace(contents).await;
    lock.release().await?;
    result
}

async fn read_unlocked(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {path:?}")),
    }
}

/// Reads the whole file under a shared lock. A missing file is reported as `None`.
pub async fn read_locked(path: &Path) -> Result<Option<Vec<u8>>> {
    let lock_path = sibling(path, ".lock");
    let lock = match open_lock_file(&lock_path).await {
        Ok(lock) => Some(lock),
        Err(e) => {
            // Read-only directories still get a best-effort read.
            warn!("Can't open lock file {lock_path:?}: {e}");
            None
        }
    };
    if let Some(lock) = lock.as_ref() {
        lock.lock_shared()?;
    }

    let result = read_unlocked(path).await;

    if let Some(lock) = lock.as_ref() {
        lock.unlock_async().await?;
    }
    result
}

/// Removes a file, treating an already missing file as success. Returns whether something was
/// deleted.
pub async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {path:?}")),
    }
}

/// Lists files in `dir` with the given extension. A missing directory has no files.
pub async fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(e).with_context(|| format!("Failed to list {dir:?}")),
    };

    let mut files = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|v| v.to_str())
            .is_some_and(|v| v.eq_ignore_ascii_case(extension));
        if matches && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
