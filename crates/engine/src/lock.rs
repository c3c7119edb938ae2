use crate::{BisectError, Result};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

pub const RUN_LOCK_FILE_NAME: &str = "bisect.lock";

/// Exclusive lock held for the lifetime of a run, so two runs never share a
/// trial directory or classification files.
#[derive(Debug)]
pub struct RunLock {
    file: std::fs::File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub fn lock_path_for_store(store_dir: &Path) -> PathBuf {
    store_dir.join(RUN_LOCK_FILE_NAME)
}

/// Take the run lock without waiting; a lock held elsewhere is an error.
pub async fn try_acquire_run_lock(store_dir: &Path) -> Result<RunLock> {
    let path = lock_path_for_store(store_dir);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::task::spawn_blocking(move || -> Result<RunLock> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                BisectError::InvalidPath(format!("open run lock {}: {err}", path.display()))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(RunLock { file, path }),
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                Err(BisectError::Lock { path })
            }
            Err(err) => Err(BisectError::Io(err)),
        }
    })
    .await
    .map_err(|err| BisectError::Io(std::io::Error::other(format!("join run lock task: {err}"))))?
}
