use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BisectError>;

#[derive(Error, Debug)]
pub enum BisectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read classification file {}: {source}", .path.display())]
    StorageRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write classification file {}: {source}", .path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("candidate {candidate} is already classified as {existing}")]
    Conflict {
        candidate: String,
        existing: &'static str,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("refusing to use {} as trial directory: {reason}", .path.display())]
    UnsafeTrialDir { path: PathBuf, reason: String },

    #[error("trial directory {} could not be wiped after {attempts} attempts", .path.display())]
    StagingBusy { path: PathBuf, attempts: u32 },

    #[error("failed to create trial directory {}: {source}", .path.display())]
    TrialDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to stage trial directory: {0}")]
    Stage(String),

    #[error("failed to spawn subject {}: {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("subject process error: {0}")]
    Process(String),

    #[error("another run holds the lock at {}", .path.display())]
    Lock { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BisectError {
    /// Degraded conditions are logged and the run continues; everything else
    /// halts the run with persisted classifications left intact.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BisectError::StorageRead { .. } | BisectError::StorageWrite { .. }
        )
    }
}
