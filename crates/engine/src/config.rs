use crate::{BisectError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SUCCESS_THRESHOLD: Duration = Duration::from_secs(120);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WIPE_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_WIPE_ATTEMPTS: u32 = 12;

/// How the subject process is launched for each trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectCommand {
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// Defaults to the executable's parent directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Pass the subject's stdout/stderr through instead of discarding them.
    #[serde(default)]
    pub inherit_output: bool,
}

impl SubjectCommand {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            inherit_output: false,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn effective_working_dir(&self) -> Option<PathBuf> {
        self.working_dir.clone().or_else(|| {
            self.executable
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
    }
}

/// Timing knobs of the oracle runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleSettings {
    /// Survive this long and the trial passes.
    pub success_threshold: Duration,
    /// Liveness heartbeat cadence while waiting on the subject.
    pub poll_interval: Duration,
    pub wipe_retry_delay: Duration,
    /// 0 retries forever.
    pub max_wipe_attempts: u32,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wipe_retry_delay: DEFAULT_WIPE_RETRY_DELAY,
            max_wipe_attempts: DEFAULT_MAX_WIPE_ATTEMPTS,
        }
    }
}

impl OracleSettings {
    pub fn validate(&self) -> Result<()> {
        if self.success_threshold.is_zero() {
            return Err(BisectError::Config(
                "success threshold must be greater than zero".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(BisectError::Config(
                "poll interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Source tree and the directory that gets wiped and restaged every trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialLayout {
    pub source_root: PathBuf,
    pub trial_dir: PathBuf,
    /// Required final path component of `trial_dir`, if set.
    #[serde(default)]
    pub expected_dir_name: Option<String>,
}

impl TrialLayout {
    /// Refuse layouts where wiping the trial directory could destroy the
    /// source tree or an unintended directory.
    pub fn validate(&self) -> Result<()> {
        let unsafe_dir = |reason: String| BisectError::UnsafeTrialDir {
            path: self.trial_dir.clone(),
            reason,
        };

        if let Some(expected) = &self.expected_dir_name {
            let actual = self
                .trial_dir
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            if actual != expected {
                return Err(unsafe_dir(format!(
                    "final path component is {actual:?}, expected {expected:?}"
                )));
            }
        }

        let trial = absolute(&self.trial_dir)?;
        let source = absolute(&self.source_root)?;
        if trial.parent().is_none() {
            return Err(unsafe_dir("it is a filesystem root".into()));
        }
        if trial.starts_with(&source) {
            return Err(unsafe_dir(format!(
                "it lies inside the source root {}",
                source.display()
            )));
        }
        if source.starts_with(&trial) {
            return Err(unsafe_dir(format!(
                "it contains the source root {}",
                source.display()
            )));
        }
        Ok(())
    }

    /// Refuse a classification store that a trial wipe would delete.
    pub fn validate_store_dir(&self, store_dir: &Path) -> Result<()> {
        let trial = absolute(&self.trial_dir)?;
        let store = absolute(store_dir)?;
        if store.starts_with(&trial) {
            return Err(BisectError::UnsafeTrialDir {
                path: self.trial_dir.clone(),
                reason: format!(
                    "it contains the classification store {}",
                    store.display()
                ),
            });
        }
        Ok(())
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    std::path::absolute(path)
        .map_err(|err| BisectError::InvalidPath(format!("{}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn layout(tmp: &TempDir, trial: &str) -> TrialLayout {
        let source_root = tmp.path().join("src");
        std::fs::create_dir_all(&source_root).expect("mkdir");
        TrialLayout {
            source_root,
            trial_dir: tmp.path().join(trial),
            expected_dir_name: None,
        }
    }

    #[test]
    fn accepts_sibling_trial_dir() {
        let tmp = TempDir::new().expect("tempdir");
        layout(&tmp, "TheIsland_WP").validate().expect("valid");
    }

    #[test]
    fn expected_name_guards_the_wipe_target() {
        let tmp = TempDir::new().expect("tempdir");
        let mut layout = layout(&tmp, "Saved");
        layout.expected_dir_name = Some("TheIsland_WP".into());
        let err = layout.validate().expect_err("name mismatch");
        assert!(matches!(err, BisectError::UnsafeTrialDir { .. }));

        layout.trial_dir = tmp.path().join("TheIsland_WP");
        layout.validate().expect("name matches");
    }

    #[test]
    fn rejects_nested_layouts() {
        let tmp = TempDir::new().expect("tempdir");
        let inside = layout(&tmp, "src/trial");
        assert!(inside.validate().is_err());

        let mut containing = layout(&tmp, "unused");
        containing.trial_dir = tmp.path().to_path_buf();
        assert!(containing.validate().is_err());
    }

    #[test]
    fn store_dir_must_survive_the_wipe() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = layout(&tmp, "trial");
        std::fs::create_dir_all(&layout.trial_dir).expect("mkdir trial");

        for store_dir in [layout.trial_dir.clone(), layout.trial_dir.join("state")] {
            let err = layout
                .validate_store_dir(&store_dir)
                .expect_err("store inside trial dir");
            assert!(matches!(err, BisectError::UnsafeTrialDir { .. }));
        }

        layout
            .validate_store_dir(tmp.path())
            .expect("store next to the trial dir");
        layout
            .validate_store_dir(&tmp.path().join("state"))
            .expect("sibling store");
    }

    #[test]
    fn working_dir_defaults_to_executable_parent() {
        let cmd = SubjectCommand::new("/opt/server/bin/server");
        assert_eq!(
            cmd.effective_working_dir(),
            Some(PathBuf::from("/opt/server/bin"))
        );
        assert_eq!(SubjectCommand::new("server").effective_working_dir(), None);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let settings = OracleSettings {
            success_threshold: Duration::ZERO,
            ..OracleSettings::default()
        };
        assert!(settings.validate().is_err());
        OracleSettings::default().validate().expect("defaults valid");
    }
}
