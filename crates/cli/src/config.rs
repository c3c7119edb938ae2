use anyhow::{anyhow, Context, Result};
use bisect_engine::{
    OracleSettings, StoreLayout, SubjectCommand, TrialLayout, DEFAULT_BAD_FILE,
    DEFAULT_GOOD_FILE, DEFAULT_MAX_WIPE_ATTEMPTS,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "bisect.toml";

/// On-disk configuration. Relative paths are resolved against the directory
/// holding the config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BisectConfig {
    pub candidates: CandidatesSection,
    pub trial: TrialSection,
    pub subject: SubjectSection,
    pub oracle: OracleSection,
    pub store: StoreSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CandidatesSection {
    pub source_root: Option<PathBuf>,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrialSection {
    pub dir: Option<PathBuf>,
    pub expected_dir_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubjectSection {
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub inherit_output: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracleSection {
    pub success_threshold_secs: f64,
    pub poll_interval_secs: f64,
    pub wipe_retry_delay_secs: f64,
    /// 0 retries forever.
    pub max_wipe_attempts: u32,
}

impl Default for OracleSection {
    fn default() -> Self {
        let defaults = OracleSettings::default();
        Self {
            success_threshold_secs: defaults.success_threshold.as_secs_f64(),
            poll_interval_secs: defaults.poll_interval.as_secs_f64(),
            wipe_retry_delay_secs: defaults.wipe_retry_delay.as_secs_f64(),
            max_wipe_attempts: DEFAULT_MAX_WIPE_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub dir: PathBuf,
    pub good_file: String,
    pub bad_file: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            good_file: DEFAULT_GOOD_FILE.to_string(),
            bad_file: DEFAULT_BAD_FILE.to_string(),
        }
    }
}

impl BisectConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| anyhow!("invalid bisect config: {err}"))
    }

    /// Load `path`, resolving its relative paths against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut config =
            Self::from_toml(&text).with_context(|| format!("parse config {}", path.display()))?;
        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.resolve_relative(base);
        }
        Ok(config)
    }

    fn resolve_relative(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        if let Some(path) = self.candidates.source_root.as_mut() {
            rebase(path);
        }
        if let Some(path) = self.trial.dir.as_mut() {
            rebase(path);
        }
        if let Some(path) = self.subject.working_dir.as_mut() {
            rebase(path);
        }
        // Bare command names stay on PATH lookup.
        if let Some(path) = self.subject.executable.as_mut() {
            if path.components().count() > 1 {
                rebase(path);
            }
        }
        rebase(&mut self.store.dir);
    }

    pub fn source_root(&self) -> Result<&Path> {
        self.candidates
            .source_root
            .as_deref()
            .ok_or_else(|| anyhow!("candidates.source_root is not set (--source-root)"))
    }

    pub fn suffix(&self) -> Result<&str> {
        match self.candidates.suffix.as_deref() {
            Some(suffix) if !suffix.is_empty() => Ok(suffix),
            Some(_) => Err(anyhow!("candidates.suffix must not be empty")),
            None => Err(anyhow!("candidates.suffix is not set (--suffix)")),
        }
    }

    pub fn store_layout(&self) -> StoreLayout {
        StoreLayout {
            dir: self.store.dir.clone(),
            good_file: self.store.good_file.clone(),
            bad_file: self.store.bad_file.clone(),
        }
    }

    pub fn trial_layout(&self) -> Result<TrialLayout> {
        let trial_dir = self
            .trial
            .dir
            .clone()
            .ok_or_else(|| anyhow!("trial.dir is not set (--trial-dir)"))?;
        Ok(TrialLayout {
            source_root: self.source_root()?.to_path_buf(),
            trial_dir,
            expected_dir_name: self.trial.expected_dir_name.clone(),
        })
    }

    pub fn subject_command(&self) -> Result<SubjectCommand> {
        let executable = self
            .subject
            .executable
            .clone()
            .ok_or_else(|| anyhow!("subject.executable is not set (--executable)"))?;
        Ok(SubjectCommand {
            executable,
            args: self.subject.args.clone(),
            working_dir: self.subject.working_dir.clone(),
            inherit_output: self.subject.inherit_output,
        })
    }

    pub fn oracle_settings(&self) -> Result<OracleSettings> {
        let oracle = &self.oracle;
        let settings = OracleSettings {
            success_threshold: secs("success_threshold_secs", oracle.success_threshold_secs)?,
            poll_interval: secs("poll_interval_secs", oracle.poll_interval_secs)?,
            wipe_retry_delay: secs("wipe_retry_delay_secs", oracle.wipe_retry_delay_secs)?,
            max_wipe_attempts: oracle.max_wipe_attempts,
        };
        settings.validate()?;
        Ok(settings)
    }
}

fn secs(key: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|err| anyhow!("oracle.{key} = {value}: {err}"))
}
