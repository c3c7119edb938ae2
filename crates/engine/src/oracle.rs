//! One pass/fail judgment: stage a trial directory, run the subject process
//! and watch whether it survives the success threshold.
//!
//! Surviving the threshold is taken as proof of a working configuration.
//! A failure that only shows up after the threshold is misread as a pass;
//! the threshold has to be chosen longer than the slowest failure of interest.

use crate::collab::{Stager, TrialSelection};
use crate::config::{OracleSettings, SubjectCommand, TrialLayout};
use crate::store::StoreLayout;
use crate::{BisectError, Candidate, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one oracle evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The subject was still alive at the success threshold and was killed.
    Pass { elapsed: Duration },
    /// The subject exited on its own before the threshold. `exit_code` is
    /// `None` when it was terminated by a signal.
    Fail {
        exit_code: Option<i32>,
        elapsed: Duration,
    },
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Verdict::Pass { elapsed } | Verdict::Fail { elapsed, .. } => *elapsed,
        }
    }
}

/// Anything that can judge a batch against the known-good baseline.
#[async_trait]
pub trait Oracle: Send {
    async fn evaluate(
        &mut self,
        batch: &[Candidate],
        known_good: &BTreeSet<Candidate>,
    ) -> Result<Verdict>;
}

/// Exit information of a finished subject process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectExit {
    pub code: Option<i32>,
}

/// Handle to a running subject process.
///
/// `wait` must be cancel-safe: the runner drops and re-polls it between
/// liveness heartbeats.
#[async_trait]
pub trait SubjectProcess: Send {
    fn id(&self) -> Option<u32>;

    /// `None` while the process is alive.
    fn try_wait(&mut self) -> Result<Option<SubjectExit>>;

    async fn wait(&mut self) -> Result<SubjectExit>;

    /// Forced termination.
    async fn kill(&mut self) -> Result<()>;
}

pub trait SubjectLauncher: Send + Sync {
    fn spawn(&self, command: &SubjectCommand) -> Result<Box<dyn SubjectProcess>>;
}

/// Launches the subject with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl SubjectLauncher for TokioLauncher {
    fn spawn(&self, command: &SubjectCommand) -> Result<Box<dyn SubjectProcess>> {
        let mut cmd = tokio::process::Command::new(&command.executable);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = command.effective_working_dir() {
            cmd.current_dir(dir);
        }
        if !command.inherit_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = cmd.spawn().map_err(|source| BisectError::Spawn {
            executable: command.executable.clone(),
            source,
        })?;
        Ok(Box::new(TokioProcess { child }))
    }
}

struct TokioProcess {
    child: tokio::process::Child,
}

#[async_trait]
impl SubjectProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<SubjectExit>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|status| SubjectExit {
            code: status.code(),
        }))
    }

    async fn wait(&mut self) -> Result<SubjectExit> {
        let status = self.child.wait().await?;
        Ok(SubjectExit {
            code: status.code(),
        })
    }

    async fn kill(&mut self) -> Result<()> {
        self.child
            .kill()
            .await
            .map_err(|err| BisectError::Process(format!("kill subject: {err}")))
    }
}

/// Production oracle: wipe, restage, launch, watch.
pub struct OracleRunner<S, L = TokioLauncher> {
    layout: TrialLayout,
    subject: SubjectCommand,
    settings: OracleSettings,
    stager: S,
    launcher: L,
}

impl<S: Stager, L: SubjectLauncher> OracleRunner<S, L> {
    pub fn new(
        layout: TrialLayout,
        subject: SubjectCommand,
        settings: OracleSettings,
        stager: S,
        launcher: L,
    ) -> Result<Self> {
        layout.validate()?;
        settings.validate()?;
        Ok(Self {
            layout,
            subject,
            settings,
            stager,
            launcher,
        })
    }

    pub fn layout(&self) -> &TrialLayout {
        &self.layout
    }

    /// Refuse to run when wiping the trial directory would delete `store`.
    pub fn guard_store(self, store: &StoreLayout) -> Result<Self> {
        self.layout.validate_store_dir(&store.dir)?;
        Ok(self)
    }

    /// Leave the trial directory present and empty. Retries while a wipe
    /// fails and the directory is still there.
    async fn reset_trial_dir(&self) -> Result<()> {
        let dir = &self.layout.trial_dir;
        let max_attempts = self.settings.max_wipe_attempts;
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            if self.stager.wipe(dir).await {
                break;
            }
            // A failed wipe that still removed the directory is good enough.
            if !tokio::fs::try_exists(dir).await.unwrap_or(true) {
                break;
            }
            if max_attempts != 0 && attempts >= max_attempts {
                return Err(BisectError::StagingBusy {
                    path: dir.clone(),
                    attempts,
                });
            }
            log::error!(
                "Failed to wipe {}, trying again in {}s (attempt {attempts})",
                dir.display(),
                self.settings.wipe_retry_delay.as_secs_f64()
            );
            tokio::time::sleep(self.settings.wipe_retry_delay).await;
        }

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| BisectError::TrialDirCreate {
                path: dir.clone(),
                source,
            })
    }

    async fn watch(&self, mut process: Box<dyn SubjectProcess>) -> Result<Verdict> {
        let started = Instant::now();
        let deadline = started + self.settings.success_threshold;
        let mut heartbeat = tokio::time::interval_at(
            started + self.settings.poll_interval,
            self.settings.poll_interval,
        );
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                exit = process.wait() => {
                    let exit = exit?;
                    let elapsed = started.elapsed();
                    log_exit(exit, elapsed);
                    return Ok(Verdict::Fail { exit_code: exit.code, elapsed });
                }
                _ = tokio::time::sleep_until(deadline) => break,
                _ = heartbeat.tick() => {
                    log::debug!(
                        "Subject pid {:?} alive after {}s",
                        process.id(),
                        started.elapsed().as_secs()
                    );
                }
            }
        }

        // It may have exited right at the deadline; that still counts as a failure.
        if let Some(exit) = process.try_wait()? {
            let elapsed = started.elapsed();
            log_exit(exit, elapsed);
            return Ok(Verdict::Fail {
                exit_code: exit.code,
                elapsed,
            });
        }

        log::info!(
            "Subject did not exit after {}s, successful trial; killing it",
            self.settings.success_threshold.as_secs()
        );
        let elapsed = started.elapsed();
        process.kill().await?;
        match process.wait().await {
            Ok(exit) => log_exit(exit, started.elapsed()),
            Err(err) => log::warn!("Failed to reap killed subject: {err}"),
        }
        Ok(Verdict::Pass { elapsed })
    }
}

fn log_exit(exit: SubjectExit, elapsed: Duration) {
    match exit.code {
        Some(code) => log::info!(
            "Subject exited with code {code} after {} seconds",
            elapsed.as_secs()
        ),
        None => log::info!(
            "Subject terminated by signal after {} seconds",
            elapsed.as_secs()
        ),
    }
}

#[async_trait]
impl<S: Stager, L: SubjectLauncher> Oracle for OracleRunner<S, L> {
    async fn evaluate(
        &mut self,
        batch: &[Candidate],
        known_good: &BTreeSet<Candidate>,
    ) -> Result<Verdict> {
        self.reset_trial_dir().await?;

        let selection = TrialSelection { batch, known_good };
        let stats = self
            .stager
            .stage(&self.layout.source_root, &self.layout.trial_dir, &selection)
            .await?;
        log::debug!(
            "Staged {} files ({} candidates admitted, {} skipped, {} bytes)",
            stats.files_copied,
            stats.candidates_admitted,
            stats.candidates_skipped,
            stats.bytes_copied
        );

        let process = self.launcher.spawn(&self.subject)?;
        log::debug!(
            "Launched {} (pid {:?})",
            self.subject.executable.display(),
            process.id()
        );
        self.watch(process).await
    }
}
