//! # Bisect Engine
//!
//! Isolates the candidate files that make a subject process crash, using
//! nothing but a pass/fail oracle.
//!
//! ## Loop
//!
//! ```text
//! Enumerator ──> Universe (minus persisted good/bad)
//!                   │
//!                   ▼
//!              Scheduler ──batch──> OracleRunner
//!                   ▲                  ├─> Stager (wipe + restage trial dir)
//!                   │                  └─> Subject process (survive threshold?)
//!                   └────verdict───────┘
//!                   │
//!                   ▼
//!           ClassificationStore (good.txt / bad.txt, saved after every verdict)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use bisect_engine::{
//!     ClassificationStore, OracleRunner, OracleSettings, Scheduler, StoreLayout,
//!     SubjectCommand, TokioLauncher, TrialLayout,
//! };
//! # use bisect_engine::{CandidateEnumerator, Stager};
//! # async fn demo<S: Stager + CandidateEnumerator>(tree: S) -> bisect_engine::Result<()> {
//! let store = ClassificationStore::open(StoreLayout::new(".")).await;
//! let mut scheduler = Scheduler::from_enumerator(&tree, store)?;
//! let layout = TrialLayout {
//!     source_root: "save_files".into(),
//!     trial_dir: "/srv/game/Saved/World".into(),
//!     expected_dir_name: Some("World".into()),
//! };
//! let subject = SubjectCommand::new("/srv/game/bin/server");
//! let mut oracle =
//!     OracleRunner::new(layout, subject, OracleSettings::default(), tree, TokioLauncher)?;
//! let report = scheduler.run(&mut oracle).await?;
//! println!("{} bad candidates", report.newly_bad.len());
//! # Ok(())
//! # }
//! ```

mod candidate;
pub mod collab;
mod config;
mod error;
mod lock;
pub mod oracle;
pub mod scheduler;
pub mod store;
mod stats;

pub use candidate::{display_list, split_batch, Batch, Candidate};
pub use collab::{CandidateEnumerator, CandidateFilter, StageStats, Stager, TrialSelection};
pub use config::{
    OracleSettings, SubjectCommand, TrialLayout, DEFAULT_MAX_WIPE_ATTEMPTS,
    DEFAULT_POLL_INTERVAL, DEFAULT_SUCCESS_THRESHOLD, DEFAULT_WIPE_RETRY_DELAY,
};
pub use error::{BisectError, Result};
pub use lock::{lock_path_for_store, try_acquire_run_lock, RunLock, RUN_LOCK_FILE_NAME};
pub use oracle::{
    Oracle, OracleRunner, SubjectExit, SubjectLauncher, SubjectProcess, TokioLauncher, Verdict,
};
pub use scheduler::{Scheduler, StepOutcome};
pub use stats::RunReport;
pub use store::{
    load_set, save_set, Class, ClassificationStore, SaveOutcome, StoreLayout, DEFAULT_BAD_FILE,
    DEFAULT_GOOD_FILE,
};
