use crate::Candidate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Summary of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Candidates that were unclassified when the run started
    pub universe: usize,

    /// Oracle evaluations performed
    pub evaluations: usize,

    pub passes: usize,
    pub fails: usize,

    /// Failing batches that were halved
    pub splits: usize,

    /// Candidates classified during this run
    pub newly_good: BTreeSet<Candidate>,
    pub newly_bad: BTreeSet<Candidate>,

    /// Classification writes that did not reach disk
    pub unsaved_writes: usize,

    /// Wall-clock time in milliseconds
    pub time_ms: u64,
}
