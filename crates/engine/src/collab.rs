//! Interfaces to the collaborators the engine drives but does not own:
//! candidate enumeration and trial-directory staging.

use crate::{Candidate, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Produces the full candidate universe for a run. Called once at startup;
/// no ordering is required.
pub trait CandidateEnumerator {
    fn list_candidates(&self) -> Result<BTreeSet<Candidate>>;
}

/// Decides whether a candidate file belongs in a trial.
pub trait CandidateFilter: Send + Sync {
    fn admits(&self, candidate: &Candidate) -> bool;
}

/// Production filter: the batch under test plus everything already known good.
#[derive(Debug, Clone, Copy)]
pub struct TrialSelection<'a> {
    pub batch: &'a [Candidate],
    pub known_good: &'a BTreeSet<Candidate>,
}

impl CandidateFilter for TrialSelection<'_> {
    fn admits(&self, candidate: &Candidate) -> bool {
        self.known_good.contains(candidate) || self.batch.contains(candidate)
    }
}

/// Counters from one staging pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub files_copied: usize,
    pub candidates_admitted: usize,
    pub candidates_skipped: usize,
    pub bytes_copied: u64,
}

/// Wipes and repopulates the trial directory.
#[async_trait]
pub trait Stager: Send + Sync {
    /// Remove `dir` and everything in it. Returns true when `dir` no longer
    /// exists or is empty afterwards.
    async fn wipe(&self, dir: &Path) -> bool;

    /// Mirror `source_root` into `dest_root`. Non-candidate files are always
    /// copied; candidate files only when `filter` admits them.
    async fn stage(
        &self,
        source_root: &Path,
        dest_root: &Path,
        filter: &dyn CandidateFilter,
    ) -> Result<StageStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_admits_batch_and_known_good_only() {
        let batch = vec![Candidate::from("b1")];
        let known_good: BTreeSet<Candidate> = [Candidate::from("g1")].into_iter().collect();
        let selection = TrialSelection {
            batch: &batch,
            known_good: &known_good,
        };

        assert!(selection.admits(&Candidate::from("b1")));
        assert!(selection.admits(&Candidate::from("g1")));
        assert!(!selection.admits(&Candidate::from("other")));
    }
}
