//! Bisection over the unclassified candidates.
//!
//! The current batch is evaluated against everything already known good.
//! A passing batch is good as a whole, a failing singleton is bad, and a
//! failing larger batch is halved: the front half is deferred on a LIFO
//! stack and the back half is tested next.
//!
//! # Limitation
//!
//! Halving assumes failures are monotone under union: when a batch fails,
//! at least one half fails on its own against the same baseline. That holds
//! when each bad candidate breaks the subject by itself. A failure that needs
//! two candidates together is lost once they land in different halves, and
//! both end up classified good.

use crate::collab::CandidateEnumerator;
use crate::oracle::{Oracle, Verdict};
use crate::store::{ClassificationStore, SaveOutcome};
use crate::{display_list, split_batch, Batch, Candidate, Result, RunReport};
use std::collections::BTreeSet;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// More batches remain.
    Continue,
    /// Every candidate of the universe is classified.
    Finished,
}

pub struct Scheduler {
    store: ClassificationStore,
    universe: BTreeSet<Candidate>,
    current: Option<Batch>,
    pending: Vec<Batch>,
    report: RunReport,
}

impl Scheduler {
    /// The universe is `candidates` minus everything the store already
    /// classified; the first batch is the whole universe in sorted order.
    pub fn new(candidates: BTreeSet<Candidate>, store: ClassificationStore) -> Self {
        let universe: BTreeSet<Candidate> = candidates
            .into_iter()
            .filter(|candidate| !store.is_classified(candidate))
            .collect();
        let current = if universe.is_empty() {
            None
        } else {
            Some(universe.iter().cloned().collect())
        };
        let report = RunReport {
            universe: universe.len(),
            ..RunReport::default()
        };

        Self {
            store,
            universe,
            current,
            pending: Vec::new(),
            report,
        }
    }

    pub fn from_enumerator(
        enumerator: &dyn CandidateEnumerator,
        store: ClassificationStore,
    ) -> Result<Self> {
        let candidates = enumerator.list_candidates()?;
        Ok(Self::new(candidates, store))
    }

    pub fn universe(&self) -> &BTreeSet<Candidate> {
        &self.universe
    }

    pub fn current(&self) -> Option<&[Candidate]> {
        self.current.as_deref()
    }

    /// Deferred batches, bottom of the stack first.
    pub fn pending(&self) -> &[Batch] {
        &self.pending
    }

    pub fn store(&self) -> &ClassificationStore {
        &self.store
    }

    pub fn into_store(self) -> ClassificationStore {
        self.store
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn is_finished(&self) -> bool {
        self.current.is_none()
    }

    /// Run one oracle evaluation and apply the splitting policy.
    pub async fn step<O>(&mut self, oracle: &mut O) -> Result<StepOutcome>
    where
        O: Oracle + ?Sized,
    {
        let Some(batch) = self.current.take() else {
            return Ok(StepOutcome::Finished);
        };

        log::info!("=====================================================");
        log::info!("Running subject with candidates {}", display_list(&batch));
        log::info!("Good candidates {}", display_list(self.store.good()));
        log::info!("Bad candidates {}", display_list(self.store.bad()));
        log::info!("Stack {}", self.pending.len());

        let verdict = match oracle.evaluate(&batch, self.store.good()).await {
            Ok(verdict) => verdict,
            Err(err) => {
                // Keep the state consistent for callers that inspect it after a fatal error.
                self.current = Some(batch);
                return Err(err);
            }
        };
        self.report.evaluations += 1;

        match verdict {
            Verdict::Pass { .. } => {
                self.report.passes += 1;
                log::info!("Trial passed, good candidates: {}", display_list(&batch));
                let outcome = match self.store.mark_good(&batch).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        self.current = Some(batch);
                        return Err(err);
                    }
                };
                self.note_save(outcome);
                self.report.newly_good.extend(batch);
            }
            Verdict::Fail { exit_code, elapsed } => {
                self.report.fails += 1;
                log::info!(
                    "Trial failed (exit code {exit_code:?} after {}s)",
                    elapsed.as_secs()
                );

                if batch.len() == 1 {
                    let candidate = &batch[0];
                    log::info!("Bad candidate found and isolated: {candidate}");
                    let outcome = match self.store.mark_bad(candidate).await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            self.current = Some(batch);
                            return Err(err);
                        }
                    };
                    self.note_save(outcome);
                    self.report.newly_bad.extend(batch);
                } else {
                    let (front, back) = split_batch(batch);
                    log::info!(
                        "Put candidates on the stack for later testing {}",
                        display_list(&front)
                    );
                    self.report.splits += 1;
                    self.pending.push(front);
                    self.current = Some(back);
                    return Ok(StepOutcome::Continue);
                }
            }
        }

        self.current = self.pending.pop();
        if self.current.is_some() {
            Ok(StepOutcome::Continue)
        } else {
            log::info!("No more candidates to test!");
            log::info!("Bad candidates: {}", display_list(self.store.bad()));
            Ok(StepOutcome::Finished)
        }
    }

    /// Step until every candidate is classified.
    pub async fn run<O>(&mut self, oracle: &mut O) -> Result<RunReport>
    where
        O: Oracle + ?Sized,
    {
        let started = Instant::now();
        log::info!(
            "Assuming good candidates from earlier run: {}",
            display_list(self.store.good())
        );
        log::info!(
            "Assuming bad candidates from earlier run: {}",
            display_list(self.store.bad())
        );
        log::info!("Unclassified candidates: {}", display_list(&self.universe));

        let result = loop {
            match self.step(oracle).await {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Finished) => break Ok(()),
                Err(err) => break Err(err),
            }
        };
        self.report.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result.map(|()| self.report.clone())
    }

    /// Check that classified, current and deferred candidates partition the
    /// universe. Returns a description of the first violation found.
    pub fn partition_violation(&self) -> Option<String> {
        let mut seen: BTreeSet<&Candidate> = BTreeSet::new();
        let classified = self.report.newly_good.iter().chain(&self.report.newly_bad);
        let unresolved = self.current.iter().chain(&self.pending).flatten();
        for candidate in classified.chain(unresolved) {
            if !seen.insert(candidate) {
                return Some(format!("{candidate} appears more than once"));
            }
            if !self.universe.contains(candidate) {
                return Some(format!("{candidate} is not part of the universe"));
            }
        }
        if seen.len() != self.universe.len() {
            return Some(format!(
                "{} of {} candidates accounted for",
                seen.len(),
                self.universe.len()
            ));
        }
        if let Some(both) = self.store.good().intersection(self.store.bad()).next() {
            return Some(format!("{both} is both good and bad"));
        }
        None
    }

    fn note_save(&mut self, outcome: SaveOutcome) {
        if outcome == SaveOutcome::NotPersisted {
            self.report.unsaved_writes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreLayout;
    use crate::BisectError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Fails whenever the staged trial contains `bad`.
    struct OneBad {
        bad: Candidate,
        calls: usize,
    }

    #[async_trait]
    impl Oracle for OneBad {
        async fn evaluate(
            &mut self,
            batch: &[Candidate],
            known_good: &BTreeSet<Candidate>,
        ) -> Result<Verdict> {
            self.calls += 1;
            let elapsed = Duration::from_secs(1);
            if batch.contains(&self.bad) || known_good.contains(&self.bad) {
                Ok(Verdict::Fail {
                    exit_code: Some(1),
                    elapsed,
                })
            } else {
                Ok(Verdict::Pass { elapsed })
            }
        }
    }

    struct Broken;

    #[async_trait]
    impl Oracle for Broken {
        async fn evaluate(
            &mut self,
            _batch: &[Candidate],
            _known_good: &BTreeSet<Candidate>,
        ) -> Result<Verdict> {
            Err(BisectError::Stage("disk full".into()))
        }
    }

    fn universe(ids: &[&str]) -> BTreeSet<Candidate> {
        ids.iter().map(|id| Candidate::from(*id)).collect()
    }

    fn batch(ids: &[&str]) -> Batch {
        ids.iter().map(|id| Candidate::from(*id)).collect()
    }

    fn memory_store() -> ClassificationStore {
        ClassificationStore::empty(StoreLayout::new("unused"))
    }

    #[tokio::test]
    async fn failing_batch_splits_front_half_onto_stack() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = ClassificationStore::empty(StoreLayout::new(dir.path()));
        let mut scheduler = Scheduler::new(universe(&["c1", "c2", "c3", "c4", "c5"]), store);
        let mut oracle = OneBad {
            bad: Candidate::from("c4"),
            calls: 0,
        };

        let outcome = scheduler.step(&mut oracle).await.expect("step");
        assert_eq!(outcome, StepOutcome::Continue);
        assert_eq!(scheduler.pending(), &[batch(&["c1", "c2"])]);
        assert_eq!(
            scheduler.current().map(<[Candidate]>::to_vec),
            Some(batch(&["c3", "c4", "c5"]))
        );
        assert!(scheduler.store().good().is_empty());
        assert_eq!(scheduler.partition_violation(), None);
    }

    #[tokio::test]
    async fn empty_universe_finishes_without_evaluating() {
        let mut scheduler = Scheduler::new(BTreeSet::new(), memory_store());
        let mut oracle = OneBad {
            bad: Candidate::from("x"),
            calls: 0,
        };

        assert!(scheduler.is_finished());
        let report = scheduler.run(&mut oracle).await.expect("run");
        assert_eq!(report.evaluations, 0);
        assert_eq!(oracle.calls, 0);
    }

    #[tokio::test]
    async fn oracle_error_keeps_batch_and_propagates() {
        let mut scheduler = Scheduler::new(universe(&["a", "b"]), memory_store());
        let err = scheduler.run(&mut Broken).await.expect_err("fatal");
        assert!(matches!(err, BisectError::Stage(_)));
        assert_eq!(scheduler.report().evaluations, 0);
        assert_eq!(scheduler.partition_violation(), None);
    }

    #[tokio::test]
    async fn rejected_classification_keeps_batch_in_partition() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let store = |name: &str| {
            ClassificationStore::empty(StoreLayout::new(dir.path().join(name)))
        };
        let mut scheduler = Scheduler::new(universe(&["a"]), store("first"));
        // Classified behind the scheduler's back, so the passing verdict clashes.
        scheduler
            .store
            .mark_bad(&Candidate::from("a"))
            .await
            .expect("mark bad");
        let mut oracle = OneBad {
            bad: Candidate::from("x"),
            calls: 0,
        };

        let err = scheduler.step(&mut oracle).await.expect_err("conflict");
        assert!(matches!(err, BisectError::Conflict { .. }));
        assert_eq!(
            scheduler.current().map(<[Candidate]>::to_vec),
            Some(batch(&["a"]))
        );
        assert!(scheduler.store().good().is_empty());
        assert_eq!(scheduler.partition_violation(), None);

        let mut singleton = Scheduler::new(universe(&["b"]), store("second"));
        singleton
            .store
            .mark_good(&[Candidate::from("b")])
            .await
            .expect("mark good");
        let mut failing = OneBad {
            bad: Candidate::from("b"),
            calls: 0,
        };
        let err = singleton.step(&mut failing).await.expect_err("conflict");
        assert!(matches!(err, BisectError::Conflict { existing: "good", .. }));
        assert_eq!(
            singleton.current().map(<[Candidate]>::to_vec),
            Some(batch(&["b"]))
        );
        assert_eq!(singleton.partition_violation(), None);
    }

    #[tokio::test]
    async fn unsaved_writes_are_counted_not_fatal() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").expect("write blocker");
        let store = ClassificationStore::empty(StoreLayout::new(&blocker));
        let mut scheduler = Scheduler::new(universe(&["a", "b"]), store);
        let mut oracle = OneBad {
            bad: Candidate::from("b"),
            calls: 0,
        };

        let report = scheduler.run(&mut oracle).await.expect("run");
        assert_eq!(report.newly_bad, universe(&["b"]));
        assert_eq!(report.newly_good, universe(&["a"]));
        assert_eq!(report.unsaved_writes, 2);
    }
}
