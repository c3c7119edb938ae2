use bisect_engine::{display_list, Candidate, ClassificationStore, RunReport};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub(crate) struct RunSummary {
    pub report: RunReport,
    pub good: Vec<Candidate>,
    pub bad: Vec<Candidate>,
}

impl RunSummary {
    pub(crate) fn new(report: RunReport, store: &ClassificationStore) -> Self {
        Self {
            report,
            good: store.good().iter().cloned().collect(),
            bad: store.bad().iter().cloned().collect(),
        }
    }

    pub(crate) fn render_text(&self) -> String {
        let r = &self.report;
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Evaluations: {} ({} passed, {} failed, {} splits) in {:.1}s",
            r.evaluations,
            r.passes,
            r.fails,
            r.splits,
            r.time_ms as f64 / 1000.0
        );
        let _ = writeln!(
            out,
            "Newly good ({}): {}",
            r.newly_good.len(),
            display_list(&r.newly_good)
        );
        let _ = writeln!(
            out,
            "Newly bad ({}): {}",
            r.newly_bad.len(),
            display_list(&r.newly_bad)
        );
        if r.unsaved_writes > 0 {
            let _ = writeln!(
                out,
                "Warning: {} classification writes did not reach disk",
                r.unsaved_writes
            );
        }
        let _ = write!(out, "Bad ({}): {}", self.bad.len(), display_list(&self.bad));
        out
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusOutput {
    pub source_root: PathBuf,
    pub suffix: String,
    pub good: Vec<Candidate>,
    pub bad: Vec<Candidate>,
    pub unclassified: Vec<Candidate>,
}

impl StatusOutput {
    pub(crate) fn new(
        source_root: &Path,
        suffix: &str,
        store: &ClassificationStore,
        unclassified: Vec<Candidate>,
    ) -> Self {
        Self {
            source_root: source_root.to_path_buf(),
            suffix: suffix.to_string(),
            good: store.good().iter().cloned().collect(),
            bad: store.bad().iter().cloned().collect(),
            unclassified,
        }
    }

    pub(crate) fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Source: {} (*{})",
            self.source_root.display(),
            self.suffix
        );
        let _ = writeln!(out, "Good ({}): {}", self.good.len(), display_list(&self.good));
        let _ = writeln!(out, "Bad ({}): {}", self.bad.len(), display_list(&self.bad));
        let _ = write!(
            out,
            "Unclassified ({}): {}",
            self.unclassified.len(),
            display_list(&self.unclassified)
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bisect_engine::StoreLayout;

    #[test]
    fn run_summary_text_lists_bad_candidates() {
        let store = ClassificationStore::empty(StoreLayout::new("unused"));
        let report = RunReport {
            evaluations: 7,
            passes: 3,
            fails: 4,
            splits: 3,
            newly_bad: [Candidate::from("D")].into_iter().collect(),
            time_ms: 1500,
            ..RunReport::default()
        };
        let mut summary = RunSummary::new(report, &store);
        summary.bad = vec![Candidate::from("D")];

        let text = summary.render_text();
        assert!(text.starts_with("Evaluations: 7 (3 passed, 4 failed, 3 splits) in 1.5s"));
        assert!(text.contains("Newly bad (1): [D]"));
        assert!(text.ends_with("Bad (1): [D]"));
        assert!(!text.contains("Warning"));
    }
}
