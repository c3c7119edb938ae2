use crate::{BisectError, Candidate, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const DEFAULT_GOOD_FILE: &str = "good.txt";
pub const DEFAULT_BAD_FILE: &str = "bad.txt";

/// The two persisted classification sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Class {
    Good,
    Bad,
}

impl Class {
    pub const fn as_str(self) -> &'static str {
        match self {
            Class::Good => "good",
            Class::Bad => "bad",
        }
    }

    const fn opposite(self) -> Class {
        match self {
            Class::Good => Class::Bad,
            Class::Bad => Class::Good,
        }
    }
}

/// Where the classification files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreLayout {
    pub dir: PathBuf,
    pub good_file: String,
    pub bad_file: String,
}

impl StoreLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            good_file: DEFAULT_GOOD_FILE.to_string(),
            bad_file: DEFAULT_BAD_FILE.to_string(),
        }
    }

    #[must_use]
    pub fn path_for(&self, class: Class) -> PathBuf {
        match class {
            Class::Good => self.dir.join(&self.good_file),
            Class::Bad => self.dir.join(&self.bad_file),
        }
    }
}

/// Result of persisting a set after a classification change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The write failed; the classification is held in memory only.
    NotPersisted,
}

/// Persisted record of candidates already proven good or bad.
///
/// The two sets are disjoint and append-only. Every change is followed by a
/// full overwrite of the affected file (one identifier per line); a failed
/// write is logged and the run carries on with the in-memory state.
#[derive(Debug)]
pub struct ClassificationStore {
    layout: StoreLayout,
    good: BTreeSet<Candidate>,
    bad: BTreeSet<Candidate>,
}

impl ClassificationStore {
    /// Load both sets. Unreadable files degrade to an empty set with an error
    /// log; candidates found in both files are kept as bad.
    pub async fn open(layout: StoreLayout) -> Self {
        let good = load_or_empty(&layout.path_for(Class::Good)).await;
        let bad = load_or_empty(&layout.path_for(Class::Bad)).await;

        let mut store = Self {
            layout,
            good,
            bad,
        };
        let overlap: Vec<Candidate> = store.good.intersection(&store.bad).cloned().collect();
        if !overlap.is_empty() {
            log::error!(
                "Persisted classifications overlap, keeping as bad: {}",
                crate::display_list(&overlap)
            );
            for candidate in &overlap {
                store.good.remove(candidate);
            }
        }
        store
    }

    /// In-memory store with nothing persisted yet.
    pub fn empty(layout: StoreLayout) -> Self {
        Self {
            layout,
            good: BTreeSet::new(),
            bad: BTreeSet::new(),
        }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn good(&self) -> &BTreeSet<Candidate> {
        &self.good
    }

    pub fn bad(&self) -> &BTreeSet<Candidate> {
        &self.bad
    }

    pub fn is_classified(&self, candidate: &Candidate) -> bool {
        self.good.contains(candidate) || self.bad.contains(candidate)
    }

    fn set(&self, class: Class) -> &BTreeSet<Candidate> {
        match class {
            Class::Good => &self.good,
            Class::Bad => &self.bad,
        }
    }

    /// Add a passing batch to `good` and persist it.
    pub async fn mark_good(&mut self, batch: &[Candidate]) -> Result<SaveOutcome> {
        self.insert(Class::Good, batch)?;
        Ok(self.persist(Class::Good).await)
    }

    /// Add an isolated failing candidate to `bad` and persist it.
    pub async fn mark_bad(&mut self, candidate: &Candidate) -> Result<SaveOutcome> {
        self.insert(Class::Bad, std::slice::from_ref(candidate))?;
        Ok(self.persist(Class::Bad).await)
    }

    fn insert(&mut self, class: Class, candidates: &[Candidate]) -> Result<()> {
        let opposite = self.set(class.opposite());
        if let Some(clash) = candidates.iter().find(|c| opposite.contains(*c)) {
            return Err(BisectError::Conflict {
                candidate: clash.to_string(),
                existing: class.opposite().as_str(),
            });
        }
        let target = match class {
            Class::Good => &mut self.good,
            Class::Bad => &mut self.bad,
        };
        target.extend(candidates.iter().cloned());
        Ok(())
    }

    async fn persist(&self, class: Class) -> SaveOutcome {
        let path = self.layout.path_for(class);
        match save_set(&path, self.set(class)).await {
            Ok(()) => SaveOutcome::Saved,
            Err(err) => {
                log::error!(
                    "{err}; {} classifications held in memory only",
                    class.as_str()
                );
                SaveOutcome::NotPersisted
            }
        }
    }
}

async fn load_or_empty(path: &Path) -> BTreeSet<Candidate> {
    match load_set(path).await {
        Ok(set) => set,
        Err(err) => {
            log::error!("{err}; treating it as empty");
            BTreeSet::new()
        }
    }
}

/// Read one identifier per line. A missing file is an empty set.
pub async fn load_set(path: &Path) -> Result<BTreeSet<Candidate>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(source) => {
            return Err(BisectError::StorageRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    // Only line terminators are stripped; ids may start or end with spaces.
    Ok(text
        .lines()
        .filter(|line| !line.is_empty())
        .map(Candidate::from)
        .collect())
}

/// Overwrite `path` with the full set, one identifier per line.
pub async fn save_set(path: &Path, set: &BTreeSet<Candidate>) -> Result<()> {
    let write_err = |source| BisectError::StorageWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    if let Some(bad) = set.iter().find(|c| c.as_str().contains(['\n', '\r'])) {
        return Err(write_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("identifier {:?} contains a line break", bad.as_str()),
        )));
    }

    let mut body = String::new();
    for candidate in set {
        body.push_str(candidate.as_str());
        body.push('\n');
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, body).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}
