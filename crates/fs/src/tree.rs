use async_trait::async_trait;
use bisect_engine::{
    BisectError, Candidate, CandidateEnumerator, CandidateFilter, Result, StageStats, Stager,
};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Source tree whose files ending in `suffix` are candidates.
#[derive(Debug, Clone)]
pub struct CandidateTree {
    source_root: PathBuf,
    suffix: String,
}

/// One entry of the source tree, relative to its root.
#[derive(Debug, Clone)]
struct SourceEntry {
    relative: PathBuf,
    is_dir: bool,
    /// Set for files matching the candidate suffix.
    candidate: Option<Candidate>,
}

impl CandidateTree {
    pub fn new(source_root: impl AsRef<Path>, suffix: impl Into<String>) -> Self {
        Self {
            source_root: source_root.as_ref().to_path_buf(),
            suffix: suffix.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// All files under `source_root` whose names end with `suffix`.
    pub fn enumerate(source_root: &Path, suffix: &str) -> Result<BTreeSet<Candidate>> {
        let entries = walk(source_root, suffix)?;
        Ok(entries.into_iter().filter_map(|e| e.candidate).collect())
    }
}

impl CandidateEnumerator for CandidateTree {
    fn list_candidates(&self) -> Result<BTreeSet<Candidate>> {
        let candidates = Self::enumerate(&self.source_root, &self.suffix)?;
        log::info!(
            "Found {} candidate files ending in {:?} under {}",
            candidates.len(),
            self.suffix,
            self.source_root.display()
        );
        Ok(candidates)
    }
}

#[async_trait]
impl Stager for CandidateTree {
    async fn wipe(&self, dir: &Path) -> bool {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                log::warn!("Failed to remove {}: {err}", dir.display());
                is_empty_dir(dir).await
            }
        }
    }

    async fn stage(
        &self,
        source_root: &Path,
        dest_root: &Path,
        filter: &dyn CandidateFilter,
    ) -> Result<StageStats> {
        let root = source_root.to_path_buf();
        let suffix = self.suffix.clone();
        let entries = tokio::task::spawn_blocking(move || walk(&root, &suffix))
            .await
            .map_err(|err| BisectError::Stage(format!("join source walk: {err}")))??;

        let mut stats = StageStats::default();
        let mut plan = Vec::with_capacity(entries.len());
        for entry in entries {
            match &entry.candidate {
                Some(candidate) if !filter.admits(candidate) => {
                    stats.candidates_skipped += 1;
                    continue;
                }
                Some(_) => stats.candidates_admitted += 1,
                None => {}
            }
            plan.push(entry);
        }

        let source_root = source_root.to_path_buf();
        let dest_root = dest_root.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || copy_plan(&source_root, &dest_root, &plan))
            .await
            .map_err(|err| BisectError::Stage(format!("join staging copy: {err}")))??;
        stats.files_copied = copied.0;
        stats.bytes_copied = copied.1;
        Ok(stats)
    }
}

/// Walk `root` iteratively; entries come back in a stable, parent-first order.
fn walk(root: &Path, suffix: &str) -> Result<Vec<SourceEntry>> {
    if !root.is_dir() {
        return Err(BisectError::InvalidPath(format!(
            "source root {} is not a directory",
            root.display()
        )));
    }

    let mut entries = Vec::new();
    // Linked directories are mirrored as real directories in the trial.
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for result in walker {
        let entry = result.map_err(|err| {
            BisectError::Stage(format!("walk {}: {err}", root.display()))
        })?;
        let file_type = entry.file_type();
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|err| BisectError::InvalidPath(err.to_string()))?
            .to_path_buf();

        if file_type.is_dir() {
            entries.push(SourceEntry {
                relative,
                is_dir: true,
                candidate: None,
            });
            continue;
        }
        if !file_type.is_file() {
            log::debug!("Skipping special file {}", entry.path().display());
            continue;
        }

        let is_candidate = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.ends_with(suffix));
        let candidate = if is_candidate {
            Some(Candidate::new(candidate_id(&relative)))
        } else {
            None
        };
        entries.push(SourceEntry {
            relative,
            is_dir: false,
            candidate,
        });
    }
    Ok(entries)
}

/// Relative path with `/` separators; a top-level file's id is its name.
fn candidate_id(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn copy_plan(source_root: &Path, dest_root: &Path, plan: &[SourceEntry]) -> Result<(usize, u64)> {
    let stage_err = |action: &str, path: &Path, err: std::io::Error| {
        BisectError::Stage(format!("{action} {}: {err}", path.display()))
    };

    let mut files = 0usize;
    let mut bytes = 0u64;
    for entry in plan {
        let dest = dest_root.join(&entry.relative);
        if entry.is_dir {
            std::fs::create_dir_all(&dest).map_err(|err| stage_err("create", &dest, err))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|err| stage_err("create", parent, err))?;
        }
        let src = source_root.join(&entry.relative);
        bytes += std::fs::copy(&src, &dest).map_err(|err| stage_err("copy", &src, err))?;
        files += 1;
    }
    Ok((files, bytes))
}

async fn is_empty_dir(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(err) => err.kind() == std::io::ErrorKind::NotFound,
    }
}
