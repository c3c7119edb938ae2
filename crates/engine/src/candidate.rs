use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of one unit of data that a trial may include or exclude.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Candidate(String);

impl Candidate {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Candidate {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Candidate {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Candidate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Candidates under joint test in one oracle evaluation, in a stable order.
pub type Batch = Vec<Candidate>;

/// Split a failing batch into `(front, back)` where the front half holds the
/// first `floor(n / 2)` candidates. Order is preserved on both sides.
#[must_use]
pub fn split_batch(mut batch: Batch) -> (Batch, Batch) {
    let half = batch.len() / 2;
    let back = batch.split_off(half);
    (batch, back)
}

/// Render a candidate list for log lines.
pub fn display_list<'a, I>(candidates: I) -> String
where
    I: IntoIterator<Item = &'a Candidate>,
{
    let joined = candidates
        .into_iter()
        .map(Candidate::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(ids: &[&str]) -> Batch {
        ids.iter().map(|id| Candidate::from(*id)).collect()
    }

    #[test]
    fn split_puts_floor_half_in_front() {
        let (front, back) = split_batch(batch(&["c1", "c2", "c3", "c4", "c5"]));
        assert_eq!(front, batch(&["c1", "c2"]));
        assert_eq!(back, batch(&["c3", "c4", "c5"]));
    }

    #[test]
    fn split_of_pair_yields_two_singletons() {
        let (front, back) = split_batch(batch(&["x", "y"]));
        assert_eq!(front, batch(&["x"]));
        assert_eq!(back, batch(&["y"]));
    }

    #[test]
    fn display_list_is_bracketed() {
        assert_eq!(display_list(&batch(&["a", "b"])), "[a, b]");
        assert_eq!(display_list(&batch(&[])), "[]");
    }
}
