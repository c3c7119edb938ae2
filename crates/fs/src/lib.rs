//! Filesystem collaborators for the bisect engine.
//!
//! A [`CandidateTree`] is a source directory in which every file whose name
//! ends with a fixed suffix is a candidate. It enumerates those candidates
//! and stages trial directories from the tree.

mod tree;

pub use tree::CandidateTree;
