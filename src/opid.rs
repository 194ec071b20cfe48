//! Operation identifiers
//!
//! `OpId` is the log's logical clock: a `(term, index)` pair ordered by term
//! first, then index.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Totally ordered `(term, index)` identifier of a logged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct OpId {
    /// Election term that proposed the operation
    pub term: u64,

    /// Position of the operation in the log
    pub index: u64,
}

impl OpId {
    pub const fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}
