//! Query coordinator: matchmaker filters, sorting and indexed lookups.
//!
//! A [`Query`] is an ordered pipeline of [`Stage`]s applied to the
//! coordinator's entries in registration order. A leading filter whose
//! matchmaker compares an indexed property is answered through the
//! [`ExtendedSearchIndex`] instead of a full scan.

mod cache;
mod coordinator;
mod index;
mod matchmaker;

use serde::{Deserialize, Serialize};
use tuplespace_codec::Path;

pub use cache::{PropertyCache, RegexCache};
pub use coordinator::QueryCoordinator;
pub use index::{ExtendedSearchIndex, IndexDefinition};
pub use matchmaker::Matchmaker;

/// One step of a query pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
    /// Keeps entries matching the matchmaker.
    Filter(Matchmaker),
    /// Stable ascending sort by a property; unresolved paths sort last.
    SortUp(Path),
    /// Stable descending sort by a property; unresolved paths sort last.
    SortDown(Path),
    /// Reverses the current order.
    Reverse,
    /// Keeps the first entry for each distinct property value.
    Distinct(Path),
    /// Keeps at most this many accessible entries.
    Cnt(usize),
}

/// A query pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    stages: Vec<Stage>,
}

impl Query {
    /// Creates an empty query, which selects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter stage.
    #[must_use]
    pub fn filter(mut self, matchmaker: Matchmaker) -> Self {
        self.stages.push(Stage::Filter(matchmaker));
        self
    }

    /// Appends an ascending sort.
    #[must_use]
    pub fn sort_up(mut self, path: Path) -> Self {
        self.stages.push(Stage::SortUp(path));
        self
    }

    /// Appends a descending sort.
    #[must_use]
    pub fn sort_down(mut self, path: Path) -> Self {
        self.stages.push(Stage::SortDown(path));
        self
    }

    /// Appends a reversal.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.stages.push(Stage::Reverse);
        self
    }

    /// Appends a distinct stage.
    #[must_use]
    pub fn distinct(mut self, path: Path) -> Self {
        self.stages.push(Stage::Distinct(path));
        self
    }

    /// Appends a count limit.
    #[must_use]
    pub fn cnt(mut self, n: usize) -> Self {
        self.stages.push(Stage::Cnt(n));
        self
    }

    /// The stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}
