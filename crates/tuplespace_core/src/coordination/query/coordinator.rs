//! Query coordinator: filter, sort and limit stages over registered entries.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;
use tuplespace_codec::{Path, Resolved};

use crate::container::Entry;
use crate::coordination::query::cache::{Cached, PropertyCache, RegexCache};
use crate::coordination::query::index::{ExtendedSearchIndex, IndexDefinition};
use crate::coordination::query::{Query, Stage};
use crate::coordination::selection::{check_total, narrow};
use crate::coordination::{
    unsupported, CoordinationPayload, Coordinator, CoordinatorKind, Count, Criteria,
    RegisterContext, SelectionContext, Selector,
};
use crate::error::CoreResult;
use crate::types::EntryId;

/// Answers [`Query`] selectors.
pub struct QueryCoordinator {
    name: String,
    entries: RwLock<BTreeMap<EntryId, Arc<Entry>>>,
    indexes: Vec<ExtendedSearchIndex>,
    properties: PropertyCache,
    regexes: RegexCache,
}

impl QueryCoordinator {
    /// Creates a coordinator maintaining the given indexes.
    pub fn new(name: impl Into<String>, indexes: Vec<IndexDefinition>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
            indexes: indexes.into_iter().map(ExtendedSearchIndex::new).collect(),
            properties: PropertyCache::new(),
            regexes: RegexCache::new(),
        }
    }

    /// The maintained indexes.
    #[must_use]
    pub fn indexes(&self) -> &[ExtendedSearchIndex] {
        &self.indexes
    }

    /// Narrows `entries` through an index when the query opens with an
    /// indexed comparison. Entries of kinds the index does not cover are
    /// kept for the filter to decide.
    fn index_candidates(&self, query: &Query, entries: Vec<Arc<Entry>>) -> Vec<Arc<Entry>> {
        let Some(Stage::Filter(matchmaker)) = query.stages().first() else {
            return entries;
        };
        let Some((path, probe)) = matchmaker.index_probe() else {
            return entries;
        };
        let Some(index) = self.indexes.iter().find(|i| i.definition().path == *path) else {
            return entries;
        };
        let hits = index.probe(probe);
        trace!(coordinator = %self.name, path = %path, hits = hits.len(), "index lookup");
        let covered = &index.definition().kinds;
        entries
            .into_iter()
            .filter(|e| !covered.contains(&e.value().kind()) || hits.contains(&e.id()))
            .collect()
    }

    fn sort(&self, entries: &mut [Arc<Entry>], path: &Path, descending: bool) {
        entries.sort_by(|a, b| {
            let a = self.properties.resolve(a, path);
            let b = self.properties.resolve(b, path);
            match (a, b) {
                (Resolved::Found(a), Resolved::Found(b)) => {
                    let ord = a.natural_cmp(&b).unwrap_or(Ordering::Equal);
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
                (Resolved::Found(_), Resolved::NoPathMatch) => Ordering::Less,
                (Resolved::NoPathMatch, Resolved::Found(_)) => Ordering::Greater,
                (Resolved::NoPathMatch, Resolved::NoPathMatch) => Ordering::Equal,
            }
        });
    }

    fn run(
        &self,
        query: &Query,
        mut entries: Vec<Arc<Entry>>,
        accessible: &mut dyn FnMut(&Entry) -> CoreResult<bool>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        for stage in query.stages() {
            entries = match stage {
                Stage::Filter(matchmaker) => {
                    let mut kept = Vec::with_capacity(entries.len());
                    for entry in entries {
                        let source = Cached {
                            cache: &self.properties,
                            entry: entry.as_ref(),
                        };
                        if matchmaker.evaluate(&source, &self.regexes)? {
                            kept.push(entry);
                        }
                    }
                    kept
                }
                Stage::SortUp(path) => {
                    self.sort(&mut entries, path, false);
                    entries
                }
                Stage::SortDown(path) => {
                    self.sort(&mut entries, path, true);
                    entries
                }
                Stage::Reverse => {
                    entries.reverse();
                    entries
                }
                Stage::Distinct(path) => {
                    let mut seen = HashSet::new();
                    entries
                        .into_iter()
                        .filter(|e| {
                            let key = self.properties.resolve(e, path).value().cloned();
                            seen.insert(key)
                        })
                        .collect()
                }
                Stage::Cnt(n) => {
                    let mut kept = Vec::new();
                    for entry in entries {
                        if kept.len() >= *n {
                            break;
                        }
                        if accessible(entry.as_ref())? {
                            kept.push(entry);
                        }
                    }
                    kept
                }
            };
        }
        Ok(entries)
    }
}

impl fmt::Debug for QueryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCoordinator")
            .field("name", &self.name)
            .field("entries", &self.entries.read().len())
            .field("indexes", &self.indexes.len())
            .finish_non_exhaustive()
    }
}

impl Coordinator for QueryCoordinator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> CoordinatorKind {
        CoordinatorKind::Query
    }

    fn register(
        &self,
        entry: &Arc<Entry>,
        _payload: &CoordinationPayload,
        _ctx: &RegisterContext<'_>,
    ) -> CoreResult<()> {
        for index in &self.indexes {
            index.insert(entry.id(), entry.value());
        }
        self.properties.admit(entry.id());
        self.entries.write().insert(entry.id(), Arc::clone(entry));
        Ok(())
    }

    fn unregister(&self, entry: EntryId) -> bool {
        let removed = self.entries.write().remove(&entry).is_some();
        if removed {
            for index in &self.indexes {
                index.remove(entry);
            }
            self.properties.evict(entry);
        }
        removed
    }

    fn contains(&self, entry: EntryId) -> bool {
        self.entries.read().contains_key(&entry)
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn select(
        &self,
        selector: &Selector,
        input: Option<Vec<Arc<Entry>>>,
        ctx: &mut SelectionContext<'_>,
    ) -> CoreResult<Vec<Arc<Entry>>> {
        let Criteria::Query(query) = &selector.criteria else {
            return Err(unsupported(&self.name, selector));
        };
        match input {
            None => {
                let all: Vec<_> = self.entries.read().values().cloned().collect();
                check_total(&self.name, all.len(), selector.count)?;
                let candidates = self.index_candidates(query, all);
                let selected = self.run(query, candidates, &mut |e: &Entry| {
                    ctx.check_accessibility(e, false)
                })?;
                ctx.scan(
                    &self.name,
                    selected,
                    selector.count,
                    selector.count == Count::All,
                    false,
                )
            }
            Some(input) => {
                let registered = {
                    let entries = self.entries.read();
                    input
                        .into_iter()
                        .filter(|e| entries.contains_key(&e.id()))
                        .collect()
                };
                let selected = self.run(query, registered, &mut |_: &Entry| Ok(true))?;
                narrow(&self.name, selected, selector.count)
            }
        }
    }
}
