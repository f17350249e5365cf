//! Caches for resolved properties and compiled regular expressions.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use regex::Regex;
use tuplespace_codec::{Path, Resolved};

use crate::container::Entry;
use crate::coordination::query::matchmaker::Resolver;
use crate::error::{CoreError, CoreResult};
use crate::types::EntryId;

/// Resolved property values per entry and path.
///
/// Entry values never change after a write, so an entry's resolutions
/// stay valid until the entry is evicted. Only admitted entries are
/// cached; a resolution finishing after its entry was evicted is
/// returned but not stored.
#[derive(Debug, Default)]
pub struct PropertyCache {
    resolved: RwLock<HashMap<EntryId, HashMap<Path, Resolved>>>,
}

impl PropertyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts caching resolutions of `entry`.
    pub fn admit(&self, entry: EntryId) {
        self.resolved.write().entry(entry).or_default();
    }

    /// Resolves `path` against `entry`, computing it at most once while
    /// the entry is admitted.
    pub fn resolve(&self, entry: &Entry, path: &Path) -> Resolved {
        if let Some(hit) = self
            .resolved
            .read()
            .get(&entry.id())
            .and_then(|paths| paths.get(path))
        {
            return hit.clone();
        }
        let value = path.resolve(entry.value());
        if let Some(paths) = self.resolved.write().get_mut(&entry.id()) {
            paths.insert(path.clone(), value.clone());
        }
        value
    }

    /// Drops an entry and every resolution of it.
    pub fn evict(&self, entry: EntryId) {
        self.resolved.write().remove(&entry);
    }

    /// Number of admitted entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.read().len()
    }

    /// Returns true if no entry is admitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached resolutions across all entries.
    #[must_use]
    pub fn resolutions(&self) -> usize {
        self.resolved.read().values().map(HashMap::len).sum()
    }
}

/// Default number of compiled expressions a [`RegexCache`] keeps.
const DEFAULT_REGEX_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct RegexState {
    compiled: HashMap<String, Regex>,
    order: VecDeque<String>,
}

/// Compiled regular expressions by source pattern.
///
/// Holds at most `capacity` patterns; the oldest is dropped first.
#[derive(Debug)]
pub struct RegexCache {
    capacity: usize,
    state: RwLock<RegexState>,
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REGEX_CAPACITY)
    }
}

impl RegexCache {
    /// Creates an empty cache with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache holding at most `capacity` patterns.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: RwLock::new(RegexState::default()),
        }
    }

    /// Number of cached patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().compiled.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the anchored expression for `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSelector` if the pattern does not compile.
    pub fn get(&self, pattern: &str) -> CoreResult<Regex> {
        if let Some(regex) = self.state.read().compiled.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| CoreError::invalid_selector(format!("bad regex {pattern:?}: {e}")))?;

        let mut state = self.state.write();
        if state.compiled.contains_key(pattern) {
            return Ok(regex);
        }
        while state.compiled.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.compiled.remove(&oldest);
        }
        state.compiled.insert(pattern.to_string(), regex.clone());
        state.order.push_back(pattern.to_string());
        Ok(regex)
    }
}

/// Resolves properties of one entry through a [`PropertyCache`].
pub(crate) struct Cached<'a> {
    pub(crate) cache: &'a PropertyCache,
    pub(crate) entry: &'a Entry,
}

impl Resolver for Cached<'_> {
    fn resolve(&self, path: &Path) -> Resolved {
        self.cache.resolve(self.entry, path)
    }
}
