//! Space configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::context::{IsolationLevel, RequestTimeout};

/// Where a space keeps its durable state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PersistenceConfig {
    /// No durable state; contents vanish with the space.
    #[default]
    InMemory,
    /// Append log inside this directory, guarded by a lock file.
    File {
        /// Space directory.
        dir: PathBuf,
    },
}

/// Configuration for opening a space.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker threads executing requests.
    pub worker_threads: usize,

    /// Timeout applied when a request does not set one.
    pub default_request_timeout: RequestTimeout,

    /// Bound on the wait for running sub-transactions at commit.
    pub commit_wait_timeout: Duration,

    /// Whether to maintain the wait-for graph and report cycles.
    pub deadlock_detection: bool,

    /// Whether to sync the backend after every committed batch.
    pub sync_on_commit: bool,

    /// Isolation level applied when a request does not set one.
    pub default_isolation_level: IsolationLevel,

    /// Durable storage.
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            default_request_timeout: RequestTimeout::Infinite,
            commit_wait_timeout: Duration::from_secs(30),
            deadlock_detection: true,
            sync_on_commit: true,
            default_isolation_level: IsolationLevel::ReadCommitted,
            persistence: PersistenceConfig::InMemory,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads (at least one is used).
    #[must_use]
    pub const fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Sets the default request timeout.
    #[must_use]
    pub const fn default_request_timeout(mut self, timeout: RequestTimeout) -> Self {
        self.default_request_timeout = timeout;
        self
    }

    /// Sets the commit quiescing bound.
    #[must_use]
    pub const fn commit_wait_timeout(mut self, timeout: Duration) -> Self {
        self.commit_wait_timeout = timeout;
        self
    }

    /// Enables or disables deadlock detection.
    #[must_use]
    pub const fn deadlock_detection(mut self, value: bool) -> Self {
        self.deadlock_detection = value;
        self
    }

    /// Sets whether to sync the backend on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the default isolation level.
    #[must_use]
    pub const fn default_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.default_isolation_level = level;
        self
    }

    /// Persists the space in `dir`.
    #[must_use]
    pub fn file_persistence(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistence = PersistenceConfig::File { dir: dir.into() };
        self
    }
}
