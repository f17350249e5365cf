//! Per-request context: transaction, isolation level, timeout, subject.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::TransactionId;

/// Isolation level of a read.
///
/// Takes always lock; the level only changes how reads see entries
/// that other transactions are taking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Reads take no lock and still see entries being taken elsewhere.
    #[default]
    ReadCommitted,
    /// Reads take a read lock held until the transaction ends.
    RepeatableRead,
}

/// How long a request may stay blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestTimeout {
    /// Wait until the request succeeds.
    #[default]
    Infinite,
    /// Fail on a count shortfall, but wait for locks.
    TryOnce,
    /// Never wait.
    Zero,
    /// Wait at most this long.
    Duration(Duration),
}

impl RequestTimeout {
    /// Shorthand for a millisecond timeout.
    #[must_use]
    pub const fn millis(ms: u64) -> Self {
        Self::Duration(Duration::from_millis(ms))
    }

    /// Returns the wait bound, if there is one.
    #[must_use]
    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(d),
            Self::Zero => Some(Duration::ZERO),
            Self::Infinite | Self::TryOnce => None,
        }
    }
}

/// Context carried by every request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Explicit transaction, or `None` for an implicit one.
    pub transaction: Option<TransactionId>,
    /// Isolation level; `None` uses the space default.
    pub isolation: Option<IsolationLevel>,
    /// Timeout; `None` uses the space default.
    pub timeout: Option<RequestTimeout>,
    /// Authenticated subject used by access control.
    pub subject: Option<String>,
}

impl RequestContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the request inside an explicit transaction.
    #[must_use]
    pub fn transaction(mut self, tx: TransactionId) -> Self {
        self.transaction = Some(tx);
        self
    }

    /// Sets the isolation level.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: RequestTimeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}
