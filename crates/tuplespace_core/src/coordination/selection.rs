//! Accessibility and count checks shared by all coordinators.

use std::fmt;
use std::sync::Arc;

use crate::container::Entry;
use crate::context::IsolationLevel;
use crate::coordination::Count;
use crate::error::{CoreError, CoreResult};
use crate::isolation::{Availability, EntryAccess, LockHolder, LockTable, LockTarget};
use crate::types::{ContainerId, SubTransactionId, TransactionId};

/// Per-entry authorization filter.
pub type EntryFilter<'a> = &'a (dyn Fn(&Entry) -> bool + Send + Sync);

/// State of one selection over one container.
///
/// Remembers the first lock conflict and whether a denied entry was
/// skipped, so that a count shortfall can be reported as the more
/// precise failure.
pub struct SelectionContext<'a> {
    locks: &'a LockTable,
    container: ContainerId,
    access: EntryAccess,
    level: IsolationLevel,
    tx: TransactionId,
    stx: SubTransactionId,
    permitted: Option<EntryFilter<'a>>,
    locked: Option<LockHolder>,
    denied: bool,
}

impl<'a> SelectionContext<'a> {
    /// Creates a context for `(tx, stx)` reading or taking from
    /// `container`.
    #[must_use]
    pub fn new(
        locks: &'a LockTable,
        container: ContainerId,
        access: EntryAccess,
        level: IsolationLevel,
        tx: TransactionId,
        stx: SubTransactionId,
    ) -> Self {
        Self {
            locks,
            container,
            access,
            level,
            tx,
            stx,
            permitted: None,
            locked: None,
            denied: false,
        }
    }

    /// Installs a per-entry authorization filter.
    #[must_use]
    pub fn with_entry_filter(mut self, filter: EntryFilter<'a>) -> Self {
        self.permitted = Some(filter);
        self
    }

    /// Decides whether `entry` may be selected.
    ///
    /// Invisible entries are skipped silently. Locked and denied entries
    /// are skipped and remembered, or fail the selection when it is
    /// mandatory.
    ///
    /// # Errors
    ///
    /// Returns `EntryLocked` or `AccessDenied` for a mandatory selection.
    pub fn check_accessibility(&mut self, entry: &Entry, mandatory: bool) -> CoreResult<bool> {
        let permitted = self.permitted.map_or(true, |f| f(entry));
        let availability = self.locks.entry_availability(
            LockTarget::Entry(self.container, entry.id()),
            self.access,
            self.level,
            self.tx,
            self.stx,
        );
        match availability {
            Availability::Available if permitted => Ok(true),
            Availability::Available => {
                self.denied = true;
                if mandatory {
                    Err(CoreError::access_denied(format!("{} is not permitted", entry.id())))
                } else {
                    Ok(false)
                }
            }
            Availability::NotVisible(_) => Ok(false),
            Availability::NotAvailable(holder) => {
                self.locked.get_or_insert(holder);
                if mandatory {
                    Err(CoreError::EntryLocked { holder })
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Returns true once a locked or denied entry was skipped.
    #[must_use]
    pub fn has_inaccessible(&self) -> bool {
        self.locked.is_some() || self.denied
    }

    /// Fails a specific count that `found` entries fall short of.
    ///
    /// A remembered lock conflict wins over a remembered denial, which
    /// wins over the plain count shortfall.
    ///
    /// # Errors
    ///
    /// Returns `EntryLocked`, `AccessDenied` or `CountNotMet`.
    pub fn check_count(&self, coordinator: &str, found: usize, count: Count) -> CoreResult<()> {
        if !count.is_short(found) {
            return Ok(());
        }
        if let Some(holder) = self.locked {
            return Err(CoreError::EntryLocked { holder });
        }
        if self.denied {
            return Err(CoreError::access_denied(format!(
                "selection at {coordinator} skipped denied entries"
            )));
        }
        Err(count_not_met(coordinator, found, count))
    }

    /// First-selector scan: walks `candidates` in order, keeps accessible
    /// entries until `count` is met, then checks the count.
    ///
    /// With `ordered`, the scan stops at the first locked or denied entry
    /// so that an order is never skipped over.
    ///
    /// # Errors
    ///
    /// See [`check_accessibility`](Self::check_accessibility) and
    /// [`check_count`](Self::check_count).
    pub fn scan<I>(
        &mut self,
        coordinator: &str,
        candidates: I,
        count: Count,
        mandatory: bool,
        ordered: bool,
    ) -> CoreResult<Vec<Arc<Entry>>>
    where
        I: IntoIterator<Item = Arc<Entry>>,
    {
        let mut result = Vec::new();
        for entry in candidates {
            if count.is_met(result.len()) {
                return Ok(result);
            }
            if self.check_accessibility(&entry, mandatory)? {
                result.push(entry);
            } else if ordered && self.has_inaccessible() {
                break;
            }
        }
        self.check_count(coordinator, result.len(), count)?;
        Ok(result)
    }
}

impl fmt::Debug for SelectionContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionContext")
            .field("container", &self.container)
            .field("access", &self.access)
            .field("level", &self.level)
            .field("tx", &self.tx)
            .field("stx", &self.stx)
            .field("locked", &self.locked)
            .field("denied", &self.denied)
            .finish_non_exhaustive()
    }
}

/// Builds a count-not-met error.
pub(crate) fn count_not_met(coordinator: &str, found: usize, count: Count) -> CoreError {
    CoreError::CountNotMet {
        coordinator: coordinator.to_string(),
        requested: count.requested(),
        found,
    }
}

/// Fails early when fewer entries are registered than requested.
///
/// # Errors
///
/// Returns `CountNotMet`.
pub(crate) fn check_total(coordinator: &str, total: usize, count: Count) -> CoreResult<()> {
    if count.is_short(total) {
        Err(count_not_met(coordinator, total, count))
    } else {
        Ok(())
    }
}

/// Later-selector narrowing: `filtered` holds the predecessor's entries
/// this coordinator accepts, in this coordinator's order.
///
/// # Errors
///
/// Returns `CountNotMet` when a specific count is not met.
pub(crate) fn narrow(
    coordinator: &str,
    mut filtered: Vec<Arc<Entry>>,
    count: Count,
) -> CoreResult<Vec<Arc<Entry>>> {
    check_total(coordinator, filtered.len(), count)?;
    if let Count::Exactly(n) = count {
        filtered.truncate(n);
    }
    Ok(filtered)
}
