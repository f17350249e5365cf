//! Background thread failing tasks whose deadline passed while parked.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::CoreResult;
use crate::runtime::Task;
use crate::wait::WaitManager;

/// Callback receiving each expired task.
pub(crate) type OnExpired = Box<dyn Fn(Arc<Task>) + Send + Sync>;

/// Owns the timeout thread.
///
/// The thread exits when the wait manager shuts down.
pub(crate) struct TimeoutProcessor {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimeoutProcessor {
    /// Spawns the thread.
    pub(crate) fn start(waits: Arc<WaitManager>, on_expired: OnExpired) -> CoreResult<Self> {
        let handle = thread::Builder::new()
            .name("tuplespace-timeout".into())
            .spawn(move || {
                debug!("timeout processor started");
                while let Some(expired) = waits.wait_expired() {
                    for task in expired {
                        trace!(task = %task.id(), "request timed out");
                        on_expired(task);
                    }
                }
                debug!("timeout processor stopped");
            })?;
        Ok(Self {
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Joins the thread. The wait manager must be shut down first.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for TimeoutProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutProcessor")
            .field("running", &self.handle.lock().is_some())
            .finish()
    }
}
