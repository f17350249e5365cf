//! Keeps the wait queues in step with container creation and destruction.

use std::sync::Arc;

use crate::error::CoreResult;
use crate::isolation::{LogContext, LogItem};
use crate::types::ContainerId;
use crate::wait::WaitManager;

/// Drops the wait queues of a created container if its creation is
/// rolled back.
#[derive(Debug)]
pub(crate) struct WaitCreateContainerLogItem {
    pub(crate) waits: Arc<WaitManager>,
    pub(crate) container: ContainerId,
}

impl LogItem for WaitCreateContainerLogItem {
    fn container(&self) -> Option<ContainerId> {
        Some(self.container)
    }

    fn rollback_sub_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.waits.remove_container(self.container);
        Ok(())
    }

    fn rollback_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.waits.remove_container(self.container);
        Ok(())
    }
}

/// Drops the wait queues of a destroyed container once the destroy is
/// final, rescheduling everything parked there.
#[derive(Debug)]
pub(crate) struct WaitDestroyContainerLogItem {
    pub(crate) waits: Arc<WaitManager>,
    pub(crate) container: ContainerId,
}

impl LogItem for WaitDestroyContainerLogItem {
    fn container(&self) -> Option<ContainerId> {
        Some(self.container)
    }

    fn commit_transaction(&self, _ctx: &LogContext<'_>) -> CoreResult<()> {
        self.waits.remove_container(self.container);
        Ok(())
    }
}
