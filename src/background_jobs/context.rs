use crate::catalog_store::CatalogStore;
use crate::scheduler::Scheduler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
///
/// Contains references to shared resources and a cancellation token
/// for graceful shutdown handling.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Access to the catalog of tracked Titles.
    pub catalog_store: Arc<dyn CatalogStore>,

    /// The Download Scheduler jobs submit acquisition work to.
    pub scheduler: Arc<Scheduler>,
}

impl JobContext {
    /// Create a new job context with the given dependencies.
    pub fn new(
        cancellation_token: CancellationToken,
        catalog_store: Arc<dyn CatalogStore>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            cancellation_token,
            catalog_store,
            scheduler,
        }
    }

    /// Check if cancellation has been requested.
    ///
    /// Jobs should periodically check this during long-running operations
    /// and return early with `JobError::Cancelled` if true.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
