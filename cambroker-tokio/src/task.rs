//! Tokio-specific task spawner implementation

use cambroker_core::{TaskSpawnError, TaskSpawner};
use tokio::runtime::Handle;

/// Tokio-based task spawner
///
/// Every accepted connection runs as its own task on this runtime.
#[derive(Debug, Clone)]
pub struct TokioTaskSpawner {
    runtime: Handle,
}

impl TokioTaskSpawner {
    /// Create a new TokioTaskSpawner from the current Tokio runtime handle
    ///
    /// Fails with [`TaskSpawnError::Shutdown`] outside a runtime.
    pub fn from_current_handle() -> Result<Self, TaskSpawnError> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|_| TaskSpawnError::Shutdown)
    }

    /// Create a new TokioTaskSpawner from a specific Tokio runtime handle
    pub fn from_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl TaskSpawner for TokioTaskSpawner {
    fn spawn<F, O>(&self, future: F) -> Result<(), TaskSpawnError>
    where
        F: core::future::Future<Output = O> + Send + 'static,
        O: Send + 'static,
    {
        self.runtime.spawn(future);
        Ok(())
    }
}
