/// Trait for spawning async tasks across different runtimes
///
/// The acceptor hands every connection to a spawner as an independent unit
/// of work, without knowing which async runtime runs it.
pub trait TaskSpawner {
    /// Spawn a new task that runs the given future to completion
    fn spawn<F, O>(&self, future: F) -> Result<(), TaskSpawnError>
    where
        F: core::future::Future<Output = O> + Send + 'static,
        O: Send + 'static;
}

/// Error that can occur when spawning a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSpawnError {
    /// No memory available to spawn task
    NoMemory,
    /// Task spawner is busy
    Busy,
    /// The runtime is shutting down
    Shutdown,
}

impl core::fmt::Display for TaskSpawnError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TaskSpawnError::NoMemory => write!(f, "No memory available to spawn task"),
            TaskSpawnError::Busy => write!(f, "Task spawner is busy"),
            TaskSpawnError::Shutdown => write!(f, "Runtime is shutting down"),
        }
    }
}

impl core::error::Error for TaskSpawnError {}
