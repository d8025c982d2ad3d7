//! Task spawning abstraction.
//!
//! Background work in this crate (per-group processing loops, debounced idle
//! checks, helper-process reaping) goes through [`TaskSpawner`] instead of
//! calling `tokio::spawn` directly, so an embedding application can route it
//! onto a runtime of its choosing.

use std::future::Future;

/// Abstraction for spawning background tasks.
///
/// Spawned tasks are detached: the spawner offers no join or cancel handle.
/// Services that need to stop their tasks pair the spawner with a
/// `CancellationToken`.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Debug, Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a spawner bound to `handle`.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a spawner bound to the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}
