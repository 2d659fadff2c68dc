//! View-scoped background work.
//!
//! A view spawns its fetches through a [`ViewScope`]; dropping the scope on
//! unmount aborts whatever is still running so late results cannot write
//! into state the view no longer owns. Token refreshes run on their own
//! task inside the session client and are not affected.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::{AbortHandle, JoinHandle};

#[derive(Debug, Default)]
pub struct ViewScope {
    tasks: Mutex<Vec<AbortHandle>>,
}

impl ViewScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` tied to this scope.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle.abort_handle());
        handle
    }

    /// Tasks spawned here that have not finished yet.
    #[must_use]
    pub fn active(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Abort every task still running.
    pub fn close(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        if !tasks.is_empty() {
            tracing::debug!(count = tasks.len(), "aborting view tasks");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "scope_test.rs"]
mod tests;
