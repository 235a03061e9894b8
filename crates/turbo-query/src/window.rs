//! Cancellable request windows.
//!
//! A view that issues requests owns a [`RequestWindow`]. When the view goes
//! away it drops the window, which aborts every request still running
//! through it, so nothing completes into a torn-down view.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::{abortable, AbortHandle, Aborted};
use parking_lot::Mutex;

use crate::error::QueryError;

/// Tracks abort handles for the requests of one owner.
#[derive(Debug, Default)]
pub struct RequestWindow {
    handles: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl RequestWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` inside the window.
    ///
    /// Resolves to [`QueryError::Cancelled`] if the window is cancelled
    /// first, or was already cancelled when called.
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T, QueryError>
    where
        Fut: Future<Output = Result<T, QueryError>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueryError::Cancelled);
        }

        let (fut, handle) = abortable(fut);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().insert(id, handle);

        let outcome = fut.await;
        self.handles.lock().remove(&id);

        match outcome {
            Ok(result) => result,
            Err(Aborted) => Err(QueryError::Cancelled),
        }
    }

    /// Abort everything in flight and refuse new work. Returns how many
    /// requests were aborted.
    pub fn cancel_all(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        let handles: Vec<AbortHandle> = self.handles.lock().drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.abort();
        }
        if !handles.is_empty() {
            tracing::debug!(aborted = handles.len(), "request window cancelled");
        }
        handles.len()
    }

    /// Requests currently running through the window.
    pub fn in_flight(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for RequestWindow {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_completed_request_passes_through() {
        let window = RequestWindow::new();
        let result = window.run(async { Ok::<_, QueryError>(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(window.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_request() {
        let window = Arc::new(RequestWindow::new());

        let w = Arc::clone(&window);
        let task = tokio::spawn(async move {
            w.run(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, QueryError>("late")
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(window.in_flight(), 1);
        assert_eq!(window.cancel_all(), 1);

        assert_eq!(task.await.unwrap(), Err(QueryError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_window_rejects_new_work() {
        let window = RequestWindow::new();
        window.cancel_all();

        let result = window.run(async { Ok::<_, QueryError>(1) }).await;
        assert_eq!(result, Err(QueryError::Cancelled));
        assert!(window.is_cancelled());
    }
}
