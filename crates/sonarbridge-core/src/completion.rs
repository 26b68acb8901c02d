//! Cancellable handles to work running on the bridge runtime.
//!
//! [`spawn`] runs a future on a runtime and hands back a [`Completion`]: the
//! receiving end of a `oneshot` channel plus the [`AbortHandle`] of the task.
//! It can be `.await`ed from async code or waited on from a plain thread with
//! [`Completion::wait`] / [`Completion::wait_timeout`], which is how
//! synchronous tool handlers consume bridge operations.
//!
//! [`Completion::cancel`] aborts the task rather than merely detaching from
//! it. Dropping the aborted future drops the sender, which resolves the
//! completion as cancelled.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// Why a wait on a [`Completion`] ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("operation was cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

const PENDING: u8 = 0;
const READY: u8 = 1;
const CANCELLED: u8 = 2;

/// Move a pending state to `next`. Returns false if it was already settled.
fn settle(state: &AtomicU8, next: u8) -> bool {
    state
        .compare_exchange(PENDING, next, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
}

/// Sending half, owned by the spawned task.
struct Completer<T> {
    tx: Option<oneshot::Sender<T>>,
    state: Arc<AtomicU8>,
}

impl<T> Completer<T> {
    fn complete(mut self, value: T) {
        if !settle(&self.state, READY) {
            return;
        }
        if let Some(tx) = self.tx.take() {
            // The receiver may already be gone; the value is dropped then.
            let _ = tx.send(value);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        settle(&self.state, CANCELLED);
    }
}

/// Run `future` on `runtime` and expose its output through a [`Completion`]
/// whose native handle is the spawned task.
pub fn spawn<F>(runtime: &Handle, future: F) -> Completion<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let state = Arc::new(AtomicU8::new(PENDING));
    let completer = Completer {
        tx: Some(tx),
        state: Arc::clone(&state),
    };
    let task = runtime.spawn(async move {
        let value = future.await;
        completer.complete(value);
    });
    Completion {
        rx,
        state,
        native: task.abort_handle(),
        runtime: runtime.clone(),
    }
}

/// Consumer half of a spawned operation.
///
/// Dropping a `Completion` detaches from the operation without cancelling it.
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
    state: Arc<AtomicU8>,
    native: AbortHandle,
    runtime: Handle,
}

impl<T> Completion<T> {
    /// The native task handle.
    pub fn native_handle(&self) -> Option<&AbortHandle> {
        Some(&self.native)
    }

    /// Cancel the operation: abort the native task and resolve the completion
    /// as cancelled. Returns false if a value had already arrived.
    pub fn cancel(&self) -> bool {
        if !settle(&self.state, CANCELLED) {
            return false;
        }
        self.native.abort();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Whether the operation has settled, with a value or by cancellation.
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    /// Block the current thread until the operation settles.
    ///
    /// Must not be called from inside an async task; `.await` the completion
    /// there instead.
    pub fn wait(mut self) -> Result<T, WaitError> {
        if self.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        self.rx.blocking_recv().map_err(|_| WaitError::Cancelled)
    }

    /// Block for at most `timeout`. On expiry the operation is cancelled so
    /// it is never left running unobserved.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<T, WaitError> {
        // No representable deadline: wait without one.
        if Instant::now().checked_add(timeout).is_none() {
            return self.wait();
        }
        if self.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        let runtime = self.runtime.clone();
        match runtime.block_on(tokio::time::timeout(timeout, &mut self.rx)) {
            Ok(result) => result.map_err(|_| WaitError::Cancelled),
            Err(_) if self.cancel() => Err(WaitError::TimedOut(timeout)),
            Err(_) if self.is_cancelled() => Err(WaitError::Cancelled),
            // The value arrived between the deadline and the cancel.
            Err(_) => self
                .rx
                .blocking_recv()
                .map_err(|_| WaitError::TimedOut(timeout)),
        }
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T, WaitError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.is_cancelled() {
            return Poll::Ready(Err(WaitError::Cancelled));
        }
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| WaitError::Cancelled))
    }
}
