use crate::core::{Result, diagnostics};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;

/// Single-assignment asynchronous result.
///
/// Any number of tasks may `wait`; exactly one resolution ever lands. The
/// `try_*` family reports a lost race through its return value, while `set`
/// treats a lost race as a broken invariant.
pub struct Completion<T> {
    inner: Arc<CompletionInner<T>>,
}

struct CompletionInner<T> {
    claimed: AtomicBool,
    result: OnceLock<Result<T>>,
    notify: Notify,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.inner.result.get().is_some())
            .finish()
    }
}

impl<T> Default for Completion<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completion<T>
where
    T: Clone + Send + Sync,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CompletionInner {
                claimed: AtomicBool::new(false),
                result: OnceLock::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Attempt to resolve. `false` means another resolution already won.
    pub fn try_set(&self, result: Result<T>) -> bool {
        if self
            .inner
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // The CAS above makes this the only writer.
        let _ = self.inner.result.set(result);
        self.inner.notify.notify_waiters();
        true
    }

    pub fn try_set_value(&self, value: T) -> bool {
        self.try_set(Ok(value))
    }

    pub fn try_set_error(&self, error: crate::core::StreamError) -> bool {
        self.try_set(Err(error))
    }

    /// Resolve, treating a second assignment as a contract violation.
    pub fn set(&self, result: Result<T>) -> Result<()> {
        if self.try_set(result) {
            Ok(())
        } else {
            Err(diagnostics::violation(
                "Completion.Set",
                "one-shot result assigned twice",
            ))
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.result.get().is_some()
    }

    /// The resolution, if one has landed
    pub fn peek(&self) -> Option<Result<T>> {
        self.inner.result.get().cloned()
    }

    pub async fn wait(&self) -> Result<T> {
        loop {
            // Register interest before looking, so a resolution between the
            // check and the await still wakes this task.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.inner.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
