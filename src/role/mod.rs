// ============================================================================
// Role Transition Gate
// ============================================================================
//
//   Secondary --become_primary--> Primary(recovery handle)
//   Primary   --demote-----------> Secondary   (handle rejected: NotPrimary)
//
// The recovery handle resolves when the new primary has rebuilt its runtime
// state. Callers that need an operating primary await it. A second signal
// stays pending for the whole primary tenure and is rejected on demotion;
// outstanding waits race it through `cancel_on_demotion`.
//
// ============================================================================

use crate::core::{Result, StreamError, diagnostics};
use crate::store::ConsolidatedStore;
use crate::sync::Completion;
use crate::transaction::TransactionId;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

struct Tenure {
    recovery: Completion<()>,
    demoted: Completion<()>,
}

pub struct RoleSynchronizer {
    tenure: Mutex<Option<Tenure>>,
}

impl RoleSynchronizer {
    pub fn new() -> Self {
        Self {
            tenure: Mutex::new(None),
        }
    }

    pub fn is_primary(&self) -> Result<bool> {
        Ok(self.tenure.lock()?.is_some())
    }

    pub fn become_primary(&self) -> Result<()> {
        let mut tenure = self.tenure.lock()?;
        if tenure.is_some() {
            return Err(diagnostics::violation(
                "RoleSynchronizer.BecomePrimary",
                "already primary",
            ));
        }
        *tenure = Some(Tenure {
            recovery: Completion::new(),
            demoted: Completion::new(),
        });
        info!("role gate entered primary");
        Ok(())
    }

    pub fn demote(&self) -> Result<()> {
        let previous = self.tenure.lock()?.take();
        let Some(tenure) = previous else {
            return Err(diagnostics::violation(
                "RoleSynchronizer.Demote",
                "demoted while not primary",
            ));
        };

        if !tenure.recovery.try_set_error(StreamError::NotPrimary) {
            warn!("recovery handle already resolved at demotion");
        }
        tenure.demoted.try_set_error(StreamError::NotPrimary);
        info!("role gate entered secondary");
        Ok(())
    }

    /// Reject `completion` with `NotPrimary` once this tenure ends.
    /// Fails with `NotPrimary` on a secondary.
    pub fn cancel_on_demotion<T>(&self, completion: &Completion<T>) -> Result<DemotionGuard>
    where
        T: Clone + Send + Sync + 'static,
    {
        let demoted = match self.tenure.lock()?.as_ref() {
            Some(tenure) => tenure.demoted.clone(),
            None => return Err(StreamError::NotPrimary),
        };

        let target = completion.clone();
        let task = tokio::spawn(async move {
            if let Err(err) = demoted.wait().await {
                target.try_set_error(err);
            }
        });
        Ok(DemotionGuard { task })
    }

    pub fn mark_recovered(&self) -> Result<()> {
        self.resolve(Ok(()))
    }

    pub fn mark_recovery_failed(&self, err: StreamError) -> Result<()> {
        self.resolve(Err(err))
    }

    fn resolve(&self, outcome: Result<()>) -> Result<()> {
        let handle = self.tenure.lock()?.as_ref().map(|t| t.recovery.clone());
        match handle {
            Some(handle) => {
                if !handle.try_set(outcome) {
                    warn!("recovery handle already resolved");
                }
            }
            None => warn!("no pending recovery handle"),
        }
        Ok(())
    }

    /// Resolves once recovery finished; `NotPrimary` on a secondary or when
    /// demoted while waiting.
    pub async fn wait_for_recovery(&self) -> Result<()> {
        let handle = self.tenure.lock()?.as_ref().map(|t| t.recovery.clone());
        match handle {
            Some(handle) => handle.wait().await,
            None => Err(StreamError::NotPrimary),
        }
    }
}

impl Default for RoleSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a demotion cancellation armed; dropping it stops the watch.
pub struct DemotionGuard {
    task: JoinHandle<()>,
}

impl Drop for DemotionGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keeps a role-loss cancellation armed; disposing it disarms the hook.
pub struct RoleLossGuard {
    store: Arc<dyn ConsolidatedStore>,
    txn: TransactionId,
}

impl RoleLossGuard {
    pub fn transaction(&self) -> TransactionId {
        self.txn
    }
}

impl Drop for RoleLossGuard {
    fn drop(&mut self) {
        self.store.dispose(self.txn);
    }
}

/// Reject `completion` with `NotPrimary` if the store loses its role before
/// the returned guard is dropped.
pub fn cancel_on_role_loss<T>(
    store: &Arc<dyn ConsolidatedStore>,
    completion: &Completion<T>,
) -> Result<RoleLossGuard>
where
    T: Clone + Send + Sync + 'static,
{
    let txn = store.create_read_only_transaction()?;
    let guard = RoleLossGuard {
        store: Arc::clone(store),
        txn,
    };

    let target = completion.clone();
    store.register_role_lost_hook(
        txn,
        Box::new(move || {
            target.try_set_error(StreamError::NotPrimary);
        }),
    )?;
    Ok(guard)
}
