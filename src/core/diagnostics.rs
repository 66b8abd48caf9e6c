// ============================================================================
// Invariant Diagnostics
// ============================================================================
//
// Every broken invariant in the stream layer funnels through `violation`.
// Under `InvariantPolicy::Abort` the process is terminated after the event is
// logged, so persisted stream state is never touched by a replica that has
// observed an inconsistency. `Propagate` returns the typed error instead and
// is what tests install.
//
// ============================================================================

use super::error::StreamError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvariantPolicy {
    /// Abort the replica process on the first violation
    #[default]
    Abort,

    /// Return `StreamError::InvariantViolation` to the caller
    Propagate,
}

const POLICY_ABORT: u8 = 0;
const POLICY_PROPAGATE: u8 = 1;

/// Nothing is aborted until a configuration explicitly asks for it.
static POLICY: AtomicU8 = AtomicU8::new(POLICY_PROPAGATE);

pub fn install_policy(policy: InvariantPolicy) {
    let raw = match policy {
        InvariantPolicy::Abort => POLICY_ABORT,
        InvariantPolicy::Propagate => POLICY_PROPAGATE,
    };
    POLICY.store(raw, Ordering::SeqCst);
}

pub fn current_policy() -> InvariantPolicy {
    match POLICY.load(Ordering::SeqCst) {
        POLICY_ABORT => InvariantPolicy::Abort,
        _ => InvariantPolicy::Propagate,
    }
}

/// Report a broken invariant.
///
/// Returns the error to hand back to the caller when the policy is
/// `Propagate`; never returns under `Abort`.
pub fn violation(context: &str, message: impl Into<String>) -> StreamError {
    let message = message.into();
    tracing::error!(context, %message, "invariant violation");

    if current_policy() == InvariantPolicy::Abort {
        std::process::abort();
    }

    StreamError::InvariantViolation(format!("{}: {}", context, message))
}

/// `Ok(())` when `condition` holds, otherwise a reported violation.
pub fn ensure(condition: bool, context: &str, message: impl FnOnce() -> String) -> Result<(), StreamError> {
    if condition {
        Ok(())
    } else {
        Err(violation(context, message()))
    }
}
