// ============================================================================
// Timeout Arithmetic
// ============================================================================
//
// Multi-step operations carry one timeout budget. Each step records the time
// before and after it and shrinks the budget with `remaining`. A timeout is
// only ever enforced by racing the awaited future against a delay; the
// awaited operation itself is never cancelled from the inside.
//
// ============================================================================

use crate::core::{Result, StreamError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    Infinite,
    After(Duration),
}

impl WaitTimeout {
    pub fn from_millis(millis: u64) -> Self {
        WaitTimeout::After(Duration::from_millis(millis))
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, WaitTimeout::Infinite)
    }

    /// Reject finite timeouts larger than `max`
    pub fn validate(&self, max: Duration) -> Result<()> {
        match self {
            WaitTimeout::Infinite => Ok(()),
            WaitTimeout::After(d) if *d <= max => Ok(()),
            WaitTimeout::After(d) => Err(StreamError::InvalidArgument(format!(
                "timeout {:?} exceeds maximum {:?}",
                d, max
            ))),
        }
    }

    /// Budget left after a step that ran from `before` to `after`.
    /// Saturates at zero; an infinite budget stays infinite.
    pub fn remaining(&self, before: Instant, after: Instant) -> WaitTimeout {
        match self {
            WaitTimeout::Infinite => WaitTimeout::Infinite,
            WaitTimeout::After(d) => {
                let elapsed = after.saturating_duration_since(before);
                WaitTimeout::After(d.saturating_sub(elapsed))
            }
        }
    }

    /// Absolute deadline starting at `now`; `None` for an infinite timeout
    pub fn deadline_from(&self, now: Instant) -> Result<Option<Instant>> {
        match self {
            WaitTimeout::Infinite => Ok(None),
            WaitTimeout::After(d) => now.checked_add(*d).map(Some).ok_or_else(|| {
                StreamError::InvalidArgument(format!("timeout {:?} overflows the clock", d))
            }),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, WaitTimeout::After(d) if d.is_zero())
    }
}

impl From<Duration> for WaitTimeout {
    fn from(value: Duration) -> Self {
        WaitTimeout::After(value)
    }
}

impl From<Option<Duration>> for WaitTimeout {
    fn from(value: Option<Duration>) -> Self {
        value.map_or(WaitTimeout::Infinite, WaitTimeout::After)
    }
}

/// Race `operation` against `timeout`.
///
/// Returns `None` when the delay finished first. The operation future is
/// dropped in that case, so it must not own state that outlives the race.
pub async fn wait_with_delay<F>(timeout: WaitTimeout, operation: F) -> Option<F::Output>
where
    F: Future,
{
    match timeout {
        WaitTimeout::Infinite => Some(operation.await),
        WaitTimeout::After(d) => tokio::time::timeout(d, operation).await.ok(),
    }
}
