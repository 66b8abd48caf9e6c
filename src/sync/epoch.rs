use crate::core::RoleEpoch;
use std::sync::{PoisonError, RwLock};

/// Source of the replica's current role epoch.
///
/// Coordination objects capture an epoch when they are created and compare
/// it against `current()` before every retry.
#[derive(Debug)]
pub struct EpochClock {
    current: RwLock<RoleEpoch>,
}

impl EpochClock {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(RoleEpoch::initial()),
        }
    }

    pub fn current(&self) -> RoleEpoch {
        *self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to a fresh epoch and return it
    pub fn advance(&self) -> RoleEpoch {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = current.next();
        *current
    }

    pub fn is_current(&self, captured: &RoleEpoch) -> bool {
        self.current().generation == captured.generation
    }
}

impl Default for EpochClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_invalidates_captured_epoch() {
        let clock = EpochClock::new();
        let captured = clock.advance();
        assert!(clock.is_current(&captured));

        let next = clock.advance();
        assert!(!clock.is_current(&captured));
        assert!(clock.is_current(&next));
        assert_eq!(next.generation, captured.generation + 1);
    }
}
