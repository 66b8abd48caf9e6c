use super::diagnostics;
use super::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Per-stream message ordinal. Positive values are real messages.
pub type SequenceNumber = i64;

pub const FIRST_MESSAGE_SEQUENCE_NUMBER: SequenceNumber = 1;

/// "No value yet", used for an unset close sequence number.
pub const INITIAL_LAST_SEQUENCE_NUMBER: SequenceNumber = -1;

/// Carried by protocol responses that are not part of the stream ordering.
pub const PROTOCOL_RESPONSE_SEQUENCE_NUMBER: SequenceNumber = -10;

/// Carried by messages that prompt a partner to re-run recovery.
pub const RECOVERY_PROMPT_SEQUENCE_NUMBER: SequenceNumber = -20;

/// Unique identifier of one stream instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        StreamId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one primary incarnation of the owning replica.
///
/// `era` is the opaque GUID published with the partition's endpoint;
/// `generation` only ever grows and is what invalidation compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleEpoch {
    pub era: Uuid,
    pub generation: u64,
}

impl RoleEpoch {
    /// Epoch of a replica that has never been primary.
    pub fn initial() -> Self {
        Self {
            era: Uuid::nil(),
            generation: 0,
        }
    }

    /// The epoch that follows this one on promotion
    pub fn next(&self) -> Self {
        Self {
            era: Uuid::new_v4(),
            generation: self.generation + 1,
        }
    }
}

impl fmt::Display for RoleEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.era, self.generation)
    }
}

/// Persisted lifecycle state of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersistentStreamState {
    Initialized,
    Opening,
    Open,
    Closing,
    Closed,
    Deleting,
    Deleted,
}

impl PersistentStreamState {
    pub fn code(&self) -> i32 {
        match self {
            PersistentStreamState::Initialized => 1,
            PersistentStreamState::Opening => 2,
            PersistentStreamState::Open => 3,
            PersistentStreamState::Closing => 4,
            PersistentStreamState::Closed => 5,
            PersistentStreamState::Deleting => 6,
            PersistentStreamState::Deleted => 7,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(PersistentStreamState::Initialized),
            2 => Ok(PersistentStreamState::Opening),
            3 => Ok(PersistentStreamState::Open),
            4 => Ok(PersistentStreamState::Closing),
            5 => Ok(PersistentStreamState::Closed),
            6 => Ok(PersistentStreamState::Deleting),
            7 => Ok(PersistentStreamState::Deleted),
            other => Err(diagnostics::violation(
                "PersistentStreamState.FromCode",
                format!("unknown persistent stream state {}", other),
            )),
        }
    }
}

impl fmt::Display for PersistentStreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PersistentStreamState::Initialized => "INITIALIZED",
            PersistentStreamState::Opening => "OPENING",
            PersistentStreamState::Open => "OPEN",
            PersistentStreamState::Closing => "CLOSING",
            PersistentStreamState::Closed => "CLOSED",
            PersistentStreamState::Deleting => "DELETING",
            PersistentStreamState::Deleted => "DELETED",
        };
        write!(f, "{}", name)
    }
}

/// Outcome carried back by the stream protocol for open/close/delete requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolResponse {
    StreamAccepted,
    StreamRejected,
    TargetNotAcceptingStreams,
    TargetNotReady,
    StreamNotFound,
    StreamPartnerFaulted,
    CloseStreamCompleted,
    ResetPartnerStreamsCompleted,
    TargetNotified,
    Unknown,
}

/// Set-once close sequence number.
///
/// The first `set` wins; later calls must carry the same value.
#[derive(Debug)]
pub struct CloseSequenceNumber {
    value: AtomicI64,
}

impl CloseSequenceNumber {
    pub fn unset() -> Self {
        Self {
            value: AtomicI64::new(INITIAL_LAST_SEQUENCE_NUMBER),
        }
    }

    pub fn with_value(value: SequenceNumber) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    /// Current value, `None` while unset
    pub fn get(&self) -> Option<SequenceNumber> {
        let value = self.value.load(Ordering::SeqCst);
        if value > 0 { Some(value) } else { None }
    }

    pub fn set(&self, sequence_number: SequenceNumber) -> Result<()> {
        diagnostics::ensure(
            sequence_number >= FIRST_MESSAGE_SEQUENCE_NUMBER,
            "CloseSequenceNumber.Set",
            || format!("non-positive close sequence number {}", sequence_number),
        )?;

        match self.value.compare_exchange(
            INITIAL_LAST_SEQUENCE_NUMBER,
            sequence_number,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => Ok(()),
            Err(existing) if existing == sequence_number => Ok(()),
            Err(existing) => Err(diagnostics::violation(
                "CloseSequenceNumber.Set",
                format!(
                    "found two close sequence numbers {} and {}",
                    existing, sequence_number
                ),
            )),
        }
    }
}

impl Default for CloseSequenceNumber {
    fn default() -> Self {
        Self::unset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diagnostics::{InvariantPolicy, install_policy};

    #[test]
    fn test_epoch_generation_grows() {
        let first = RoleEpoch::initial();
        let second = first.next();
        let third = second.next();
        assert_eq!(second.generation, 1);
        assert_eq!(third.generation, 2);
        assert_ne!(second.era, third.era);
    }

    #[test]
    fn test_state_codes_round_trip() {
        for state in [
            PersistentStreamState::Initialized,
            PersistentStreamState::Opening,
            PersistentStreamState::Open,
            PersistentStreamState::Closing,
            PersistentStreamState::Closed,
            PersistentStreamState::Deleting,
            PersistentStreamState::Deleted,
        ] {
            assert_eq!(PersistentStreamState::from_code(state.code()).unwrap(), state);
        }
    }

    #[test]
    fn test_close_sequence_number_is_set_once() {
        install_policy(InvariantPolicy::Propagate);
        let cell = CloseSequenceNumber::unset();
        assert_eq!(cell.get(), None);

        cell.set(7).unwrap();
        cell.set(7).unwrap();
        assert_eq!(cell.get(), Some(7));

        let err = cell.set(8).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(cell.get(), Some(7));
    }
}
