// ============================================================================
// Reliable Stream Core Library
// ============================================================================
//
// Ordered, exactly-once-consumed message streams between partitions of a
// replicated service. Delivery survives primary failover and is tied to the
// consumer's store transaction.
//
// ============================================================================

pub mod codec;
pub mod core;
pub mod delivery;
pub mod partition;
pub mod registry;
pub mod replica;
pub mod role;
pub mod store;
pub mod sync;
pub mod transaction;

// Re-export main types for convenience
pub use crate::core::{
    InvariantPolicy, PersistentStreamState, ProtocolResponse, Result, RoleEpoch, SequenceNumber,
    StreamConfig, StreamError, StreamId,
};
pub use delivery::{InboundStream, OutboundStream, WireMessage, WireMessageKind};
pub use partition::{PartitionInfo, PartitionKey, PartitionSelector};
pub use registry::{InboundStreamCallback, PrefixCallbackRouter, RuntimeResources};
pub use replica::{RecoverySummary, ReplicaContext, ReplicaCoordinator};
pub use role::RoleSynchronizer;
pub use store::{ConsolidatedStore, MemoryStore, StoreListener};
pub use sync::{Completion, SingularSyncPoint, SyncPoint, WaitTimeout};
pub use transaction::TransactionId;
