// ============================================================================
// Coordination Primitives
// ============================================================================
//
// - Completion: single-assignment async result (CAS-guarded)
// - SyncPoint: keyed async critical section with timeout and epoch checks
// - SingularSyncPoint: one unkeyed async critical section
// - EpochClock: generation stamp used to invalidate stale coordination objects
// - timeout: budget arithmetic and delay races
//
// No primitive holds a lock across a suspension point.
//
// ============================================================================

pub mod completion;
pub mod epoch;
pub mod singular;
pub mod sync_point;
pub mod timeout;

pub use completion::Completion;
pub use epoch::EpochClock;
pub use singular::SingularSyncPoint;
pub use sync_point::{SyncPoint, SyncPointCollection, new_collection};
pub use timeout::{WaitTimeout, wait_with_delay};
