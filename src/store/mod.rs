// ============================================================================
// Consolidated Store Collaborator
// ============================================================================
//
// The transactional ordered key-value store that holds every stream's
// durable state. The stream layer only depends on this trait; `MemoryStore`
// is the in-process implementation used by tests and single-node hosts.
//
// Contract:
// - Writes take an exclusive per-key lock held until commit or abort.
// - Reads see the transaction's own writes, then committed state.
// - Write operations fail with `NotPrimary` once the replica lost its role,
//   reads fail with `NotReadable` while the store is not readable.
// - Listeners observe every commit (with its write set) and every abort.
//
// ============================================================================

pub mod memory;

pub use memory::MemoryStore;

use crate::codec::{ConsolidatedStoreBody, ConsolidatedStoreKey, StoreKind};
use crate::core::Result;
use crate::sync::WaitTimeout;
use crate::transaction::{RoleLostHook, TransactionId};
use async_trait::async_trait;
use std::sync::Arc;

/// Computes the new body of a key from its current body
pub type BodyUpdate =
    Box<dyn FnOnce(Option<&ConsolidatedStoreBody>) -> Result<ConsolidatedStoreBody> + Send>;

/// One committed change; `None` is a removal
pub type StoreChange = (ConsolidatedStoreKey, Option<ConsolidatedStoreBody>);

#[async_trait]
pub trait ConsolidatedStore: Send + Sync {
    fn create_transaction(&self) -> Result<TransactionId>;

    /// A transaction that never writes; valid on any role.
    fn create_read_only_transaction(&self) -> Result<TransactionId>;

    async fn get(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
    ) -> Result<Option<ConsolidatedStoreBody>>;

    async fn put(
        &self,
        txn: TransactionId,
        key: ConsolidatedStoreKey,
        body: ConsolidatedStoreBody,
        timeout: WaitTimeout,
    ) -> Result<()>;

    /// Remove `key`, returning the body it had
    async fn remove(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
        timeout: WaitTimeout,
    ) -> Result<Option<ConsolidatedStoreBody>>;

    /// Replace the body of `key` with `update(current)` and return the
    /// body it had before.
    async fn update_with_output(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
        update: BodyUpdate,
        timeout: WaitTimeout,
    ) -> Result<Option<ConsolidatedStoreBody>>;

    /// All entries of one store kind in key order
    async fn scan(
        &self,
        txn: TransactionId,
        kind: StoreKind,
    ) -> Result<Vec<(ConsolidatedStoreKey, ConsolidatedStoreBody)>>;

    async fn commit(&self, txn: TransactionId) -> Result<()>;

    async fn abort(&self, txn: TransactionId) -> Result<()>;

    /// Release `txn` without committing. Unknown or finished transactions
    /// are ignored.
    fn dispose(&self, txn: TransactionId);

    /// Run `hook` if the replica loses its role while `txn` is open.
    /// Runs it at once when the role is already lost.
    fn register_role_lost_hook(&self, txn: TransactionId, hook: RoleLostHook) -> Result<()>;

    fn register_listener(&self, listener: Arc<dyn StoreListener>);

    fn is_writable(&self) -> bool;
}

pub trait StoreListener: Send + Sync {
    fn on_committed(&self, txn: TransactionId, changes: &[StoreChange]);

    fn on_aborted(&self, txn: TransactionId);
}
