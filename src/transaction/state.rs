// ============================================================================
// Store Transaction State
// ============================================================================
//
// A store transaction moves Active -> Committed | Aborted exactly once.
// Writes are buffered in the transaction's write set and become visible to
// other transactions only at commit. Role-lost hooks run at most once: when
// the replica loses its role while the transaction is still open.
//
// ============================================================================

use crate::codec::{ConsolidatedStoreBody, ConsolidatedStoreKey};
use crate::core::{Result, StreamError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Callback fired when the replica loses its role under an open transaction
pub type RoleLostHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──abort──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// One buffered change; `None` removes the key at commit
pub type WriteSet = BTreeMap<ConsolidatedStoreKey, Option<ConsolidatedStoreBody>>;

pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    read_only: bool,
    writes: WriteSet,
    locked_keys: BTreeSet<ConsolidatedStoreKey>,
    role_lost_hooks: Vec<RoleLostHook>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId, read_only: bool) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            read_only,
            writes: WriteSet::new(),
            locked_keys: BTreeSet::new(),
            role_lost_hooks: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// The transaction's own view of `key`, if it has written it.
    /// `Some(None)` means the transaction removed the key.
    pub fn pending(&self, key: &ConsolidatedStoreKey) -> Option<Option<&ConsolidatedStoreBody>> {
        self.writes.get(key).map(Option::as_ref)
    }

    pub fn writes(&self) -> &WriteSet {
        &self.writes
    }

    pub fn record_lock(&mut self, key: ConsolidatedStoreKey) {
        self.locked_keys.insert(key);
    }

    pub fn record_write(
        &mut self,
        key: ConsolidatedStoreKey,
        body: Option<ConsolidatedStoreBody>,
    ) -> Result<()> {
        self.ensure_active("write")?;
        if self.read_only {
            return Err(StreamError::InvalidArgument(format!(
                "transaction {} is read-only",
                self.id
            )));
        }
        self.writes.insert(key, body);
        Ok(())
    }

    pub fn add_role_lost_hook(&mut self, hook: RoleLostHook) -> Result<()> {
        self.ensure_active("register role-lost hook")?;
        self.role_lost_hooks.push(hook);
        Ok(())
    }

    pub fn take_role_lost_hooks(&mut self) -> Vec<RoleLostHook> {
        std::mem::take(&mut self.role_lost_hooks)
    }

    /// Mark committed and hand back the write set and the keys to unlock
    pub fn commit(&mut self) -> Result<(WriteSet, BTreeSet<ConsolidatedStoreKey>)> {
        self.ensure_active("commit")?;
        self.state = TransactionState::Committed;
        self.role_lost_hooks.clear();
        Ok((
            std::mem::take(&mut self.writes),
            std::mem::take(&mut self.locked_keys),
        ))
    }

    /// Mark aborted, discard the write set and hand back the keys to unlock
    pub fn abort(&mut self) -> Result<BTreeSet<ConsolidatedStoreKey>> {
        self.ensure_active("abort")?;
        self.state = TransactionState::Aborted;
        self.writes.clear();
        self.role_lost_hooks.clear();
        Ok(std::mem::take(&mut self.locked_keys))
    }

    fn ensure_active(&self, operation: &str) -> Result<()> {
        if !self.state.is_active() {
            return Err(StreamError::InvalidArgument(format!(
                "cannot {}: transaction {} is {}",
                operation, self.id, self.state
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("read_only", &self.read_only)
            .field("writes", &self.writes.len())
            .field("role_lost_hooks", &self.role_lost_hooks.len())
            .finish()
    }
}
