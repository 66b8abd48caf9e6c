use super::{BodyUpdate, ConsolidatedStore, StoreChange, StoreListener};
use crate::codec::{BinaryEncode, ConsolidatedStoreBody, ConsolidatedStoreKey, StoreKind};
use crate::core::{Result, StreamError};
use crate::sync::{Completion, WaitTimeout, wait_with_delay};
use crate::transaction::{RoleLostHook, Transaction, TransactionId};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

struct StoreState {
    /// Committed bodies in their canonical encoding
    committed: BTreeMap<ConsolidatedStoreKey, Bytes>,
    transactions: HashMap<TransactionId, Transaction>,
    key_locks: BTreeMap<ConsolidatedStoreKey, (TransactionId, Completion<()>)>,
    writable: bool,
    readable: bool,
    injected_failure: Option<StreamError>,
}

impl StoreState {
    fn take_injected(&mut self) -> Result<()> {
        match self.injected_failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(StreamError::NotPrimary);
        }
        Ok(())
    }

    fn ensure_readable(&self) -> Result<()> {
        if !self.readable {
            return Err(StreamError::NotReadable);
        }
        Ok(())
    }

    fn transaction_mut(&mut self, txn: TransactionId) -> Result<&mut Transaction> {
        self.transactions
            .get_mut(&txn)
            .ok_or(StreamError::ObjectClosed)
    }

    fn read(
        &self,
        txn: &Transaction,
        key: &ConsolidatedStoreKey,
    ) -> Result<Option<ConsolidatedStoreBody>> {
        if let Some(pending) = txn.pending(key) {
            return Ok(pending.cloned());
        }
        match self.committed.get(key) {
            Some(bytes) => ConsolidatedStoreBody::decode_optional(bytes),
            None => Ok(None),
        }
    }

    fn release_locks(&mut self, keys: &BTreeSet<ConsolidatedStoreKey>) {
        for key in keys {
            if let Some((_, signal)) = self.key_locks.remove(key) {
                signal.try_set_value(());
            }
        }
    }
}

/// In-process consolidated store.
///
/// Bodies are persisted in their binary encoding, so every read decodes
/// what a write encoded. Fault injection hooks let tests simulate role
/// loss and unreadable replicas.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    listeners: RwLock<Vec<Arc<dyn StoreListener>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                committed: BTreeMap::new(),
                transactions: HashMap::new(),
                key_locks: BTreeMap::new(),
                writable: true,
                readable: true,
                injected_failure: None,
            }),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Simulate losing the primary role: writes start failing with
    /// `NotPrimary` and every open transaction's role-lost hooks fire.
    pub fn revoke_role(&self) -> Result<()> {
        let hooks: Vec<RoleLostHook> = {
            let mut state = self.state.lock()?;
            state.writable = false;
            state
                .transactions
                .values_mut()
                .flat_map(|txn| txn.take_role_lost_hooks())
                .collect()
        };

        info!(hooks = hooks.len(), "store role revoked");
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    /// Make the store writable and readable again, as after a promotion.
    pub fn restore_role(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.writable = true;
        state.readable = true;
        info!("store role restored");
        Ok(())
    }

    pub fn set_readable(&self, readable: bool) -> Result<()> {
        self.state.lock()?.readable = readable;
        Ok(())
    }

    /// Fail the next data operation with `err`
    pub fn inject_failure(&self, err: StreamError) -> Result<()> {
        self.state.lock()?.injected_failure = Some(err);
        Ok(())
    }

    /// Committed body of `key`, bypassing transactions
    pub fn read_committed(&self, key: &ConsolidatedStoreKey) -> Result<Option<ConsolidatedStoreBody>> {
        let state = self.state.lock()?;
        match state.committed.get(key) {
            Some(bytes) => ConsolidatedStoreBody::decode_optional(bytes),
            None => Ok(None),
        }
    }

    pub fn committed_len(&self) -> Result<usize> {
        Ok(self.state.lock()?.committed.len())
    }

    pub fn open_transactions(&self) -> Result<usize> {
        Ok(self.state.lock()?.transactions.len())
    }

    fn begin(&self, read_only: bool) -> Result<TransactionId> {
        let mut state = self.state.lock()?;
        if !read_only {
            state.ensure_writable()?;
        }
        let id = TransactionId::new();
        state.transactions.insert(id, Transaction::new(id, read_only));
        debug!(txn = %id, read_only, "transaction created");
        Ok(id)
    }

    async fn acquire_lock(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
        timeout: WaitTimeout,
    ) -> Result<()> {
        let mut remaining = timeout;

        loop {
            let occupant = {
                let mut state = self.state.lock()?;
                state.take_injected()?;
                state.ensure_writable()?;

                let owner = state.key_locks.get(key).map(|(owner, signal)| (*owner, signal.clone()));
                match owner {
                    Some((owner, _)) if owner == txn => return Ok(()),
                    Some((_, signal)) => signal,
                    None => {
                        state.transaction_mut(txn)?.record_lock(key.clone());
                        state.key_locks.insert(key.clone(), (txn, Completion::new()));
                        return Ok(());
                    }
                }
            };

            let before = Instant::now();
            if wait_with_delay(remaining, occupant.wait()).await.is_none() {
                debug!(txn = %txn, %key, "timed out waiting for key lock");
                return Err(StreamError::Timeout);
            }
            remaining = remaining.remaining(before, Instant::now());
        }
    }

    fn write(
        &self,
        txn: TransactionId,
        key: ConsolidatedStoreKey,
        body: Option<ConsolidatedStoreBody>,
    ) -> Result<()> {
        let mut state = self.state.lock()?;
        state.ensure_writable()?;
        state.transaction_mut(txn)?.record_write(key, body)
    }

    fn listeners(&self) -> Result<Vec<Arc<dyn StoreListener>>> {
        Ok(self.listeners.read()?.clone())
    }

    /// Called only after listeners have observed the commit or abort.
    fn release_locks(&self, keys: &BTreeSet<ConsolidatedStoreKey>) -> Result<()> {
        self.state.lock()?.release_locks(keys);
        Ok(())
    }

    fn finish_aborted(&self, txn: TransactionId, locks: &BTreeSet<ConsolidatedStoreKey>) -> Result<()> {
        debug!(txn = %txn, "transaction aborted");
        for listener in self.listeners()? {
            listener.on_aborted(txn);
        }
        self.release_locks(locks)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsolidatedStore for MemoryStore {
    fn create_transaction(&self) -> Result<TransactionId> {
        self.begin(false)
    }

    fn create_read_only_transaction(&self) -> Result<TransactionId> {
        self.begin(true)
    }

    async fn get(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
    ) -> Result<Option<ConsolidatedStoreBody>> {
        let mut state = self.state.lock()?;
        state.take_injected()?;
        state.ensure_readable()?;
        let transaction = state
            .transactions
            .get(&txn)
            .ok_or(StreamError::ObjectClosed)?;
        state.read(transaction, key)
    }

    async fn put(
        &self,
        txn: TransactionId,
        key: ConsolidatedStoreKey,
        body: ConsolidatedStoreBody,
        timeout: WaitTimeout,
    ) -> Result<()> {
        self.acquire_lock(txn, &key, timeout).await?;
        self.write(txn, key, Some(body))
    }

    async fn remove(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
        timeout: WaitTimeout,
    ) -> Result<Option<ConsolidatedStoreBody>> {
        self.acquire_lock(txn, key, timeout).await?;

        let mut state = self.state.lock()?;
        state.ensure_writable()?;
        let transaction = state
            .transactions
            .get(&txn)
            .ok_or(StreamError::ObjectClosed)?;
        let previous = state.read(transaction, key)?;
        state.transaction_mut(txn)?.record_write(key.clone(), None)?;
        Ok(previous)
    }

    async fn update_with_output(
        &self,
        txn: TransactionId,
        key: &ConsolidatedStoreKey,
        update: BodyUpdate,
        timeout: WaitTimeout,
    ) -> Result<Option<ConsolidatedStoreBody>> {
        self.acquire_lock(txn, key, timeout).await?;

        let mut state = self.state.lock()?;
        state.ensure_writable()?;
        state.ensure_readable()?;
        let transaction = state
            .transactions
            .get(&txn)
            .ok_or(StreamError::ObjectClosed)?;
        let previous = state.read(transaction, key)?;
        let next = update(previous.as_ref())?;
        state.transaction_mut(txn)?.record_write(key.clone(), Some(next))?;
        Ok(previous)
    }

    async fn scan(
        &self,
        txn: TransactionId,
        kind: StoreKind,
    ) -> Result<Vec<(ConsolidatedStoreKey, ConsolidatedStoreBody)>> {
        let mut state = self.state.lock()?;
        state.take_injected()?;
        state.ensure_readable()?;
        let transaction = state
            .transactions
            .get(&txn)
            .ok_or(StreamError::ObjectClosed)?;

        let mut merged: BTreeMap<ConsolidatedStoreKey, Option<ConsolidatedStoreBody>> =
            BTreeMap::new();
        for (key, bytes) in state.committed.iter() {
            if key.store_kind() == kind {
                merged.insert(key.clone(), ConsolidatedStoreBody::decode_optional(bytes)?);
            }
        }
        for (key, body) in transaction.writes() {
            if key.store_kind() == kind {
                merged.insert(key.clone(), body.clone());
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(key, body)| body.map(|body| (key, body)))
            .collect())
    }

    async fn commit(&self, txn: TransactionId) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock()?;
            let mut transaction = state
                .transactions
                .remove(&txn)
                .ok_or(StreamError::ObjectClosed)?;

            let mut admitted = state.take_injected();
            if admitted.is_ok() && !transaction.is_read_only() {
                admitted = state.ensure_writable();
            }

            if let Err(err) = admitted {
                let locks = transaction.abort()?;
                Err((err, locks))
            } else {
                let (writes, locks) = transaction.commit()?;
                let mut changes: Vec<StoreChange> = Vec::with_capacity(writes.len());
                for (key, body) in writes {
                    match &body {
                        Some(present) => {
                            state.committed.insert(key.clone(), present.to_bytes());
                        }
                        None => {
                            state.committed.remove(&key);
                        }
                    }
                    changes.push((key, body));
                }
                Ok((changes, locks))
            }
        };

        match outcome {
            Ok((changes, locks)) => {
                debug!(txn = %txn, changes = changes.len(), "transaction committed");
                for listener in self.listeners()? {
                    listener.on_committed(txn, &changes);
                }
                self.release_locks(&locks)
            }
            Err((err, locks)) => {
                self.finish_aborted(txn, &locks)?;
                Err(err)
            }
        }
    }

    async fn abort(&self, txn: TransactionId) -> Result<()> {
        let locks = {
            let mut state = self.state.lock()?;
            let mut transaction = state
                .transactions
                .remove(&txn)
                .ok_or(StreamError::ObjectClosed)?;
            transaction.abort()?
        };
        self.finish_aborted(txn, &locks)
    }

    fn dispose(&self, txn: TransactionId) {
        let locks = match self.state.lock() {
            Ok(mut state) => state
                .transactions
                .remove(&txn)
                .and_then(|mut transaction| transaction.abort().ok()),
            Err(_) => None,
        };

        if let Some(locks) = locks {
            let _ = self.finish_aborted(txn, &locks);
        }
    }

    fn register_role_lost_hook(&self, txn: TransactionId, hook: RoleLostHook) -> Result<()> {
        let run_now = {
            let mut state = self.state.lock()?;
            if state.writable {
                state.transaction_mut(txn)?.add_role_lost_hook(hook)?;
                None
            } else {
                Some(hook)
            }
        };

        if let Some(hook) = run_now {
            debug!(txn = %txn, "role already lost, running hook");
            hook();
        }
        Ok(())
    }

    fn register_listener(&self, listener: Arc<dyn StoreListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    fn is_writable(&self) -> bool {
        self.state.lock().map(|state| state.writable).unwrap_or(false)
    }
}
