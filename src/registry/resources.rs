// ============================================================================
// Runtime Registry
// ============================================================================
//
// Everything a primary keeps in memory about its streams. Built by `reset`
// on promotion and emptied by `clear` on demotion. Per-key operations go
// through `DashMap` shards; only the sync-point collection slots take an
// exclusive lock, and only to swap the collection as a whole.
//
// Clearing never resolves waiters: a sync point that captured a collection
// before `clear` keeps working on it, and pending completions stay owned by
// whoever awaits them.
//
// ============================================================================

use super::router::PrefixCallbackRouter;
use crate::core::{ProtocolResponse, Result, SequenceNumber, StreamId};
use crate::delivery::{InboundStream, OutboundStream};
use crate::partition::PartitionKey;
use crate::sync::{Completion, EpochClock, SyncPoint, SyncPointCollection, new_collection};
use crate::transaction::TransactionId;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use tracing::debug;

pub type ProtocolCompletion = Completion<ProtocolResponse>;

pub struct RuntimeResources {
    clock: Arc<EpochClock>,

    pub open_stream_completions: DashMap<StreamId, ProtocolCompletion>,
    pub close_stream_completions: DashMap<StreamId, ProtocolCompletion>,
    pub delete_stream_completions: DashMap<StreamId, ProtocolCompletion>,

    pause_stream_sync_points: RwLock<Option<SyncPointCollection<StreamId>>>,
    outbound_driver_sync_points: RwLock<Option<SyncPointCollection<PartitionKey>>>,
    partner_reset_sync_points: RwLock<Option<SyncPointCollection<PartitionKey>>>,

    pub inbound_streams: DashMap<StreamId, Arc<InboundStream>>,
    pub outbound_streams: DashMap<StreamId, Arc<OutboundStream>>,
    pub active_inbound_by_transaction: DashMap<TransactionId, BTreeSet<StreamId>>,
    pub next_sequence_number_to_delete: DashMap<StreamId, SequenceNumber>,

    pub router: PrefixCallbackRouter,
}

impl RuntimeResources {
    pub fn new(clock: Arc<EpochClock>) -> Self {
        Self {
            clock,
            open_stream_completions: DashMap::new(),
            close_stream_completions: DashMap::new(),
            delete_stream_completions: DashMap::new(),
            pause_stream_sync_points: RwLock::new(None),
            outbound_driver_sync_points: RwLock::new(None),
            partner_reset_sync_points: RwLock::new(None),
            inbound_streams: DashMap::new(),
            outbound_streams: DashMap::new(),
            active_inbound_by_transaction: DashMap::new(),
            next_sequence_number_to_delete: DashMap::new(),
            router: PrefixCallbackRouter::new(),
        }
    }

    pub fn clock(&self) -> &Arc<EpochClock> {
        &self.clock
    }

    /// Allocate fresh sync-point collections for a new primary epoch
    pub fn reset(&self) -> Result<()> {
        *self.pause_stream_sync_points.write()? = Some(new_collection());
        *self.outbound_driver_sync_points.write()? = Some(new_collection());
        *self.partner_reset_sync_points.write()? = Some(new_collection());
        debug!(epoch = %self.clock.current(), "runtime resources reset");
        Ok(())
    }

    /// Drop all in-memory stream state and discard the sync-point
    /// collections. Nothing waiting on them is woken here.
    pub fn clear(&self) -> Result<()> {
        self.open_stream_completions.clear();
        self.close_stream_completions.clear();
        self.delete_stream_completions.clear();
        self.inbound_streams.clear();
        self.outbound_streams.clear();
        self.active_inbound_by_transaction.clear();
        self.next_sequence_number_to_delete.clear();
        self.router.clear()?;

        *self.pause_stream_sync_points.write()? = None;
        *self.outbound_driver_sync_points.write()? = None;
        *self.partner_reset_sync_points.write()? = None;
        debug!("runtime resources cleared");
        Ok(())
    }

    pub fn pause_stream_sync_points(&self) -> Result<Option<SyncPointCollection<StreamId>>> {
        Ok(self.pause_stream_sync_points.read()?.clone())
    }

    pub fn outbound_driver_sync_points(&self) -> Result<Option<SyncPointCollection<PartitionKey>>> {
        Ok(self.outbound_driver_sync_points.read()?.clone())
    }

    pub fn partner_reset_sync_points(&self) -> Result<Option<SyncPointCollection<PartitionKey>>> {
        Ok(self.partner_reset_sync_points.read()?.clone())
    }

    /// Sync point guarding lifecycle changes of one stream, bound to the
    /// current epoch.
    pub fn pause_stream_sync_point(&self, stream_id: StreamId) -> Result<SyncPoint<StreamId>> {
        SyncPoint::new(
            &self.clock,
            self.clock.current(),
            stream_id,
            self.pause_stream_sync_points()?,
        )
    }

    pub fn outbound_driver_sync_point(&self, partner: PartitionKey) -> Result<SyncPoint<PartitionKey>> {
        SyncPoint::new(
            &self.clock,
            self.clock.current(),
            partner,
            self.outbound_driver_sync_points()?,
        )
    }

    pub fn partner_reset_sync_point(&self, partner: PartitionKey) -> Result<SyncPoint<PartitionKey>> {
        SyncPoint::new(
            &self.clock,
            self.clock.current(),
            partner,
            self.partner_reset_sync_points()?,
        )
    }

    pub fn register_active_inbound(&self, txn: TransactionId, stream_id: StreamId) {
        self.active_inbound_by_transaction
            .entry(txn)
            .or_default()
            .insert(stream_id);
    }

    /// Streams that received under `txn`, removing the registration
    pub fn take_active_inbound(&self, txn: TransactionId) -> BTreeSet<StreamId> {
        self.active_inbound_by_transaction
            .remove(&txn)
            .map(|(_, streams)| streams)
            .unwrap_or_default()
    }

    /// Fresh or existing pending open completion for `stream_id`
    pub fn open_completion(&self, stream_id: StreamId) -> ProtocolCompletion {
        self.open_stream_completions
            .entry(stream_id)
            .or_default()
            .clone()
    }

    /// Resolve and remove a pending open completion.
    /// Returns `false` when nothing was pending.
    pub fn complete_open(&self, stream_id: StreamId, response: ProtocolResponse) -> bool {
        match self.open_stream_completions.remove(&stream_id) {
            Some((_, completion)) => completion.try_set_value(response),
            None => false,
        }
    }
}
