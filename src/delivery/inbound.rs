// ============================================================================
// Inbound Stream
// ============================================================================
//
// Receive side of one stream. Messages handed over by the session driver
// are cached from next-sequence-to-delete onwards; receives register a
// waiter for the next sequence number of their transaction and are matched
// either at registration (message already cached) or on arrival.
//
// One receive per transaction at a time: every receive enters the stream's
// sync point keyed by its transaction. A stream belongs to the epoch it was
// built in; once that epoch is gone every receive fails with `NotPrimary`.
//
// ============================================================================

use super::message::WireMessage;
use super::waiter::{DeliveryTarget, DeliveryWaiter};
use crate::codec::{
    ConsolidatedStoreBody, ConsolidatedStoreKey, InboundStableParameters, MetadataKind,
    StreamMetadataBody,
};
use crate::core::{
    CloseSequenceNumber, PersistentStreamState, Result, RoleEpoch, SequenceNumber, StreamError,
    StreamId, diagnostics,
};
use crate::partition::PartitionKey;
use crate::replica::ReplicaContext;
use crate::role;
use crate::store::BodyUpdate;
use crate::sync::{SyncPoint, SyncPointCollection, WaitTimeout, new_collection};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info_span};

struct InboundState {
    received: BTreeMap<SequenceNumber, WireMessage>,
    waiters: HashMap<TransactionId, Arc<DeliveryWaiter>>,
    close_message: Option<WireMessage>,
    next_to_delete: SequenceNumber,
    closed: bool,
}

pub struct InboundStream {
    id: StreamId,
    name: String,
    partner: PartitionKey,
    epoch: RoleEpoch,
    close_sequence_number: CloseSequenceNumber,
    state: Mutex<InboundState>,
    receive_sync_points: SyncPointCollection<TransactionId>,
    context: Weak<ReplicaContext>,
}

fn receive_key(stream_id: StreamId) -> ConsolidatedStoreKey {
    ConsolidatedStoreKey::metadata(stream_id, MetadataKind::ReceiveSequenceNumber)
}

fn inbound_key(stream_id: StreamId) -> ConsolidatedStoreKey {
    ConsolidatedStoreKey::metadata(stream_id, MetadataKind::InboundStableParameters)
}

fn adjust_receive_sequence_number(delta: i64) -> BodyUpdate {
    Box::new(move |current| {
        match current
            .and_then(ConsolidatedStoreBody::as_metadata)
            .and_then(StreamMetadataBody::sequence_number)
        {
            Some(next) => Ok(StreamMetadataBody::ReceiveSequenceNumber(next + delta).into()),
            None => Err(diagnostics::violation(
                "InboundStream.Receive",
                "receive sequence number missing",
            )),
        }
    })
}

impl InboundStream {
    pub fn new(
        id: StreamId,
        params: &InboundStableParameters,
        next_to_delete: SequenceNumber,
        epoch: RoleEpoch,
        context: Weak<ReplicaContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: params.stream_name.clone(),
            partner: params.partner.clone(),
            epoch,
            close_sequence_number: params.close_cell(),
            state: Mutex::new(InboundState {
                received: BTreeMap::new(),
                waiters: HashMap::new(),
                close_message: None,
                next_to_delete,
                closed: params.state == PersistentStreamState::Closed,
            }),
            receive_sync_points: new_collection(),
            context,
        })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn partner(&self) -> &PartitionKey {
        &self.partner
    }

    pub fn epoch(&self) -> RoleEpoch {
        self.epoch
    }

    pub fn next_sequence_number_to_delete(&self) -> Result<SequenceNumber> {
        Ok(self.state.lock()?.next_to_delete)
    }

    pub fn cached_messages(&self) -> Result<usize> {
        Ok(self.state.lock()?.received.len())
    }

    pub fn pending_waiters(&self) -> Result<usize> {
        Ok(self.state.lock()?.waiters.len())
    }

    fn context(&self) -> Result<Arc<ReplicaContext>> {
        self.context.upgrade().ok_or(StreamError::NotPrimary)
    }

    /// Receive the next message of this stream inside `txn`.
    ///
    /// Returns the close message once the stream is closed. On `Timeout`
    /// the transaction's receive sequence number is rolled back.
    pub async fn receive(self: &Arc<Self>, txn: TransactionId, timeout: WaitTimeout) -> Result<WireMessage> {
        let context = self.context()?;
        let span = info_span!(
            "receive",
            trace_type = %context.config().trace_type,
            stream = %self.id,
            txn = %txn
        );

        async {
            timeout.validate(context.config().max_wait_timeout)?;
            let started = Instant::now();

            context.wait_for_operating_state(timeout).await?;

            let mut sync_point = SyncPoint::new(
                context.resources().clock(),
                self.epoch,
                txn,
                Some(self.receive_sync_points.clone()),
            )?;
            sync_point.enter(timeout.remaining(started, Instant::now())).await?;

            let result = self
                .receive_in_transaction(&context, txn, timeout.remaining(started, Instant::now()))
                .await;
            sync_point.release()?;

            match result {
                Err(StreamError::NotReadable) if !context.store().is_writable() => {
                    Err(StreamError::NotPrimary)
                }
                other => other,
            }
        }
        .instrument(span)
        .await
    }

    async fn receive_in_transaction(
        self: &Arc<Self>,
        context: &Arc<ReplicaContext>,
        txn: TransactionId,
        timeout: WaitTimeout,
    ) -> Result<WireMessage> {
        let store = context.store();

        let params = match store.get(txn, &inbound_key(self.id)).await? {
            Some(ConsolidatedStoreBody::Metadata(StreamMetadataBody::Inbound(params))) => params,
            _ => return Err(StreamError::ObjectClosed),
        };
        if params.state == PersistentStreamState::Closed {
            debug!("stream already closed");
            return self.close_message(params.close_sequence_number);
        }

        let previous = store
            .update_with_output(
                txn,
                &receive_key(self.id),
                adjust_receive_sequence_number(1),
                timeout,
            )
            .await?;
        let expected = previous
            .as_ref()
            .and_then(ConsolidatedStoreBody::as_metadata)
            .and_then(StreamMetadataBody::sequence_number)
            .ok_or_else(|| {
                diagnostics::violation("InboundStream.Receive", "receive sequence number missing")
            })?;

        let target: Weak<dyn DeliveryTarget> = Arc::downgrade(self) as Weak<dyn DeliveryTarget>;
        let waiter = Arc::new(DeliveryWaiter::new(expected, txn, target));
        let _role_loss = role::cancel_on_role_loss(store, waiter.completion())?;
        let _demotion = context.role().cancel_on_demotion(waiter.completion())?;

        self.add_waiter(&waiter)?;
        context.resources().register_active_inbound(txn, self.id);
        debug!(expected, "waiting for message");

        waiter.on_timeout(timeout).await;
        let outcome = waiter.wait().await;
        if outcome.is_err() {
            self.drop_waiter(expected, txn)?;
        }

        match outcome {
            Err(StreamError::Timeout) => {
                store
                    .update_with_output(
                        txn,
                        &receive_key(self.id),
                        adjust_receive_sequence_number(-1),
                        WaitTimeout::Infinite,
                    )
                    .await?;
                Err(StreamError::Timeout)
            }
            other => other,
        }
    }

    fn close_message(&self, persisted: SequenceNumber) -> Result<WireMessage> {
        let state = self.state.lock()?;
        Ok(state
            .close_message
            .clone()
            .unwrap_or_else(|| WireMessage::close(self.id, persisted)))
    }

    fn add_waiter(&self, waiter: &Arc<DeliveryWaiter>) -> Result<()> {
        let cached = {
            let mut state = self.state.lock()?;
            let txn = waiter.transaction();

            diagnostics::ensure(!state.waiters.contains_key(&txn), "InboundStream.AddWaiter", || {
                format!("{} already has a waiter on stream {}", txn, self.id)
            })?;
            diagnostics::ensure(
                state.waiters.values().all(|w| w.expected() != waiter.expected()),
                "InboundStream.AddWaiter",
                || format!("two waiters for {} on stream {}", waiter.expected(), self.id),
            )?;

            match state.received.get(&waiter.expected()) {
                Some(msg) => Some(msg.clone()),
                None => {
                    state.waiters.insert(txn, Arc::clone(waiter));
                    None
                }
            }
        };

        if let Some(msg) = cached {
            debug!(seq = msg.sequence_number, "matched cached message");
            self.dispatch(Arc::clone(waiter), msg);
        }
        Ok(())
    }

    fn dispatch(&self, waiter: Arc<DeliveryWaiter>, msg: WireMessage) {
        let stream_id = self.id;
        tokio::spawn(async move {
            let seq = msg.sequence_number;
            if let Err(err) = waiter.deliver(msg).await {
                error!(stream = %stream_id, seq, %err, "delivery failed");
                waiter.reject(err);
            }
        });
    }

    /// Accept a message from the session driver
    pub fn message_received(&self, msg: WireMessage) -> Result<()> {
        if msg.is_control() {
            debug!(stream = %self.id, seq = msg.sequence_number, "ignoring control message");
            return Ok(());
        }
        if msg.is_close() {
            self.close_sequence_number.set(msg.sequence_number)?;
        } else if let Some(close) = self.close_sequence_number.get() {
            if msg.sequence_number >= close {
                return Err(diagnostics::violation(
                    "InboundStream.MessageReceived",
                    format!(
                        "stream {} got payload {} at or after close {}",
                        self.id, msg.sequence_number, close
                    ),
                ));
            }
        }

        let matched = {
            let mut state = self.state.lock()?;
            if msg.sequence_number < state.next_to_delete {
                debug!(stream = %self.id, seq = msg.sequence_number, "dropping consumed message");
                return Ok(());
            }
            if msg.is_close() {
                state.close_message = Some(msg.clone());
            }
            state.received.insert(msg.sequence_number, msg.clone());

            let owner = state
                .waiters
                .iter()
                .find(|(_, waiter)| waiter.expected() == msg.sequence_number)
                .map(|(txn, _)| *txn);
            owner.and_then(|txn| state.waiters.remove(&txn))
        };

        if let Some(waiter) = matched {
            self.dispatch(waiter, msg);
        }
        Ok(())
    }

    /// The transaction ended without commit; fail its waiter
    pub fn close_waiter(&self, txn: TransactionId) -> Result<()> {
        let waiter = self.state.lock()?.waiters.remove(&txn);
        match waiter {
            Some(waiter) => waiter.on_transaction_closed(txn),
            None => Ok(()),
        }
    }

    /// Remove the waiter of `txn` only if it still expects `expected`
    pub fn drop_waiter(&self, expected: SequenceNumber, txn: TransactionId) -> Result<bool> {
        let mut state = self.state.lock()?;
        let matches = state
            .waiters
            .get(&txn)
            .is_some_and(|waiter| waiter.expected() == expected);
        if matches {
            state.waiters.remove(&txn);
        }
        Ok(matches)
    }

    /// A receive sequence number of `next` was committed: everything below
    /// it has been consumed.
    pub fn remove_messages(&self, next: SequenceNumber) -> Result<()> {
        {
            let mut state = self.state.lock()?;
            if next > state.next_to_delete {
                state.received = state.received.split_off(&next);
                state.next_to_delete = next;
            }
        }

        if let Ok(context) = self.context() {
            context
                .resources()
                .next_sequence_number_to_delete
                .insert(self.id, next);
        }
        Ok(())
    }

    /// The Closed state was committed; every remaining waiter gets the
    /// close message.
    pub fn inbound_closed(&self) -> Result<()> {
        let (waiters, close) = {
            let mut state = self.state.lock()?;
            state.closed = true;
            let close = match (&state.close_message, self.close_sequence_number.get()) {
                (Some(msg), _) => msg.clone(),
                (None, Some(seq)) => WireMessage::close(self.id, seq),
                (None, None) => {
                    return Err(diagnostics::violation(
                        "InboundStream.Closed",
                        format!("stream {} closed without a close sequence number", self.id),
                    ));
                }
            };
            let waiters: Vec<_> = state.waiters.drain().map(|(_, waiter)| waiter).collect();
            (waiters, close)
        };

        debug!(stream = %self.id, waiters = waiters.len(), "discharging waiters on close");
        for waiter in waiters {
            waiter.discharge(close.clone());
        }
        Ok(())
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(self.state.lock()?.closed)
    }
}

#[async_trait]
impl DeliveryTarget for InboundStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }

    fn close_sequence_number(&self) -> &CloseSequenceNumber {
        &self.close_sequence_number
    }

    async fn persist_close(&self, txn: TransactionId, close: SequenceNumber) -> Result<()> {
        let context = self.context()?;
        let update: BodyUpdate = Box::new(move |current| {
            match current.and_then(ConsolidatedStoreBody::as_metadata) {
                Some(StreamMetadataBody::Inbound(params)) => {
                    let mut params = params.clone();
                    params.state = PersistentStreamState::Closed;
                    params.close_sequence_number = close;
                    Ok(StreamMetadataBody::Inbound(params).into())
                }
                _ => Err(StreamError::ObjectClosed),
            }
        });

        context
            .store()
            .update_with_output(txn, &inbound_key(self.id), update, WaitTimeout::Infinite)
            .await?;
        Ok(())
    }

    fn evict_waiter(&self, expected: SequenceNumber, txn: TransactionId) -> Result<bool> {
        self.drop_waiter(expected, txn)
    }
}
