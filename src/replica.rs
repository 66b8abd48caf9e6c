// ============================================================================
// Replica Coordinator
// ============================================================================
//
// Target of the role-change notifier and entry point for the session
// driver. Owns the replica context shared (weakly) by every live stream:
//
//   change_role_to_primary   advance epoch -> gate Primary -> reset registry
//                            -> rebuild streams from the store -> recovered
//   change_role_from_primary gate Secondary -> clear registry
//
// Both transitions run under one unkeyed sync point. Store commit and
// abort notifications are forwarded to the inbound streams that received
// under the finished transaction.
//
// ============================================================================

use crate::codec::{
    ConsolidatedStoreBody, ConsolidatedStoreKey, InboundStableParameters, MetadataKind,
    OutboundStableParameters, StoreKind, StreamMetadataBody, StreamNameBody,
};
use crate::core::{
    FIRST_MESSAGE_SEQUENCE_NUMBER, PersistentStreamState, ProtocolResponse, Result, RoleEpoch,
    SequenceNumber, StreamConfig, StreamError, StreamId, diagnostics,
};
use crate::delivery::{InboundStream, OutboundStream, WireMessage};
use crate::partition::PartitionKey;
use crate::registry::{InboundStreamCallback, RuntimeResources};
use crate::role::RoleSynchronizer;
use crate::store::{ConsolidatedStore, StoreChange, StoreListener};
use crate::sync::{EpochClock, SingularSyncPoint, WaitTimeout, wait_with_delay};
use crate::transaction::TransactionId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// State shared by the coordinator and every stream it owns
pub struct ReplicaContext {
    config: StreamConfig,
    store: Arc<dyn ConsolidatedStore>,
    resources: RuntimeResources,
    role: RoleSynchronizer,
    change_role: SingularSyncPoint,
}

impl ReplicaContext {
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ConsolidatedStore> {
        &self.store
    }

    pub fn resources(&self) -> &RuntimeResources {
        &self.resources
    }

    pub fn role(&self) -> &RoleSynchronizer {
        &self.role
    }

    /// Wait until this replica is a recovered primary
    pub async fn wait_for_operating_state(&self, timeout: WaitTimeout) -> Result<()> {
        match wait_with_delay(timeout, self.role.wait_for_recovery()).await {
            Some(outcome) => outcome,
            None => Err(StreamError::Timeout),
        }
    }

    fn inbound_stream(&self, stream_id: &StreamId) -> Option<Arc<InboundStream>> {
        self.resources
            .inbound_streams
            .get(stream_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

fn metadata_key(stream_id: StreamId, kind: MetadataKind) -> ConsolidatedStoreKey {
    ConsolidatedStoreKey::metadata(stream_id, kind)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoverySummary {
    pub inbound: usize,
    pub outbound: usize,
}

pub struct ReplicaCoordinator {
    context: Arc<ReplicaContext>,
}

impl ReplicaCoordinator {
    pub fn new(config: StreamConfig, store: Arc<dyn ConsolidatedStore>) -> Result<Self> {
        config.validate().map_err(StreamError::InvalidArgument)?;
        diagnostics::install_policy(config.invariant_policy);

        let context = Arc::new(ReplicaContext {
            resources: RuntimeResources::new(Arc::new(EpochClock::new())),
            role: RoleSynchronizer::new(),
            change_role: SingularSyncPoint::new("ChangeRole"),
            store: Arc::clone(&store),
            config,
        });

        store.register_listener(Arc::new(StoreEventForwarder {
            context: Arc::downgrade(&context),
        }));

        Ok(Self { context })
    }

    pub fn context(&self) -> &Arc<ReplicaContext> {
        &self.context
    }

    pub fn epoch(&self) -> RoleEpoch {
        self.context.resources.clock().current()
    }

    pub fn is_primary(&self) -> Result<bool> {
        self.context.role.is_primary()
    }

    pub async fn change_role_to_primary(&self) -> Result<RoleEpoch> {
        let span = info_span!("change_role", trace_type = %self.context.config.trace_type, to = "primary");
        async {
            self.context.change_role.enter().await?;
            let outcome = self.promote().await;
            self.context.change_role.leave()?;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn promote(&self) -> Result<RoleEpoch> {
        let context = &self.context;
        let epoch = context.resources.clock().advance();
        info!(%epoch, "changing role to primary");

        context.role.become_primary()?;
        context.resources.reset()?;

        let recovered = match wait_with_delay(
            WaitTimeout::After(context.config.recovery_timeout),
            self.recover(),
        )
        .await
        {
            Some(outcome) => outcome,
            None => Err(StreamError::Timeout),
        };

        match recovered {
            Ok(summary) => {
                info!(inbound = summary.inbound, outbound = summary.outbound, "recovery completed");
                context.role.mark_recovered()?;
                Ok(epoch)
            }
            Err(err) => {
                warn!(%err, "recovery failed");
                context.role.mark_recovery_failed(err.clone())?;
                Err(err)
            }
        }
    }

    /// Rebuild live stream objects from the persisted metadata
    async fn recover(&self) -> Result<RecoverySummary> {
        let store = self.context.store();
        let txn = store.create_read_only_transaction()?;
        let scanned = store.scan(txn, StoreKind::Metadata).await;
        store.dispose(txn);

        let mut receive_next: HashMap<StreamId, SequenceNumber> = HashMap::new();
        let mut inbound: Vec<(StreamId, InboundStableParameters)> = Vec::new();
        let mut outbound: Vec<(StreamId, OutboundStableParameters)> = Vec::new();

        for (key, body) in scanned? {
            let (ConsolidatedStoreKey::Metadata(key), ConsolidatedStoreBody::Metadata(body)) = (key, body) else {
                return Err(diagnostics::violation(
                    "ReplicaCoordinator.Recover",
                    "metadata scan returned a non-metadata entry",
                ));
            };
            match body {
                StreamMetadataBody::Inbound(params) => inbound.push((key.stream_id, params)),
                StreamMetadataBody::Outbound(params) => outbound.push((key.stream_id, params)),
                StreamMetadataBody::ReceiveSequenceNumber(next) => {
                    receive_next.insert(key.stream_id, next);
                }
                StreamMetadataBody::SendSequenceNumber(_)
                | StreamMetadataBody::DeleteSequenceNumber(_) => {}
            }
        }

        let resources = &self.context.resources;
        let epoch = resources.clock().current();
        let mut summary = RecoverySummary::default();

        for (stream_id, params) in inbound {
            if params.state == PersistentStreamState::Deleted {
                continue;
            }
            let next = receive_next
                .get(&stream_id)
                .copied()
                .unwrap_or(FIRST_MESSAGE_SEQUENCE_NUMBER);
            let stream =
                InboundStream::new(stream_id, &params, next, epoch, Arc::downgrade(&self.context));
            resources.inbound_streams.insert(stream_id, stream);
            resources.next_sequence_number_to_delete.insert(stream_id, next);
            summary.inbound += 1;
        }

        for (stream_id, params) in outbound {
            if params.state == PersistentStreamState::Deleted {
                continue;
            }
            resources
                .outbound_streams
                .insert(stream_id, Arc::new(OutboundStream::new(stream_id, &params)));
            summary.outbound += 1;
        }

        Ok(summary)
    }

    pub async fn change_role_from_primary(&self) -> Result<()> {
        let span = info_span!("change_role", trace_type = %self.context.config.trace_type, to = "secondary");
        async {
            self.context.change_role.enter().await?;
            info!(epoch = %self.epoch(), "changing role from primary");
            let outcome = self
                .context
                .role
                .demote()
                .and_then(|_| self.context.resources.clear());
            self.context.change_role.leave()?;
            outcome
        }
        .instrument(span)
        .await
    }

    pub async fn wait_for_operating_state(&self, timeout: WaitTimeout) -> Result<()> {
        self.context.wait_for_operating_state(timeout).await
    }

    pub fn register_callback_by_prefix(
        &self,
        prefix: &str,
        callback: Arc<dyn InboundStreamCallback>,
    ) -> Result<()> {
        self.context.resources.router.add_prefix(prefix, callback)
    }

    pub fn set_default_callback(&self, callback: Arc<dyn InboundStreamCallback>) -> Result<()> {
        self.context.resources.router.set_default(callback)
    }

    pub fn inbound_stream(&self, stream_id: StreamId) -> Option<Arc<InboundStream>> {
        self.context.inbound_stream(&stream_id)
    }

    pub fn outbound_stream(&self, stream_id: StreamId) -> Option<Arc<OutboundStream>> {
        self.context
            .resources
            .outbound_streams
            .get(&stream_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Decide an inbound open request from `partner`.
    pub async fn accept_inbound_stream(
        &self,
        partner: PartitionKey,
        stream_name: &str,
        stream_id: StreamId,
        timeout: WaitTimeout,
    ) -> Result<ProtocolResponse> {
        timeout.validate(self.context.config.max_wait_timeout)?;
        let started = Instant::now();

        self.wait_for_operating_state(timeout).await?;

        let mut pause = self.context.resources.pause_stream_sync_point(stream_id)?;
        pause.enter(timeout.remaining(started, Instant::now())).await?;
        let outcome = self
            .accept_under_pause(
                &partner,
                stream_name,
                stream_id,
                timeout.remaining(started, Instant::now()),
            )
            .await;
        pause.release()?;
        outcome
    }

    async fn accept_under_pause(
        &self,
        partner: &PartitionKey,
        stream_name: &str,
        stream_id: StreamId,
        timeout: WaitTimeout,
    ) -> Result<ProtocolResponse> {
        if self.context.resources.inbound_streams.contains_key(&stream_id) {
            return Ok(ProtocolResponse::StreamAccepted);
        }

        let store = self.context.store();
        let txn = store.create_transaction()?;
        let (response, admitted) = match self
            .admit(txn, partner, stream_name, stream_id, timeout)
            .await
        {
            Ok(decision) => decision,
            Err(err) => {
                store.dispose(txn);
                return Err(err);
            }
        };

        match admitted {
            Some((params, next)) => {
                store.commit(txn).await?;
                let stream = InboundStream::new(
                    stream_id,
                    &params,
                    next,
                    self.epoch(),
                    Arc::downgrade(&self.context),
                );
                let resources = &self.context.resources;
                resources.inbound_streams.insert(stream_id, stream);
                resources.next_sequence_number_to_delete.insert(stream_id, next);
                info!(stream = %stream_id, name = stream_name, %partner, "inbound stream accepted");
            }
            None => {
                store.abort(txn).await?;
                debug!(stream = %stream_id, name = stream_name, ?response, "inbound stream refused");
            }
        }
        Ok(response)
    }

    async fn admit(
        &self,
        txn: TransactionId,
        partner: &PartitionKey,
        stream_name: &str,
        stream_id: StreamId,
        timeout: WaitTimeout,
    ) -> Result<(ProtocolResponse, Option<(InboundStableParameters, SequenceNumber)>)> {
        let store = self.context.store();

        let existing = store
            .get(txn, &metadata_key(stream_id, MetadataKind::InboundStableParameters))
            .await?;
        if let Some(ConsolidatedStoreBody::Metadata(StreamMetadataBody::Inbound(params))) = existing {
            let next = store
                .get(txn, &metadata_key(stream_id, MetadataKind::ReceiveSequenceNumber))
                .await?
                .as_ref()
                .and_then(ConsolidatedStoreBody::as_metadata)
                .and_then(StreamMetadataBody::sequence_number)
                .unwrap_or(FIRST_MESSAGE_SEQUENCE_NUMBER);
            return Ok((ProtocolResponse::StreamAccepted, Some((params, next))));
        }

        let Some(callback) = self.context.resources.router.lookup(stream_name)? else {
            return Ok((ProtocolResponse::TargetNotAcceptingStreams, None));
        };
        if !callback
            .inbound_stream_requested(stream_name, partner, stream_id)
            .await
        {
            return Ok((ProtocolResponse::StreamRejected, None));
        }

        let mut params = InboundStableParameters::new(stream_name, partner.clone());
        params.state = PersistentStreamState::Open;

        store
            .put(
                txn,
                metadata_key(stream_id, MetadataKind::InboundStableParameters),
                StreamMetadataBody::Inbound(params.clone()).into(),
                timeout,
            )
            .await?;
        store
            .put(
                txn,
                metadata_key(stream_id, MetadataKind::ReceiveSequenceNumber),
                StreamMetadataBody::ReceiveSequenceNumber(FIRST_MESSAGE_SEQUENCE_NUMBER).into(),
                timeout,
            )
            .await?;
        store
            .put(
                txn,
                ConsolidatedStoreKey::name(stream_name, partner.clone()),
                ConsolidatedStoreBody::Name(StreamNameBody { stream_id }),
                timeout,
            )
            .await?;

        Ok((
            ProtocolResponse::StreamAccepted,
            Some((params, FIRST_MESSAGE_SEQUENCE_NUMBER)),
        ))
    }

    /// Hand a message from the session driver to its inbound stream.
    /// Returns `false` when no such stream is live on this replica.
    pub fn deliver(&self, stream_id: StreamId, msg: WireMessage) -> Result<bool> {
        if !self.context.role.is_primary()? {
            return Err(StreamError::NotPrimary);
        }

        match self.context.inbound_stream(&stream_id) {
            Some(stream) => {
                stream.message_received(msg)?;
                Ok(true)
            }
            None => {
                debug!(stream = %stream_id, seq = msg.sequence_number, "message for unknown stream");
                Ok(false)
            }
        }
    }
}

/// Forwards store outcomes to the inbound streams of the finished
/// transaction.
struct StoreEventForwarder {
    context: Weak<ReplicaContext>,
}

impl StoreListener for StoreEventForwarder {
    fn on_committed(&self, txn: TransactionId, changes: &[StoreChange]) {
        let Some(context) = self.context.upgrade() else {
            return;
        };

        for (key, body) in changes {
            let (ConsolidatedStoreKey::Metadata(key), Some(ConsolidatedStoreBody::Metadata(body))) =
                (key, body)
            else {
                continue;
            };
            let Some(stream) = context.inbound_stream(&key.stream_id) else {
                continue;
            };

            let forwarded = match body {
                StreamMetadataBody::ReceiveSequenceNumber(next) => stream.remove_messages(*next),
                StreamMetadataBody::Inbound(params) if params.state == PersistentStreamState::Closed => {
                    stream.inbound_closed()
                }
                _ => Ok(()),
            };
            if let Err(err) = forwarded {
                error!(txn = %txn, stream = %key.stream_id, %err, "commit notification failed");
            }
        }

        context.resources.take_active_inbound(txn);
    }

    fn on_aborted(&self, txn: TransactionId) {
        let Some(context) = self.context.upgrade() else {
            return;
        };

        for stream_id in context.resources.take_active_inbound(txn) {
            if let Some(stream) = context.inbound_stream(&stream_id) {
                if let Err(err) = stream.close_waiter(txn) {
                    error!(txn = %txn, stream = %stream_id, %err, "abort notification failed");
                }
            }
        }
    }
}
