/// Replica Failover Tests
///
/// Inbound stream admission, demotion while receivers are blocked, and
/// recovery of stream state from the store after re-promotion.
/// Run with: cargo test --test replica_failover_tests
use async_trait::async_trait;
use reliable_stream_core::codec::{
    ConsolidatedStoreKey, InboundStableParameters, MetadataKind, OutboundStableParameters,
    StreamMetadataBody,
};
use reliable_stream_core::{
    ConsolidatedStore, InboundStreamCallback, InvariantPolicy, MemoryStore, PartitionKey,
    PersistentStreamState, ProtocolResponse, ReplicaCoordinator, StreamConfig, StreamError,
    StreamId, WaitTimeout, WireMessage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingCallback {
    accept: bool,
    calls: AtomicUsize,
}

impl CountingCallback {
    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl InboundStreamCallback for CountingCallback {
    async fn inbound_stream_requested(&self, _: &str, _: &PartitionKey, _: StreamId) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

fn coordinator(store: &Arc<MemoryStore>) -> ReplicaCoordinator {
    let config = StreamConfig::new()
        .trace_type("failover-tests")
        .invariant_policy(InvariantPolicy::Propagate);
    let store: Arc<dyn ConsolidatedStore> = Arc::clone(store) as Arc<dyn ConsolidatedStore>;
    ReplicaCoordinator::new(config, store).unwrap()
}

fn partner() -> PartitionKey {
    PartitionKey::numbered("fabric:/app/sender", 0, 15).unwrap()
}

async fn accept(coordinator: &ReplicaCoordinator, name: &str, stream_id: StreamId) -> ProtocolResponse {
    coordinator
        .accept_inbound_stream(partner(), name, stream_id, WaitTimeout::from_millis(1000))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_accept_persists_stream_metadata() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    let callback = CountingCallback::new(true);
    coordinator
        .register_callback_by_prefix("fabric:/streams", callback.clone())
        .unwrap();

    let stream_id = StreamId::new();
    assert_eq!(
        accept(&coordinator, "fabric:/streams/orders", stream_id).await,
        ProtocolResponse::StreamAccepted
    );

    let params = store
        .read_committed(&ConsolidatedStoreKey::metadata(
            stream_id,
            MetadataKind::InboundStableParameters,
        ))
        .unwrap();
    let Some(body) = params else {
        panic!("inbound parameters not persisted");
    };
    match body.as_metadata() {
        Some(StreamMetadataBody::Inbound(params)) => {
            assert_eq!(params.stream_name, "fabric:/streams/orders");
            assert_eq!(params.partner, partner());
            assert_eq!(params.state, PersistentStreamState::Open);
        }
        other => panic!("unexpected body {:?}", other),
    }
    assert!(
        store
            .read_committed(&ConsolidatedStoreKey::name("fabric:/streams/orders", partner()))
            .unwrap()
            .is_some()
    );

    // A repeated open request is answered without asking the callback again
    assert_eq!(
        accept(&coordinator, "fabric:/streams/orders", stream_id).await,
        ProtocolResponse::StreamAccepted
    );
    assert_eq!(callback.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accept_without_callback() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();

    let stream_id = StreamId::new();
    assert_eq!(
        accept(&coordinator, "fabric:/streams/orders", stream_id).await,
        ProtocolResponse::TargetNotAcceptingStreams
    );
    assert!(coordinator.inbound_stream(stream_id).is_none());
    assert_eq!(store.committed_len().unwrap(), 0);
}

#[tokio::test]
async fn test_accept_rejected_by_callback() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(false)).unwrap();

    let stream_id = StreamId::new();
    assert_eq!(
        accept(&coordinator, "fabric:/streams/orders", stream_id).await,
        ProtocolResponse::StreamRejected
    );
    assert!(coordinator.inbound_stream(stream_id).is_none());
    assert_eq!(store.committed_len().unwrap(), 0);
}

#[tokio::test]
async fn test_secondary_refuses_work() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    let stream_id = StreamId::new();

    let result = coordinator
        .accept_inbound_stream(partner(), "fabric:/s", stream_id, WaitTimeout::from_millis(100))
        .await;
    assert_eq!(result, Err(StreamError::NotPrimary));
    assert_eq!(
        coordinator.deliver(stream_id, WireMessage::close(stream_id, 1)),
        Err(StreamError::NotPrimary)
    );
}

#[tokio::test]
async fn test_blocked_receive_released_on_role_loss() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(true)).unwrap();

    let stream_id = StreamId::new();
    accept(&coordinator, "fabric:/streams/orders", stream_id).await;
    let stream = coordinator.inbound_stream(stream_id).unwrap();

    let txn = store.create_transaction().unwrap();
    let receiver = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.receive(txn, WaitTimeout::Infinite).await })
    };
    while stream.pending_waiters().unwrap() == 0 {
        tokio::task::yield_now().await;
    }

    store.revoke_role().unwrap();
    coordinator.change_role_from_primary().await.unwrap();

    assert_eq!(receiver.await.unwrap(), Err(StreamError::NotPrimary));
    assert!(coordinator.inbound_stream(stream_id).is_none());
    assert_eq!(
        stream.receive(txn, WaitTimeout::from_millis(100)).await,
        Err(StreamError::NotPrimary)
    );
    store.dispose(txn);
}

#[tokio::test]
async fn test_demotion_releases_blocked_receive() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(true)).unwrap();

    let stream_id = StreamId::new();
    accept(&coordinator, "fabric:/streams/orders", stream_id).await;
    let stream = coordinator.inbound_stream(stream_id).unwrap();

    let txn = store.create_transaction().unwrap();
    let receiver = {
        let stream = Arc::clone(&stream);
        tokio::spawn(async move { stream.receive(txn, WaitTimeout::Infinite).await })
    };
    while stream.pending_waiters().unwrap() == 0 {
        tokio::task::yield_now().await;
    }

    // Only the role-change notifier runs; the store keeps its role
    coordinator.change_role_from_primary().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(500), receiver)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Err(StreamError::NotPrimary));
    assert_eq!(stream.pending_waiters().unwrap(), 0);
    store.dispose(txn);
}

#[tokio::test]
async fn test_stream_from_previous_epoch_is_not_primary() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(true)).unwrap();

    let stream_id = StreamId::new();
    accept(&coordinator, "fabric:/streams/orders", stream_id).await;
    let stale = coordinator.inbound_stream(stream_id).unwrap();
    assert_eq!(stale.epoch(), coordinator.epoch());

    coordinator.change_role_from_primary().await.unwrap();
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(true)).unwrap();
    coordinator
        .deliver(stream_id, WireMessage::payload(stream_id, 1, &b"one"[..]))
        .unwrap();

    let txn = store.create_transaction().unwrap();
    assert_eq!(
        stale.receive(txn, WaitTimeout::from_millis(200)).await,
        Err(StreamError::NotPrimary)
    );
    assert_eq!(stale.pending_waiters().unwrap(), 0);

    // The rebuilt stream of the current epoch still serves the message
    let rebuilt = coordinator.inbound_stream(stream_id).unwrap();
    assert_eq!(rebuilt.epoch(), coordinator.epoch());
    let msg = rebuilt.receive(txn, WaitTimeout::from_millis(1000)).await.unwrap();
    assert_eq!(msg.sequence_number, 1);
    store.commit(txn).await.unwrap();
}

#[tokio::test]
async fn test_repromotion_rebuilds_streams_from_store() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(true)).unwrap();

    let stream_id = StreamId::new();
    accept(&coordinator, "fabric:/streams/orders", stream_id).await;

    // Consume the first message before failing over
    coordinator
        .deliver(stream_id, WireMessage::payload(stream_id, 1, &b"one"[..]))
        .unwrap();
    let stream = coordinator.inbound_stream(stream_id).unwrap();
    let txn = store.create_transaction().unwrap();
    stream.receive(txn, WaitTimeout::from_millis(1000)).await.unwrap();
    store.commit(txn).await.unwrap();

    store.revoke_role().unwrap();
    coordinator.change_role_from_primary().await.unwrap();
    store.restore_role().unwrap();
    coordinator.change_role_to_primary().await.unwrap();

    let rebuilt = coordinator.inbound_stream(stream_id).unwrap();
    assert!(!Arc::ptr_eq(&rebuilt, &stream));
    assert_eq!(rebuilt.name(), "fabric:/streams/orders");
    assert_eq!(rebuilt.next_sequence_number_to_delete().unwrap(), 2);
    assert_eq!(rebuilt.cached_messages().unwrap(), 0);

    // The sender replays from the last committed position
    coordinator
        .deliver(stream_id, WireMessage::payload(stream_id, 1, &b"one"[..]))
        .unwrap();
    coordinator
        .deliver(stream_id, WireMessage::payload(stream_id, 2, &b"two"[..]))
        .unwrap();
    let txn = store.create_transaction().unwrap();
    let msg = rebuilt.receive(txn, WaitTimeout::from_millis(1000)).await.unwrap();
    assert_eq!(msg.sequence_number, 2);
    store.commit(txn).await.unwrap();
}

#[tokio::test]
async fn test_recovery_skips_deleted_and_restores_outbound() {
    let store = Arc::new(MemoryStore::new());
    let seeded = StreamId::new();
    let deleted = StreamId::new();
    let outbound = StreamId::new();

    {
        let txn = store.create_transaction().unwrap();
        let mut live = InboundStableParameters::new("fabric:/streams/live", partner());
        live.state = PersistentStreamState::Open;
        let mut gone = InboundStableParameters::new("fabric:/streams/gone", partner());
        gone.state = PersistentStreamState::Deleted;
        let mut sending = OutboundStableParameters::new("fabric:/streams/out", partner(), 64);
        sending.state = PersistentStreamState::Closing;
        sending.close_sequence_number = 5;

        let writes = vec![
            (
                ConsolidatedStoreKey::metadata(seeded, MetadataKind::InboundStableParameters),
                StreamMetadataBody::Inbound(live),
            ),
            (
                ConsolidatedStoreKey::metadata(seeded, MetadataKind::ReceiveSequenceNumber),
                StreamMetadataBody::ReceiveSequenceNumber(7),
            ),
            (
                ConsolidatedStoreKey::metadata(deleted, MetadataKind::InboundStableParameters),
                StreamMetadataBody::Inbound(gone),
            ),
            (
                ConsolidatedStoreKey::metadata(outbound, MetadataKind::OutboundStableParameters),
                StreamMetadataBody::Outbound(sending),
            ),
        ];
        for (key, body) in writes {
            store.put(txn, key, body.into(), WaitTimeout::Infinite).await.unwrap();
        }
        store.commit(txn).await.unwrap();
    }

    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();

    let live = coordinator.inbound_stream(seeded).unwrap();
    assert_eq!(live.next_sequence_number_to_delete().unwrap(), 7);
    assert!(coordinator.inbound_stream(deleted).is_none());

    let sender = coordinator.outbound_stream(outbound).unwrap();
    assert_eq!(sender.state(), PersistentStreamState::Closing);
    assert_eq!(sender.close_sequence_number().get(), Some(5));
    assert_eq!(sender.message_quota(), 64);
    assert_eq!(
        coordinator
            .context()
            .resources()
            .next_sequence_number_to_delete
            .get(&seeded)
            .map(|entry| *entry.value()),
        Some(7)
    );
}

#[tokio::test]
async fn test_failed_commit_during_role_loss_keeps_position() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();
    coordinator.set_default_callback(CountingCallback::new(true)).unwrap();

    let stream_id = StreamId::new();
    accept(&coordinator, "fabric:/streams/orders", stream_id).await;
    coordinator
        .deliver(stream_id, WireMessage::payload(stream_id, 1, &b"one"[..]))
        .unwrap();

    let stream = coordinator.inbound_stream(stream_id).unwrap();
    let txn = store.create_transaction().unwrap();
    stream.receive(txn, WaitTimeout::from_millis(1000)).await.unwrap();

    store.revoke_role().unwrap();
    assert_eq!(store.commit(txn).await, Err(StreamError::NotPrimary));

    let receive_key = ConsolidatedStoreKey::metadata(stream_id, MetadataKind::ReceiveSequenceNumber);
    let committed = store.read_committed(&receive_key).unwrap();
    assert_eq!(
        committed.as_ref().and_then(|body| body.as_metadata()),
        Some(&StreamMetadataBody::ReceiveSequenceNumber(1))
    );
    assert_eq!(stream.cached_messages().unwrap(), 1);
}
