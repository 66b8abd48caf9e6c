/// Role Transition Tests
///
/// Primary/secondary gating, recovery handles and coordinator promotion.
/// Run with: cargo test --test role_transition_tests
use reliable_stream_core::core::diagnostics::install_policy;
use reliable_stream_core::{
    ConsolidatedStore, InvariantPolicy, MemoryStore, ReplicaCoordinator, RoleSynchronizer,
    StreamConfig, StreamError, WaitTimeout,
};
use std::sync::Arc;
use std::time::Duration;

fn coordinator(store: &Arc<MemoryStore>) -> ReplicaCoordinator {
    let config = StreamConfig::new()
        .trace_type("role-tests")
        .invariant_policy(InvariantPolicy::Propagate);
    let store: Arc<dyn ConsolidatedStore> = Arc::clone(store) as Arc<dyn ConsolidatedStore>;
    ReplicaCoordinator::new(config, store).unwrap()
}

#[tokio::test]
async fn test_wait_for_recovery_on_secondary_is_not_primary() {
    install_policy(InvariantPolicy::Propagate);
    let role = RoleSynchronizer::new();
    assert!(!role.is_primary().unwrap());
    assert_eq!(role.wait_for_recovery().await, Err(StreamError::NotPrimary));
}

#[tokio::test]
async fn test_demotion_rejects_pending_recovery_waiters() {
    install_policy(InvariantPolicy::Propagate);
    let role = Arc::new(RoleSynchronizer::new());
    role.become_primary().unwrap();

    let waiter = {
        let role = Arc::clone(&role);
        tokio::spawn(async move { role.wait_for_recovery().await })
    };
    tokio::task::yield_now().await;

    role.demote().unwrap();
    assert_eq!(waiter.await.unwrap(), Err(StreamError::NotPrimary));
    assert!(!role.is_primary().unwrap());
}

#[tokio::test]
async fn test_recovered_primary_releases_waiters() {
    install_policy(InvariantPolicy::Propagate);
    let role = Arc::new(RoleSynchronizer::new());
    role.become_primary().unwrap();

    let waiter = {
        let role = Arc::clone(&role);
        tokio::spawn(async move { role.wait_for_recovery().await })
    };
    role.mark_recovered().unwrap();

    assert_eq!(waiter.await.unwrap(), Ok(()));
    assert_eq!(role.wait_for_recovery().await, Ok(()));
}

#[tokio::test]
async fn test_double_become_primary_is_fatal() {
    install_policy(InvariantPolicy::Propagate);
    let role = RoleSynchronizer::new();
    role.become_primary().unwrap();

    let err = role.become_primary().unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_demote_while_secondary_is_fatal() {
    install_policy(InvariantPolicy::Propagate);
    let role = RoleSynchronizer::new();
    assert!(role.demote().unwrap_err().is_fatal());
}

#[tokio::test]
async fn test_late_recovery_result_is_ignored() {
    install_policy(InvariantPolicy::Propagate);
    let role = RoleSynchronizer::new();
    role.become_primary().unwrap();
    role.mark_recovered().unwrap();

    // Losing the race is logged, not an error
    role.mark_recovery_failed(StreamError::Timeout).unwrap();
    assert_eq!(role.wait_for_recovery().await, Ok(()));
}

#[tokio::test]
async fn test_coordinator_promotion_advances_epoch() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    let before = coordinator.epoch();

    let epoch = coordinator.change_role_to_primary().await.unwrap();
    assert!(epoch.generation > before.generation);
    assert_eq!(coordinator.epoch(), epoch);
    assert!(coordinator.is_primary().unwrap());
    coordinator
        .wait_for_operating_state(WaitTimeout::from_millis(100))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_coordinator_demotion_keeps_epoch_and_gates_callers() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    let epoch = coordinator.change_role_to_primary().await.unwrap();

    coordinator.change_role_from_primary().await.unwrap();
    assert_eq!(coordinator.epoch(), epoch);
    assert!(!coordinator.is_primary().unwrap());
    assert_eq!(
        coordinator
            .wait_for_operating_state(WaitTimeout::from_millis(100))
            .await,
        Err(StreamError::NotPrimary)
    );
    assert!(
        coordinator
            .context()
            .resources()
            .pause_stream_sync_points()
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_repromotion_uses_a_fresh_epoch() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);

    let first = coordinator.change_role_to_primary().await.unwrap();
    coordinator.change_role_from_primary().await.unwrap();
    let second = coordinator.change_role_to_primary().await.unwrap();

    assert!(second.generation > first.generation);
    assert_ne!(second.era, first.era);
    assert!(coordinator.is_primary().unwrap());
}

#[tokio::test]
async fn test_promoting_twice_is_fatal() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    coordinator.change_role_to_primary().await.unwrap();

    let err = coordinator.change_role_to_primary().await.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_unreadable_store_fails_recovery() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&store);
    store.set_readable(false).unwrap();

    let err = coordinator.change_role_to_primary().await.unwrap_err();
    assert_eq!(err, StreamError::NotReadable);
    assert!(coordinator.is_primary().unwrap());
    assert_eq!(
        coordinator
            .wait_for_operating_state(WaitTimeout::from_millis(100))
            .await,
        Err(StreamError::NotReadable)
    );
}

#[tokio::test(start_paused = true)]
async fn test_operating_state_wait_times_out_during_recovery() {
    install_policy(InvariantPolicy::Propagate);
    let role = Arc::new(RoleSynchronizer::new());
    role.become_primary().unwrap();

    let outcome =
        tokio::time::timeout(Duration::from_millis(50), role.wait_for_recovery()).await;
    assert!(outcome.is_err());
}

#[test]
fn test_invalid_config_rejected_by_coordinator() {
    let store: Arc<dyn ConsolidatedStore> = Arc::new(MemoryStore::new());
    let config = StreamConfig::new()
        .trace_type(" ")
        .invariant_policy(InvariantPolicy::Propagate);

    let result = ReplicaCoordinator::new(config, store);
    assert!(matches!(result, Err(StreamError::InvalidArgument(_))));
}
