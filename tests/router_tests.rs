/// Router Tests
///
/// Longest-prefix dispatch of inbound stream requests to acceptance callbacks.
/// Run with: cargo test --test router_tests
use async_trait::async_trait;
use reliable_stream_core::{
    InboundStreamCallback, PartitionKey, PrefixCallbackRouter, StreamError, StreamId,
};
use std::sync::Arc;

struct Labeled(&'static str);

#[async_trait]
impl InboundStreamCallback for Labeled {
    async fn inbound_stream_requested(&self, _: &str, _: &PartitionKey, _: StreamId) -> bool {
        self.0 != "reject"
    }
}

fn callback(label: &'static str) -> Arc<dyn InboundStreamCallback> {
    Arc::new(Labeled(label))
}

fn same(a: &Arc<dyn InboundStreamCallback>, b: &Arc<dyn InboundStreamCallback>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[test]
fn test_longest_prefix_wins() {
    let router = PrefixCallbackRouter::new();
    let a = callback("a");
    let ab = callback("ab");
    let abc = callback("abc");

    router.add_prefix("/ab", Arc::clone(&ab)).unwrap();
    router.add_prefix("/abc", Arc::clone(&abc)).unwrap();
    router.add_prefix("/a", Arc::clone(&a)).unwrap();

    assert!(same(&router.lookup("/abcd").unwrap().unwrap(), &abc));
    assert!(same(&router.lookup("/abx").unwrap().unwrap(), &ab));
    assert!(same(&router.lookup("/a").unwrap().unwrap(), &a));
    assert_eq!(router.prefixes().unwrap(), vec!["/abc", "/ab", "/a"]);
}

#[test]
fn test_equal_length_prefixes_sorted_ordinally() {
    let router = PrefixCallbackRouter::new();
    router.add_prefix("fabric:/b", callback("b")).unwrap();
    router.add_prefix("fabric:/a", callback("a")).unwrap();
    router.add_prefix("fabric:/c", callback("c")).unwrap();

    assert_eq!(
        router.prefixes().unwrap(),
        vec!["fabric:/a", "fabric:/b", "fabric:/c"]
    );
}

#[test]
fn test_unmatched_name_falls_back_to_default() {
    let router = PrefixCallbackRouter::new();
    router.add_prefix("/a", callback("a")).unwrap();
    assert!(router.lookup("/x").unwrap().is_none());

    let fallback = callback("default");
    router.set_default(Arc::clone(&fallback)).unwrap();
    assert!(same(&router.lookup("/x").unwrap().unwrap(), &fallback));
    assert!(router.has_default().unwrap());
}

#[test]
fn test_invalid_and_duplicate_prefixes() {
    let router = PrefixCallbackRouter::new();
    assert_eq!(
        router.add_prefix("relative/path", callback("a")).unwrap_err(),
        StreamError::InvalidPrefix("relative/path".to_string())
    );

    router.add_prefix("fabric:/orders", callback("a")).unwrap();
    assert_eq!(
        router.add_prefix("fabric:/orders", callback("b")).unwrap_err(),
        StreamError::DuplicatePrefix("fabric:/orders".to_string())
    );
}

#[test]
fn test_default_callback_conflict() {
    let router = PrefixCallbackRouter::new();
    let first = callback("first");
    router.set_default(Arc::clone(&first)).unwrap();

    // Re-installing the same callback is fine
    router.set_default(Arc::clone(&first)).unwrap();
    assert_eq!(
        router.set_default(callback("second")).unwrap_err(),
        StreamError::DefaultCallbackConflict
    );
}

#[test]
fn test_clear_drops_routes_and_default() {
    let router = PrefixCallbackRouter::new();
    router.add_prefix("/a", callback("a")).unwrap();
    router.set_default(callback("default")).unwrap();

    router.clear().unwrap();
    assert!(router.prefixes().unwrap().is_empty());
    assert!(!router.has_default().unwrap());
    assert!(router.lookup("/a").unwrap().is_none());

    // Prefixes can be registered again after clear
    router.add_prefix("/a", callback("a")).unwrap();
}

#[tokio::test]
async fn test_matched_callback_decides() {
    let router = PrefixCallbackRouter::new();
    router.add_prefix("fabric:/streams/refused", callback("reject")).unwrap();
    router.set_default(callback("accept")).unwrap();
    let partner = PartitionKey::singleton("fabric:/app/peer").unwrap();

    let refused = router.lookup("fabric:/streams/refused/1").unwrap().unwrap();
    assert!(
        !refused
            .inbound_stream_requested("fabric:/streams/refused/1", &partner, StreamId::new())
            .await
    );

    let accepted = router.lookup("fabric:/streams/other").unwrap().unwrap();
    assert!(
        accepted
            .inbound_stream_requested("fabric:/streams/other", &partner, StreamId::new())
            .await
    );
}
