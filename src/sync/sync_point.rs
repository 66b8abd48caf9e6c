// ============================================================================
// Keyed Sync Point
// ============================================================================
//
// A per-key async critical section. The shared collection maps each key to
// the release signal of its current occupant. Entering means winning the
// vacant slot; losers await the occupant's signal (bounded by the remaining
// timeout), re-check the epoch and try again.
//
// There is no FIFO ordering between waiters: whichever retry reaches the
// vacant slot first wins it.
//
// ============================================================================

use super::completion::Completion;
use super::epoch::EpochClock;
use super::timeout::{WaitTimeout, wait_with_delay};
use crate::core::{Result, RoleEpoch, StreamError, diagnostics};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Occupancy map shared by every sync point over one key space
pub type SyncPointCollection<K> = Arc<DashMap<K, Completion<()>>>;

pub fn new_collection<K>() -> SyncPointCollection<K>
where
    K: Eq + Hash,
{
    Arc::new(DashMap::new())
}

pub struct SyncPoint<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
{
    key: K,
    captured: RoleEpoch,
    clock: Arc<EpochClock>,
    collection: SyncPointCollection<K>,
    held: Option<Completion<()>>,
}

impl<K> SyncPoint<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
{
    /// Bind a sync point to `key` in `collection`.
    ///
    /// Fails with `NotPrimary` when the collection has been discarded or
    /// `captured` is no longer the clock's epoch.
    pub fn new(
        clock: &Arc<EpochClock>,
        captured: RoleEpoch,
        key: K,
        collection: Option<SyncPointCollection<K>>,
    ) -> Result<Self> {
        let Some(collection) = collection else {
            debug!(?key, "sync point collection unavailable");
            return Err(StreamError::NotPrimary);
        };

        if !clock.is_current(&captured) {
            debug!(?key, %captured, current = %clock.current(), "stale epoch at sync point creation");
            return Err(StreamError::NotPrimary);
        }

        Ok(Self {
            key,
            captured,
            clock: Arc::clone(clock),
            collection,
            held: None,
        })
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    pub async fn enter(&mut self, timeout: WaitTimeout) -> Result<()> {
        diagnostics::ensure(self.held.is_none(), "SyncPoint.Enter", || {
            format!("{:?} entered twice by the same holder", self.key)
        })?;

        let mut remaining = timeout;

        loop {
            if !self.clock.is_current(&self.captured) {
                debug!(key = ?self.key, %self.captured, "epoch changed while entering sync point");
                return Err(StreamError::ObjectClosed);
            }

            let occupant = match self.collection.entry(self.key.clone()) {
                Entry::Vacant(slot) => {
                    let signal = Completion::new();
                    slot.insert(signal.clone());
                    self.held = Some(signal);
                    return Ok(());
                }
                Entry::Occupied(slot) => slot.get().clone(),
            };

            let before = Instant::now();
            if wait_with_delay(remaining, occupant.wait()).await.is_none() {
                debug!(key = ?self.key, "timed out waiting for sync point");
                return Err(StreamError::Timeout);
            }
            remaining = remaining.remaining(before, Instant::now());
        }
    }

    /// Leave the critical section and wake everything waiting on it.
    /// A no-op when the section is not held.
    pub fn release(&mut self) -> Result<()> {
        let Some(signal) = self.held.take() else {
            return Ok(());
        };

        let removed = self
            .collection
            .remove_if(&self.key, |_, occupant| occupant.ptr_eq(&signal));

        signal.try_set_value(());

        diagnostics::ensure(removed.is_some(), "SyncPoint.Release", || {
            format!("{:?} released by a holder that was not the occupant", self.key)
        })
    }
}

impl<K> Drop for SyncPoint<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
{
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    fn primary_clock() -> (Arc<EpochClock>, RoleEpoch) {
        let clock = Arc::new(EpochClock::new());
        let epoch = clock.advance();
        (clock, epoch)
    }

    #[tokio::test]
    async fn test_enter_and_release() {
        let (clock, epoch) = primary_clock();
        let collection = new_collection::<u64>();

        let mut sync_point = SyncPoint::new(&clock, epoch, 7, Some(collection.clone())).unwrap();
        sync_point.enter(WaitTimeout::Infinite).await.unwrap();
        assert!(sync_point.is_held());
        assert!(collection.contains_key(&7));

        sync_point.release().unwrap();
        assert!(!collection.contains_key(&7));
        sync_point.release().unwrap();
    }

    #[tokio::test]
    async fn test_second_holder_waits_until_release() {
        let (clock, epoch) = primary_clock();
        let collection = new_collection::<&'static str>();

        let mut first = SyncPoint::new(&clock, epoch, "k", Some(collection.clone())).unwrap();
        let mut second = SyncPoint::new(&clock, epoch, "k", Some(collection.clone())).unwrap();
        first.enter(WaitTimeout::Infinite).await.unwrap();

        {
            let mut entering = task::spawn(second.enter(WaitTimeout::Infinite));
            assert_pending!(entering.poll());

            first.release().unwrap();
            assert!(entering.is_woken());
            assert_ready!(entering.poll()).unwrap();
        }
        assert!(second.is_held());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let (clock, epoch) = primary_clock();
        let collection = new_collection::<u64>();

        let mut a = SyncPoint::new(&clock, epoch, 1, Some(collection.clone())).unwrap();
        let mut b = SyncPoint::new(&clock, epoch, 2, Some(collection.clone())).unwrap();
        a.enter(WaitTimeout::from_millis(10)).await.unwrap();
        b.enter(WaitTimeout::from_millis(10)).await.unwrap();
        assert_eq!(collection.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_occupant_untouched() {
        let (clock, epoch) = primary_clock();
        let collection = new_collection::<u64>();

        let mut holder = SyncPoint::new(&clock, epoch, 1, Some(collection.clone())).unwrap();
        holder.enter(WaitTimeout::Infinite).await.unwrap();

        let mut late = SyncPoint::new(&clock, epoch, 1, Some(collection.clone())).unwrap();
        let result = late.enter(WaitTimeout::After(Duration::from_millis(100))).await;
        assert_eq!(result, Err(StreamError::Timeout));
        assert!(!late.is_held());

        drop(late);
        assert!(collection.contains_key(&1));
        holder.release().unwrap();
        assert!(collection.is_empty());
    }

    #[test]
    fn test_stale_epoch_fails_construction() {
        let (clock, epoch) = primary_clock();
        clock.advance();
        let result = SyncPoint::new(&clock, epoch, 1u64, Some(new_collection()));
        assert!(matches!(result, Err(StreamError::NotPrimary)));
    }

    #[test]
    fn test_missing_collection_fails_construction() {
        let (clock, epoch) = primary_clock();
        let result = SyncPoint::<u64>::new(&clock, epoch, 1, None);
        assert!(matches!(result, Err(StreamError::NotPrimary)));
    }

    #[tokio::test]
    async fn test_epoch_change_mid_wait_reports_object_closed() {
        let (clock, epoch) = primary_clock();
        let collection = new_collection::<u64>();

        let mut holder = SyncPoint::new(&clock, epoch, 3, Some(collection.clone())).unwrap();
        holder.enter(WaitTimeout::Infinite).await.unwrap();

        let mut waiter = SyncPoint::new(&clock, epoch, 3, Some(collection.clone())).unwrap();
        let mut entering = task::spawn(waiter.enter(WaitTimeout::Infinite));
        assert_pending!(entering.poll());

        clock.advance();
        holder.release().unwrap();
        assert_eq!(assert_ready!(entering.poll()), Err(StreamError::ObjectClosed));
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let (clock, epoch) = primary_clock();
        let collection = new_collection::<u64>();
        {
            let mut sync_point = SyncPoint::new(&clock, epoch, 9, Some(collection.clone())).unwrap();
            sync_point.enter(WaitTimeout::Infinite).await.unwrap();
        }
        assert!(collection.is_empty());
    }
}
