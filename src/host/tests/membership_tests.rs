//! Tests for membership tracking.

use super::*;
use crate::testing::{pids, FakeProvider};
use proptest::prelude::*;
use std::time::Duration;

/// Poll until the tracker's snapshot satisfies `check`.
async fn wait_for(
    tracker: &MembershipTracker,
    check: impl Fn(&HostResult<BTreeSet<ProcessId>>) -> bool,
) {
    for _ in 0..100 {
        if check(&tracker.snapshot()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Tracker never reached expected state: {:?}", tracker.snapshot());
}

#[test]
fn test_change_retains_only_active_ids() {
    let tracker = MembershipTracker::from_snapshot(pids(&[1, 2, 3]));

    tracker.on_membership_changed(&pids(&[2, 3, 4]));

    assert_eq!(tracker.snapshot().unwrap(), pids(&[2, 3]));
}

#[test]
fn test_change_never_adds_ids() {
    let tracker = MembershipTracker::from_snapshot(pids(&[1]));

    tracker.on_membership_changed(&pids(&[1, 5, 6]));

    assert_eq!(tracker.snapshot().unwrap(), pids(&[1]));
}

#[test]
fn test_record_attachable_adds_id() {
    let tracker = MembershipTracker::from_snapshot(pids(&[1]));

    tracker.record_attachable(ProcessId(9));
    assert_eq!(tracker.snapshot().unwrap(), pids(&[1, 9]));

    tracker.on_membership_changed(&pids(&[1]));
    assert_eq!(tracker.snapshot().unwrap(), pids(&[1]));
}

#[test]
fn test_disconnected_snapshot_fails() {
    let tracker = MembershipTracker::from_snapshot(pids(&[1, 2]));

    tracker.on_disconnected();

    assert!(!tracker.is_connected());
    assert_eq!(tracker.snapshot(), Err(HostError::ProviderUnavailable));

    // Later notifications and attaches do not revive it.
    tracker.on_membership_changed(&pids(&[1]));
    tracker.record_attachable(ProcessId(1));
    assert_eq!(tracker.snapshot(), Err(HostError::ProviderUnavailable));
}

#[test]
fn test_concurrent_snapshots_never_torn() {
    let old: BTreeSet<ProcessId> = (0..2000).map(ProcessId).collect();
    let new: BTreeSet<ProcessId> = (0..2000)
        .filter(|p| p % 2 == 0)
        .map(ProcessId)
        .collect();
    let tracker = MembershipTracker::from_snapshot(old.clone());

    std::thread::scope(|scope| {
        let readers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..200)
                        .map(|_| tracker.snapshot().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        scope.spawn(|| tracker.on_membership_changed(&new));

        for reader in readers {
            for seen in reader.join().unwrap() {
                assert!(
                    seen == old || seen == new,
                    "Observed a partially updated set of {} ids",
                    seen.len()
                );
            }
        }
    });

    assert_eq!(tracker.snapshot().unwrap(), new);
}

#[tokio::test]
async fn test_start_seeds_from_provider() {
    let provider = FakeProvider::with_processes(&[10, 11]);

    let tracker = MembershipTracker::start(&provider).unwrap();

    assert_eq!(tracker.snapshot().unwrap(), pids(&[10, 11]));
    assert_eq!(provider.subscriber_count(), 1);
}

#[tokio::test]
async fn test_provider_notifications_are_applied() {
    let provider = FakeProvider::with_processes(&[10, 11, 12]);
    let tracker = MembershipTracker::start(&provider).unwrap();

    provider.notify(&[10, 12, 13]).await;
    wait_for(&tracker, |s| s.as_ref().ok() == Some(&pids(&[10, 12]))).await;

    provider.notify(&[12]).await;
    wait_for(&tracker, |s| s.as_ref().ok() == Some(&pids(&[12]))).await;
}

#[tokio::test]
async fn test_provider_disconnect_is_applied() {
    let provider = FakeProvider::with_processes(&[10]);
    let tracker = MembershipTracker::start(&provider).unwrap();

    provider.disconnect().await;

    wait_for(&tracker, |s| s == &Err(HostError::ProviderUnavailable)).await;
}

#[tokio::test]
async fn test_drop_unsubscribes_from_provider() {
    let provider = FakeProvider::with_processes(&[10]);
    let tracker = MembershipTracker::start(&provider).unwrap();
    assert_eq!(provider.subscriber_count(), 1);

    drop(tracker);

    // Aborting the listener drops its subscription on the runtime.
    for _ in 0..100 {
        if provider.subscriber_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Subscription leaked after tracker drop");
}

proptest! {
    #[test]
    fn prop_snapshot_is_previous_intersect_active(
        initial in proptest::collection::btree_set(0u32..64, 0..32),
        notifications in proptest::collection::vec(
            proptest::collection::btree_set(0u32..64, 0..32),
            1..16,
        ),
    ) {
        let initial: BTreeSet<ProcessId> = initial.into_iter().map(ProcessId).collect();
        let tracker = MembershipTracker::from_snapshot(initial);

        for active in notifications {
            let active: BTreeSet<ProcessId> = active.into_iter().map(ProcessId).collect();
            let before = tracker.snapshot().unwrap();

            tracker.on_membership_changed(&active);
            let after = tracker.snapshot().unwrap();

            let expected: BTreeSet<ProcessId> = before.intersection(&active).copied().collect();
            prop_assert_eq!(&after, &expected);
            prop_assert!(after.iter().all(|pid| active.contains(pid)));
        }
    }

    #[test]
    fn prop_snapshot_equals_active_when_notifications_shrink(
        initial in proptest::collection::btree_set(0u32..64, 0..32),
        keep in proptest::collection::vec(any::<bool>(), 64),
    ) {
        let initial: BTreeSet<ProcessId> = initial.into_iter().map(ProcessId).collect();
        let tracker = MembershipTracker::from_snapshot(initial.clone());

        let active: BTreeSet<ProcessId> = initial
            .iter()
            .copied()
            .filter(|pid| keep[pid.as_u32() as usize])
            .collect();
        tracker.on_membership_changed(&active);

        prop_assert_eq!(tracker.snapshot().unwrap(), active);
    }
}

/// Local provider whose only process exits right after the seed scan.
struct ExitsAfterSeed {
    inner: crate::provider::LocalProvider,
    perfdata: std::path::PathBuf,
}

impl InstrumentationProvider for ExitsAfterSeed {
    fn current_members(&self) -> Result<BTreeSet<ProcessId>, ProviderError> {
        let members = self.inner.current_members()?;
        let _ = std::fs::remove_file(&self.perfdata);
        Ok(members)
    }

    fn resolve(
        &self,
        key: &crate::provider::LookupKey,
    ) -> Result<Box<dyn crate::provider::BufferHandle>, ProviderError> {
        self.inner.resolve(key)
    }

    fn subscribe(&self) -> Subscription {
        self.inner.subscribe()
    }
}

#[tokio::test]
async fn test_process_exiting_during_start_is_purged() {
    use crate::provider::perfdata::{PERFDATA_DIR_PREFIX, PERFDATA_MAGIC};

    let root = tempfile::TempDir::new().unwrap();
    let dir = root.path().join(format!("{}tester", PERFDATA_DIR_PREFIX));
    std::fs::create_dir_all(&dir).unwrap();
    let pid = std::process::id();
    let perfdata = dir.join(pid.to_string());
    std::fs::write(&perfdata, PERFDATA_MAGIC.to_be_bytes()).unwrap();

    let provider = ExitsAfterSeed {
        inner: crate::provider::LocalProvider::for_host(root.path(), Duration::from_millis(20)),
        perfdata,
    };
    let tracker = MembershipTracker::start(&provider).unwrap();
    assert_eq!(tracker.snapshot().unwrap(), pids(&[pid]));

    wait_for(&tracker, |s| s.as_ref().is_ok_and(|m| m.is_empty())).await;
}
