//! Membership change subscriptions.
//!
//! Providers keep a `SubscriberRegistry` of bounded channels and push
//! `MembershipEvent`s into it. Each subscriber owns a `Subscription`, which
//! removes itself from the registry when dropped.

use crate::rpc::ProcessId;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Capacity of each subscriber's event channel.
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// Unique subscriber ID for tracking connected subscribers.
pub type SubscriberId = u64;

/// Notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// The full set of processes now alive.
    Changed(BTreeSet<ProcessId>),
    /// The provider can no longer observe the host.
    Disconnected,
}

/// Registry of subscriber channels.
pub struct SubscriberRegistry {
    subscribers: HashMap<SubscriberId, mpsc::Sender<MembershipEvent>>,
    next_id: SubscriberId,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Create a registry shared between a provider and its subscriptions.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Add a new subscriber channel. Returns the assigned ID.
    pub fn add(&mut self, tx: mpsc::Sender<MembershipEvent>) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(id, tx);
        id
    }

    /// Remove a subscriber by ID.
    pub fn remove(&mut self, id: &SubscriberId) {
        self.subscribers.remove(id);
    }

    /// Get count of active subscribers.
    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    fn senders(&self) -> Vec<(SubscriberId, mpsc::Sender<MembershipEvent>)> {
        self.subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscribe to a shared registry.
pub fn subscribe(registry: &Arc<Mutex<SubscriberRegistry>>) -> Subscription {
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let id = lock(registry).add(tx);
    Subscription {
        id,
        events: rx,
        registry: Arc::downgrade(registry),
    }
}

/// Deliver an event to every subscriber.
///
/// Waits for channel capacity rather than dropping events, so a slow
/// subscriber never misses a full membership update. Subscribers whose
/// receiver has gone away are removed; their IDs are returned.
pub async fn broadcast(
    registry: &Arc<Mutex<SubscriberRegistry>>,
    event: MembershipEvent,
) -> Vec<SubscriberId> {
    let senders = lock(registry).senders();
    let mut failed = Vec::new();

    for (id, tx) in senders {
        if tx.send(event.clone()).await.is_err() {
            failed.push(id);
        }
    }

    if !failed.is_empty() {
        let mut registry = lock(registry);
        for id in &failed {
            registry.remove(id);
        }
    }

    failed
}

fn lock(registry: &Mutex<SubscriberRegistry>) -> std::sync::MutexGuard<'_, SubscriberRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receiving side of a membership subscription.
pub struct Subscription {
    id: SubscriberId,
    events: mpsc::Receiver<MembershipEvent>,
    registry: Weak<Mutex<SubscriberRegistry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the provider has gone away.
    pub async fn recv(&mut self) -> Option<MembershipEvent> {
        self.events.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pids(ids: &[u32]) -> BTreeSet<ProcessId> {
        ids.iter().copied().map(ProcessId).collect()
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let registry = SubscriberRegistry::shared();
        let mut a = subscribe(&registry);
        let mut b = subscribe(&registry);

        let failed = broadcast(&registry, MembershipEvent::Changed(pids(&[1, 2]))).await;
        assert!(failed.is_empty());

        assert_eq!(a.recv().await, Some(MembershipEvent::Changed(pids(&[1, 2]))));
        assert_eq!(b.recv().await, Some(MembershipEvent::Changed(pids(&[1, 2]))));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let registry = SubscriberRegistry::shared();
        let sub = subscribe(&registry);
        let _other = subscribe(&registry);
        assert_eq!(registry.lock().unwrap().count(), 2);

        drop(sub);
        assert_eq!(registry.lock().unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_removed_on_broadcast() {
        let registry = SubscriberRegistry::shared();
        let (tx, rx) = mpsc::channel(1);
        let id = registry.lock().unwrap().add(tx);
        drop(rx);

        let failed = broadcast(&registry, MembershipEvent::Disconnected).await;
        assert_eq!(failed, vec![id]);
        assert_eq!(registry.lock().unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_recv_ends_when_registry_dropped() {
        let registry = SubscriberRegistry::shared();
        let mut sub = subscribe(&registry);
        drop(registry);
        assert_eq!(sub.recv().await, None);
    }
}
