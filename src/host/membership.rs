//! Membership tracking for the local host.
//!
//! The tracker holds the set of processes currently believed alive. It is
//! seeded from the provider's full snapshot and then reconciled against each
//! change notification by retaining only the ids the provider still reports.
//! Notifications are consumed by a tracker-owned task reading the provider
//! subscription, so updates are applied by a single writer at a time.

use crate::provider::{InstrumentationProvider, MembershipEvent, ProviderError, Subscription};
use crate::rpc::{HostError, HostResult, ProcessId};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

#[derive(Debug)]
enum Membership {
    Live(BTreeSet<ProcessId>),
    Disconnected,
}

/// Shared membership state.
#[derive(Debug)]
struct TrackerState {
    members: Mutex<Membership>,
}

impl TrackerState {
    fn lock(&self) -> MutexGuard<'_, Membership> {
        self.members.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn snapshot(&self) -> HostResult<BTreeSet<ProcessId>> {
        match &*self.lock() {
            Membership::Live(members) => Ok(members.clone()),
            Membership::Disconnected => Err(HostError::ProviderUnavailable),
        }
    }

    fn retain_active(&self, active: &BTreeSet<ProcessId>) {
        if let Membership::Live(members) = &mut *self.lock() {
            members.retain(|pid| active.contains(pid));
        }
    }

    fn insert(&self, pid: ProcessId) {
        if let Membership::Live(members) = &mut *self.lock() {
            members.insert(pid);
        }
    }

    fn disconnect(&self) {
        *self.lock() = Membership::Disconnected;
    }
}

/// Live set of instrumented processes on this host.
pub struct MembershipTracker {
    state: Arc<TrackerState>,
    listener: Option<JoinHandle<()>>,
}

impl MembershipTracker {
    /// Seed from the provider's current members and follow its notifications.
    ///
    /// Subscribes before taking the seed so that a process exiting between
    /// the two is still reported by a later notification.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(provider: &dyn InstrumentationProvider) -> Result<Self, ProviderError> {
        let subscription = provider.subscribe();
        let initial = provider.current_members()?;
        let state = Arc::new(TrackerState {
            members: Mutex::new(Membership::Live(initial)),
        });

        tracing::info!(
            "[membership] tracking {} instrumented processes",
            state.snapshot().map(|s| s.len()).unwrap_or(0)
        );

        let listener = tokio::spawn(run_listener(state.clone(), subscription));
        Ok(Self {
            state,
            listener: Some(listener),
        })
    }

    /// Tracker seeded with `initial` and no provider subscription.
    pub fn from_snapshot(initial: BTreeSet<ProcessId>) -> Self {
        Self {
            state: Arc::new(TrackerState {
                members: Mutex::new(Membership::Live(initial)),
            }),
            listener: None,
        }
    }

    /// Current membership. Fails once the provider has disconnected.
    pub fn snapshot(&self) -> HostResult<BTreeSet<ProcessId>> {
        self.state.snapshot()
    }

    /// Whether the provider is still observing the host.
    pub fn is_connected(&self) -> bool {
        self.state.snapshot().is_ok()
    }

    /// Retain only the ids in `active`. Never adds ids.
    pub fn on_membership_changed(&self, active: &BTreeSet<ProcessId>) {
        self.state.retain_active(active);
    }

    /// The provider can no longer observe the host.
    pub fn on_disconnected(&self) {
        report_disconnected();
        self.state.disconnect();
    }

    /// Record a process the host attached to successfully.
    pub fn record_attachable(&self, pid: ProcessId) {
        self.state.insert(pid);
    }

    /// Stop following provider notifications and drop the subscription.
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

impl Drop for MembershipTracker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_listener(state: Arc<TrackerState>, mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        match event {
            MembershipEvent::Changed(active) => {
                tracing::debug!(
                    "[membership] provider reports {} active processes",
                    active.len()
                );
                state.retain_active(&active);
            }
            MembershipEvent::Disconnected => {
                report_disconnected();
                state.disconnect();
                return;
            }
        }
    }

    // The provider dropped our channel without a disconnect event.
    report_disconnected();
    state.disconnect();
}

fn report_disconnected() {
    tracing::error!(
        "[membership] instrumentation provider disconnected from the local host; \
         attach and membership requests will fail until restart"
    );
}

#[cfg(test)]
#[path = "tests/membership_tests.rs"]
mod tests;
