//! In-memory instrumentation provider for tests.

use crate::provider::subscription::{self, SubscriberRegistry};
use crate::provider::{
    BufferHandle, InstrumentationProvider, LookupKey, MembershipEvent, ProviderError,
    Subscription,
};
use crate::rpc::ProcessId;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Build a pid set from raw ids.
pub fn pids(ids: &[u32]) -> BTreeSet<ProcessId> {
    ids.iter().copied().map(ProcessId).collect()
}

type Buffers = Arc<Mutex<HashMap<ProcessId, Vec<u8>>>>;

/// Scripted provider: membership and buffers are set by the test, and
/// notifications are pushed explicitly.
pub struct FakeProvider {
    members: Mutex<BTreeSet<ProcessId>>,
    buffers: Buffers,
    subscribers: Arc<Mutex<SubscriberRegistry>>,
    detached: Arc<AtomicUsize>,
    read_delay: Arc<Mutex<Duration>>,
}

impl FakeProvider {
    /// Provider whose initial members are the given processes, each with a
    /// buffer holding `perfdata-<pid>`.
    pub fn with_processes(processes: &[u32]) -> Self {
        let members = pids(processes);
        let buffers = processes
            .iter()
            .map(|pid| (ProcessId(*pid), format!("perfdata-{}", pid).into_bytes()))
            .collect();
        Self {
            members: Mutex::new(members),
            buffers: Arc::new(Mutex::new(buffers)),
            subscribers: SubscriberRegistry::shared(),
            detached: Arc::new(AtomicUsize::new(0)),
            read_delay: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Make every buffer read block the calling thread for `delay`.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Replace a process's buffer contents (or start a process).
    pub fn set_buffer(&self, pid: u32, bytes: &[u8]) {
        self.buffers
            .lock()
            .unwrap()
            .insert(ProcessId(pid), bytes.to_vec());
    }

    /// Make a process disappear without notifying subscribers.
    pub fn kill(&self, pid: u32) {
        self.buffers.lock().unwrap().remove(&ProcessId(pid));
    }

    /// Push a membership change to subscribers.
    pub async fn notify(&self, active: &[u32]) {
        *self.members.lock().unwrap() = pids(active);
        subscription::broadcast(&self.subscribers, MembershipEvent::Changed(pids(active))).await;
    }

    /// Push a disconnection to subscribers.
    pub async fn disconnect(&self) {
        subscription::broadcast(&self.subscribers, MembershipEvent::Disconnected).await;
    }

    /// Number of buffer handles released so far.
    pub fn detached_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().count()
    }
}

impl InstrumentationProvider for FakeProvider {
    fn current_members(&self) -> Result<BTreeSet<ProcessId>, ProviderError> {
        Ok(self.members.lock().unwrap().clone())
    }

    fn resolve(&self, key: &LookupKey) -> Result<Box<dyn BufferHandle>, ProviderError> {
        let capacity = self
            .buffers
            .lock()
            .unwrap()
            .get(&key.pid())
            .map(|bytes| bytes.len() as u64)
            .ok_or(ProviderError::NotFound(key.pid()))?;

        Ok(Box::new(FakeBuffer {
            pid: key.pid(),
            capacity,
            buffers: self.buffers.clone(),
            detached: self.detached.clone(),
            read_delay: self.read_delay.clone(),
            attached: true,
        }))
    }

    fn subscribe(&self) -> Subscription {
        subscription::subscribe(&self.subscribers)
    }
}

struct FakeBuffer {
    pid: ProcessId,
    capacity: u64,
    buffers: Buffers,
    detached: Arc<AtomicUsize>,
    read_delay: Arc<Mutex<Duration>>,
    attached: bool,
}

impl BufferHandle for FakeBuffer {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn bytes(&self) -> Result<Vec<u8>, ProviderError> {
        if !self.attached {
            return Err(ProviderError::Gone(self.pid));
        }
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.buffers
            .lock()
            .unwrap()
            .get(&self.pid)
            .cloned()
            .ok_or(ProviderError::Gone(self.pid))
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn detach(&mut self) {
        self.attached = false;
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}
