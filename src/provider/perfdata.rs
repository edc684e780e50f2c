//! Local instrumentation provider backed by perfdata files.
//!
//! Instrumented processes publish their counters in a memory-mapped file at
//! `<root>/hsperfdata_<user>/<pid>`. The provider discovers processes by
//! scanning those directories, attaches by opening the file, and watches the
//! root with a polling task that pushes membership changes to subscribers.

use crate::provider::subscription::{self, SubscriberRegistry};
use crate::provider::{
    BufferHandle, InstrumentationProvider, LookupKey, MembershipEvent, ProviderError,
    Subscription,
};
use crate::rpc::ProcessId;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Magic number at the start of every perfdata file (big-endian).
pub const PERFDATA_MAGIC: u32 = 0xCAFE_C0C0;

/// Prefix of the per-user directories holding perfdata files.
pub const PERFDATA_DIR_PREFIX: &str = "hsperfdata_";

/// Access mode supported by local buffers.
const READ_ONLY_MODE: &str = "r";

/// Provider for processes running on this host.
pub struct LocalProvider {
    root: PathBuf,
    poll_interval: Duration,
    subscribers: Arc<Mutex<SubscriberRegistry>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl LocalProvider {
    /// Provider scanning `root` (normally the system temp directory).
    pub fn for_host(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
            subscribers: SubscriberRegistry::shared(),
            poller: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the perfdata file for a live process.
    fn locate(&self, pid: ProcessId) -> Result<Option<PathBuf>, ProviderError> {
        for dir in perfdata_dirs(&self.root)? {
            let candidate = dir.join(pid.to_string());
            if candidate.is_file() && process_alive(pid) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn ensure_poller(&self) {
        let mut poller = self.poller.lock().unwrap_or_else(|p| p.into_inner());
        let running = poller.as_ref().is_some_and(|task| !task.is_finished());
        if running {
            return;
        }

        let last = scan(&self.root).unwrap_or_default();
        *poller = Some(tokio::spawn(run_poller(
            self.root.clone(),
            self.poll_interval,
            Arc::downgrade(&self.subscribers),
            last,
        )));
    }
}

impl InstrumentationProvider for LocalProvider {
    fn current_members(&self) -> Result<BTreeSet<ProcessId>, ProviderError> {
        scan(&self.root)
    }

    fn resolve(&self, key: &LookupKey) -> Result<Box<dyn BufferHandle>, ProviderError> {
        if let Some(mode) = key.mode() {
            if mode != READ_ONLY_MODE {
                return Err(ProviderError::UnsupportedMode {
                    mode: mode.to_string(),
                });
            }
        }

        let path = self
            .locate(key.pid())?
            .ok_or(ProviderError::NotFound(key.pid()))?;
        let buffer = PerfDataBuffer::open(key.pid(), path)?;
        Ok(Box::new(buffer))
    }

    fn subscribe(&self) -> Subscription {
        let subscription = subscription::subscribe(&self.subscribers);
        self.ensure_poller();
        subscription
    }
}

impl Drop for LocalProvider {
    fn drop(&mut self) {
        if let Some(task) = self.poller.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

/// Periodically rescan `root` and push changes to subscribers.
///
/// Stops when the registry is gone, when no subscribers remain, or after
/// reporting `Disconnected` because the root became unreadable.
async fn run_poller(
    root: PathBuf,
    poll_interval: Duration,
    subscribers: std::sync::Weak<Mutex<SubscriberRegistry>>,
    mut last: BTreeSet<ProcessId>,
) {
    let mut interval = tokio::time::interval(poll_interval);
    interval.tick().await;

    loop {
        interval.tick().await;

        let Some(registry) = subscribers.upgrade() else {
            break;
        };
        let subscriber_count = registry.lock().unwrap_or_else(|p| p.into_inner()).count();
        if subscriber_count == 0 {
            break;
        }

        match scan(&root) {
            Ok(active) => {
                if active != last {
                    tracing::debug!(
                        "[provider] membership changed: {} -> {} processes",
                        last.len(),
                        active.len()
                    );
                    subscription::broadcast(&registry, MembershipEvent::Changed(active.clone()))
                        .await;
                    last = active;
                }
            }
            Err(e) => {
                tracing::error!("[provider] cannot observe {}: {}", root.display(), e);
                subscription::broadcast(&registry, MembershipEvent::Disconnected).await;
                break;
            }
        }
    }
}

/// All live processes with a perfdata file under `root`.
pub fn scan(root: &Path) -> Result<BTreeSet<ProcessId>, ProviderError> {
    let mut active = BTreeSet::new();
    for dir in perfdata_dirs(root)? {
        // A user directory may vanish or be unreadable; skip it.
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
                .map(ProcessId)
            else {
                continue;
            };
            if entry.path().is_file() && process_alive(pid) {
                active.insert(pid);
            }
        }
    }
    Ok(active)
}

fn perfdata_dirs(root: &Path) -> Result<Vec<PathBuf>, ProviderError> {
    let entries = fs::read_dir(root).map_err(|source| ProviderError::Io {
        path: root.to_path_buf(),
        source,
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(PERFDATA_DIR_PREFIX))
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

#[cfg(unix)]
fn process_alive(pid: ProcessId) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid.as_u32()) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Owned by another user but alive.
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: ProcessId) -> bool {
    true
}

/// Instrumentation buffer of one local process.
#[derive(Debug)]
pub struct PerfDataBuffer {
    pid: ProcessId,
    path: PathBuf,
    capacity: u64,
    attached: bool,
}

impl PerfDataBuffer {
    /// Open and validate the perfdata file of `pid`.
    pub fn open(pid: ProcessId, path: PathBuf) -> Result<Self, ProviderError> {
        let io_err = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                ProviderError::NotFound(pid)
            } else {
                ProviderError::Io {
                    path: path.clone(),
                    source,
                }
            }
        };

        let mut file = fs::File::open(&path).map_err(io_err)?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).map_err(io_err)?;
        let magic = u32::from_be_bytes(magic);
        if magic != PERFDATA_MAGIC {
            return Err(ProviderError::BadMagic { pid, magic });
        }
        let capacity = file.metadata().map_err(io_err)?.len();

        Ok(Self {
            pid,
            path,
            capacity,
            attached: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BufferHandle for PerfDataBuffer {
    fn pid(&self) -> ProcessId {
        self.pid
    }

    fn bytes(&self) -> Result<Vec<u8>, ProviderError> {
        if !self.attached {
            return Err(ProviderError::Gone(self.pid));
        }
        fs::read(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ProviderError::Gone(self.pid)
            } else {
                ProviderError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn detach(&mut self) {
        self.attached = false;
    }
}

#[cfg(test)]
#[path = "tests/perfdata_tests.rs"]
mod tests;
