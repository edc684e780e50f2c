//! Instrumentation provider seam.
//!
//! A provider locates instrumented processes on the local host, resolves a
//! process to its instrumentation buffer, and pushes membership changes to
//! subscribers. The host service only depends on the traits in this module;
//! `perfdata` is the concrete implementation used by the daemon.

pub mod lookup;
pub mod perfdata;
pub mod subscription;

pub use lookup::LookupKey;
pub use perfdata::LocalProvider;
pub use subscription::{MembershipEvent, Subscription};

use crate::rpc::ProcessId;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Errors raised by instrumentation providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("process {0} not found")]
    NotFound(ProcessId),
    #[error("malformed lookup key: {0}")]
    MalformedKey(String),
    #[error("unsupported access mode '{mode}'")]
    UnsupportedMode { mode: String },
    #[error("process {pid} has an invalid instrumentation header (magic {magic:#010x})")]
    BadMagic { pid: ProcessId, magic: u32 },
    #[error("process {0} exited")]
    Gone(ProcessId),
    #[error("provider can no longer observe this host")]
    Unavailable,
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An attached instrumentation buffer.
pub trait BufferHandle: Send {
    /// Process owning the buffer.
    fn pid(&self) -> ProcessId;

    /// Contents at call time.
    fn bytes(&self) -> Result<Vec<u8>, ProviderError>;

    /// Declared capacity, independent of current content size.
    fn capacity(&self) -> u64;

    /// Release the buffer. Further calls to `bytes` fail.
    fn detach(&mut self);
}

/// Source of membership data and buffer handles for the local host.
pub trait InstrumentationProvider: Send + Sync {
    /// Full set of instrumented processes currently alive.
    fn current_members(&self) -> Result<BTreeSet<ProcessId>, ProviderError>;

    /// Resolve a lookup key to a buffer handle.
    fn resolve(&self, key: &LookupKey) -> Result<Box<dyn BufferHandle>, ProviderError>;

    /// Register for membership change notifications.
    /// Dropping the returned subscription unsubscribes.
    fn subscribe(&self) -> Subscription;
}
