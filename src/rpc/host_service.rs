//! Host service definitions for remote caller ↔ host RPC.

use crate::rpc::{HostResult, ProcessId, SessionHandle};

/// Service published under the well-known name in the registry.
#[tarpc::service]
pub trait HostService {
    /// Attach to a process's instrumentation buffer.
    ///
    /// `mode` is passed through to the provider. Returns a handle to a
    /// session exported on the host's session endpoint.
    async fn attach(pid: ProcessId, mode: Option<String>) -> HostResult<SessionHandle>;

    /// Detach a session previously returned by `attach`.
    async fn detach(handle: SessionHandle) -> HostResult<()>;

    /// List the processes currently believed alive on this host.
    async fn active_vms() -> HostResult<Vec<ProcessId>>;
}
