//! Session service definitions for remote caller ↔ session endpoint RPC.

use crate::rpc::{HostResult, ProcessId, SessionId};

/// Service exposed by the session endpoint.
/// Every call addresses one exported session by id.
#[tarpc::service]
pub trait SessionService {
    /// Current contents of the instrumentation buffer, captured at call time.
    async fn bytes(session_id: SessionId) -> HostResult<Vec<u8>>;

    /// Declared capacity of the buffer.
    async fn capacity(session_id: SessionId) -> HostResult<u64>;

    /// Release the buffer and unexport the session.
    async fn detach(session_id: SessionId) -> HostResult<()>;

    /// Process the session is attached to.
    async fn owner_process_id(session_id: SessionId) -> HostResult<ProcessId>;
}
