//! Host side of the remote instrumentation protocol.
//!
//! ## Architecture
//!
//! - **Membership (`membership.rs`)**: live set of instrumented processes,
//!   reconciled against provider notifications.
//! - **Session (`session.rs`)**: one attached process buffer.
//! - **Exports (`exports.rs`)**: export table and tarpc session endpoint,
//!   plus the lease sweeper for abandoned sessions.
//! - **RPC server (`rpc_server.rs`)**: tarpc HostService façade.

pub mod exports;
pub mod membership;
pub mod rpc_server;
pub mod session;

pub use exports::{run_lease_sweeper, start_session_endpoint, SessionExports};
pub use membership::MembershipTracker;
pub use rpc_server::{start_host_endpoint, HostServer};
pub use session::Session;
