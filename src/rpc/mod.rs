//! RPC service definitions for the remote host protocol.
//!
//! This module defines the tarpc services for:
//! - Remote caller ↔ Host: membership queries and attach/detach
//! - Remote caller ↔ Session endpoint: instrumentation buffer access
//! - Daemon ↔ Registry: publishing and resolving service names

pub mod host_service;
pub mod registry_service;
pub mod session_service;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an instrumented process on the local host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl ProcessId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an exported session object.
pub type SessionId = uuid::Uuid;

/// Network location of an exported object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address string suitable for `tcp::connect`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Remote reference to a session exported by the host.
///
/// Returned by `attach`; the session endpoint accepts calls keyed by
/// `session_id` until the session is detached or its lease expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub pid: ProcessId,
    pub endpoint: Endpoint,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors returned by host and session RPC methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostError {
    /// The provider could not resolve the process id.
    ProcessNotFound { pid: ProcessId },
    /// The pid/mode pair does not form a valid lookup key.
    MalformedIdentifier { key: String },
    /// The session was detached or never existed.
    SessionInvalid { session_id: SessionId },
    /// The instrumentation provider reported disconnection.
    ProviderUnavailable,
    /// Reading the instrumentation buffer failed.
    BufferUnreadable { pid: ProcessId, message: String },
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::ProcessNotFound { pid } => write!(f, "Process not found: {}", pid),
            HostError::MalformedIdentifier { key } => {
                write!(f, "Malformed process identifier: {}", key)
            }
            HostError::SessionInvalid { session_id } => {
                write!(f, "Session is no longer valid: {}", session_id)
            }
            HostError::ProviderUnavailable => {
                write!(f, "Instrumentation provider is unavailable")
            }
            HostError::BufferUnreadable { pid, message } => {
                write!(f, "Could not read buffer of process {}: {}", pid, message)
            }
        }
    }
}

impl std::error::Error for HostError {}

/// Result type for host and session operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors returned by registry RPC methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryError {
    /// A binding with this name already exists.
    AlreadyBound { name: String },
    /// No binding exists for this name.
    NotBound { name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyBound { name } => write!(f, "Name already bound: {}", name),
            RegistryError::NotBound { name } => write!(f, "Name not bound: {}", name),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
