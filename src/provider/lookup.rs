//! Provider lookup keys.

use crate::provider::ProviderError;
use crate::rpc::ProcessId;
use std::fmt;

/// Canonical key used to resolve a process on the local host:
/// `local://<pid>@localhost[?mode=<mode>]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey {
    pid: ProcessId,
    mode: Option<String>,
}

impl LookupKey {
    /// Build a key from a pid and an optional access mode.
    ///
    /// The mode must be non-empty and limited to `[A-Za-z0-9_-]`, otherwise
    /// it could not be carried in the query component of the key.
    pub fn new(pid: ProcessId, mode: Option<&str>) -> Result<Self, ProviderError> {
        if let Some(mode) = mode {
            let valid = !mode.is_empty()
                && mode
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(ProviderError::MalformedKey(format_key(pid, Some(mode))));
            }
        }
        Ok(Self {
            pid,
            mode: mode.map(str::to_string),
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_key(self.pid, self.mode.as_deref()))
    }
}

fn format_key(pid: ProcessId, mode: Option<&str>) -> String {
    match mode {
        Some(mode) => format!("local://{}@localhost?mode={}", pid, mode),
        None => format!("local://{}@localhost", pid),
    }
}
