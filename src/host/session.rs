//! Attached instrumentation sessions.

use crate::provider::{BufferHandle, ProviderError};
use crate::rpc::{HostError, HostResult, ProcessId, SessionId};
use std::sync::{Mutex, MutexGuard};

/// One caller's access to a process's instrumentation buffer.
///
/// The buffer slot is `None` once detached; every accessor checks it under
/// the same lock, so a detach racing a read is either fully visible or not
/// at all.
pub struct Session {
    id: SessionId,
    pid: ProcessId,
    mode: Option<String>,
    buffer: Mutex<Option<Box<dyn BufferHandle>>>,
}

impl Session {
    pub fn new(pid: ProcessId, mode: Option<String>, buffer: Box<dyn BufferHandle>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            pid,
            mode,
            buffer: Mutex::new(Some(buffer)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn owner_process_id(&self) -> ProcessId {
        self.pid
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Buffer contents captured now.
    ///
    /// If the process has exited, the buffer is released and the session
    /// becomes invalid.
    pub fn bytes(&self) -> HostResult<Vec<u8>> {
        let mut slot = self.lock();
        let buffer = slot.as_ref().ok_or_else(|| self.invalid())?;

        match buffer.bytes() {
            Ok(bytes) => Ok(bytes),
            Err(ProviderError::Gone(pid)) | Err(ProviderError::NotFound(pid)) => {
                if let Some(mut buffer) = slot.take() {
                    buffer.detach();
                }
                tracing::info!(
                    "[session] process {} exited, released session {}",
                    pid,
                    self.id
                );
                Err(HostError::ProcessNotFound { pid })
            }
            Err(e) => Err(HostError::BufferUnreadable {
                pid: self.pid,
                message: e.to_string(),
            }),
        }
    }

    pub fn capacity(&self) -> HostResult<u64> {
        self.lock()
            .as_ref()
            .map(|buffer| buffer.capacity())
            .ok_or_else(|| self.invalid())
    }

    /// Release the buffer. A second detach fails with `SessionInvalid`.
    pub fn detach(&self) -> HostResult<()> {
        let mut buffer = self.lock().take().ok_or_else(|| self.invalid())?;
        buffer.detach();
        tracing::debug!("[session] detached session {} (pid {})", self.id, self.pid);
        Ok(())
    }

    fn invalid(&self) -> HostError {
        HostError::SessionInvalid {
            session_id: self.id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn BufferHandle>>> {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("mode", &self.mode)
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
