//! Export table and session endpoint.
//!
//! Attached sessions are exported by inserting them into a table served by a
//! single tarpc listener (the session endpoint). Remote callers address a
//! session by id. Every access refreshes the session's lease; a sweeper
//! reclaims sessions whose caller went away without detaching.

use crate::host::session::Session;
use crate::rpc::session_service::SessionService;
use crate::rpc::{Endpoint, HostError, HostResult, ProcessId, SessionHandle, SessionId};
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct ExportEntry {
    session: Arc<Session>,
    last_used: Instant,
}

/// Sessions currently reachable through the session endpoint.
pub struct SessionExports {
    endpoint: Endpoint,
    table: Mutex<HashMap<SessionId, ExportEntry>>,
}

impl SessionExports {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Endpoint advertised in session handles.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Make a session remotely invocable and return its handle.
    pub fn export(&self, session: Session) -> SessionHandle {
        let handle = SessionHandle {
            session_id: session.id(),
            pid: session.owner_process_id(),
            endpoint: self.endpoint.clone(),
        };
        self.lock().insert(
            session.id(),
            ExportEntry {
                session: Arc::new(session),
                last_used: Instant::now(),
            },
        );
        handle
    }

    /// Look up an exported session and refresh its lease.
    pub fn get(&self, session_id: SessionId) -> HostResult<Arc<Session>> {
        let mut table = self.lock();
        let entry = table
            .get_mut(&session_id)
            .ok_or(HostError::SessionInvalid { session_id })?;
        entry.last_used = Instant::now();
        Ok(entry.session.clone())
    }

    /// Remove a session from the table without detaching it.
    pub fn unexport(&self, session_id: SessionId) -> Option<Arc<Session>> {
        self.lock().remove(&session_id).map(|entry| entry.session)
    }

    /// Detach and unexport a session.
    pub fn detach(&self, session_id: SessionId) -> HostResult<()> {
        let session = self
            .unexport(session_id)
            .ok_or(HostError::SessionInvalid { session_id })?;
        session.detach()
    }

    /// Detach and unexport every session idle for longer than `lease`.
    /// Returns the reclaimed session IDs.
    pub fn sweep_idle(&self, lease: Duration) -> Vec<SessionId> {
        let expired: Vec<Arc<Session>> = {
            let mut table = self.lock();
            let ids: Vec<SessionId> = table
                .iter()
                .filter(|(_, entry)| entry.last_used.elapsed() > lease)
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| table.remove(id))
                .map(|entry| entry.session)
                .collect()
        };

        expired
            .into_iter()
            .map(|session| {
                // Already detached sessions only need unexporting.
                let _ = session.detach();
                session.id()
            })
            .collect()
    }

    /// Number of exported sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, ExportEntry>> {
        self.table.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Server implementation for SessionService.
#[derive(Clone)]
pub struct SessionServer {
    exports: Arc<SessionExports>,
}

impl SessionServer {
    pub fn new(exports: Arc<SessionExports>) -> Self {
        Self { exports }
    }
}

impl SessionService for SessionServer {
    async fn bytes(self, _: tarpc::context::Context, session_id: SessionId) -> HostResult<Vec<u8>> {
        let session = self.exports.get(session_id)?;
        let pid = session.owner_process_id();
        // Reading the buffer is file I/O under the session lock.
        let result = tokio::task::spawn_blocking(move || session.bytes())
            .await
            .unwrap_or_else(|e| {
                Err(HostError::BufferUnreadable {
                    pid,
                    message: e.to_string(),
                })
            });
        if matches!(result, Err(HostError::ProcessNotFound { .. })) {
            // The session released its buffer; stop exporting it.
            self.exports.unexport(session_id);
        }
        result
    }

    async fn capacity(self, _: tarpc::context::Context, session_id: SessionId) -> HostResult<u64> {
        self.exports.get(session_id)?.capacity()
    }

    async fn detach(self, _: tarpc::context::Context, session_id: SessionId) -> HostResult<()> {
        self.exports.detach(session_id)
    }

    async fn owner_process_id(
        self,
        _: tarpc::context::Context,
        session_id: SessionId,
    ) -> HostResult<ProcessId> {
        Ok(self.exports.get(session_id)?.owner_process_id())
    }
}

/// Bind the session endpoint and serve it until shutdown.
///
/// `bind` port 0 picks an ephemeral port; the chosen port is advertised in
/// every session handle together with `advertise_host`.
pub async fn start_session_endpoint(
    bind: SocketAddr,
    advertise_host: &str,
    shutdown_tx: broadcast::Sender<()>,
) -> anyhow::Result<(Arc<SessionExports>, JoinHandle<()>)> {
    use tarpc::serde_transport::tcp;

    let mut listener = tcp::listen(bind, Bincode::default).await?;
    listener.config_mut().max_frame_length(usize::MAX);

    let endpoint = Endpoint::new(advertise_host, listener.local_addr().port());
    let exports = Arc::new(SessionExports::new(endpoint.clone()));
    let server = SessionServer::new(exports.clone());

    tracing::info!(
        "[session-endpoint] listening on {} (advertised as {})",
        listener.local_addr(),
        endpoint
    );

    let mut shutdown_rx = shutdown_tx.subscribe();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(result) = listener.next() => {
                    match result {
                        Ok(transport) => {
                            let server = server.clone();
                            let channel = server::BaseChannel::with_defaults(transport);
                            tokio::spawn(async move {
                                channel.execute(server.serve()).for_each(|response| async {
                                    tokio::spawn(response);
                                }).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!("[session-endpoint] accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });

    Ok((exports, task))
}

/// Background task reclaiming sessions whose lease expired.
pub async fn run_lease_sweeper(
    exports: Arc<SessionExports>,
    lease: Duration,
    shutdown_tx: broadcast::Sender<()>,
) {
    if lease.is_zero() {
        return;
    }

    let mut shutdown_rx = shutdown_tx.subscribe();
    let period = (lease / 4).max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let reclaimed = exports.sweep_idle(lease);
                if !reclaimed.is_empty() {
                    tracing::info!(
                        "[lease] reclaimed {} idle sessions, {} remaining",
                        reclaimed.len(),
                        exports.len()
                    );
                }
            }
            _ = shutdown_rx.recv() => {
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/exports_tests.rs"]
mod tests;
