//! RPC server implementation for host service.
//!
//! Implements the tarpc HostService trait: resolves processes through the
//! instrumentation provider, exports sessions, and answers membership queries.

use crate::host::exports::SessionExports;
use crate::host::membership::MembershipTracker;
use crate::host::session::Session;
use crate::provider::{InstrumentationProvider, LookupKey, ProviderError};
use crate::rpc::host_service::HostService;
use crate::rpc::{Endpoint, HostError, HostResult, ProcessId, SessionHandle};
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Map a provider failure for `pid` onto the wire error taxonomy.
pub fn attach_error(pid: ProcessId, err: ProviderError) -> HostError {
    match err {
        ProviderError::NotFound(pid) | ProviderError::Gone(pid) => {
            HostError::ProcessNotFound { pid }
        }
        ProviderError::MalformedKey(key) => HostError::MalformedIdentifier { key },
        ProviderError::UnsupportedMode { mode } => HostError::MalformedIdentifier {
            key: format!("local://{}@localhost?mode={}", pid, mode),
        },
        ProviderError::Unavailable => HostError::ProviderUnavailable,
        ProviderError::BadMagic { .. } | ProviderError::Io { .. } => {
            HostError::BufferUnreadable {
                pid,
                message: err.to_string(),
            }
        }
    }
}

/// Server implementation for HostService.
#[derive(Clone)]
pub struct HostServer {
    provider: Arc<dyn InstrumentationProvider>,
    tracker: Arc<MembershipTracker>,
    exports: Arc<SessionExports>,
}

impl HostServer {
    pub fn new(
        provider: Arc<dyn InstrumentationProvider>,
        tracker: Arc<MembershipTracker>,
        exports: Arc<SessionExports>,
    ) -> Self {
        Self {
            provider,
            tracker,
            exports,
        }
    }

    pub fn tracker(&self) -> &MembershipTracker {
        &self.tracker
    }

    pub fn exports(&self) -> &SessionExports {
        &self.exports
    }

    /// Resolve `pid`, wrap its buffer in a session, and export it.
    ///
    /// The tracker is not consulted first: a process the provider has not
    /// reported yet can still be attached.
    pub fn attach_session(
        &self,
        pid: ProcessId,
        mode: Option<String>,
    ) -> HostResult<SessionHandle> {
        if !self.tracker.is_connected() {
            return Err(HostError::ProviderUnavailable);
        }

        let key = LookupKey::new(pid, mode.as_deref()).map_err(|e| attach_error(pid, e))?;
        let buffer = self.provider.resolve(&key).map_err(|e| {
            tracing::debug!("[host-rpc] attach {} failed: {}", key, e);
            attach_error(pid, e)
        })?;

        let session = Session::new(pid, mode, buffer);
        let handle = self.exports.export(session);
        self.tracker.record_attachable(pid);

        tracing::info!(
            "[host-rpc] attached {} as session {} ({} exported)",
            key,
            handle.session_id,
            self.exports.len()
        );
        Ok(handle)
    }

    /// Forward to the session's detach and unexport it.
    pub fn detach_session(&self, handle: &SessionHandle) -> HostResult<()> {
        self.exports.detach(handle.session_id)?;
        tracing::info!(
            "[host-rpc] detached session {} (pid {})",
            handle.session_id,
            handle.pid
        );
        Ok(())
    }

    /// Current membership as a plain list.
    pub fn membership(&self) -> HostResult<Vec<ProcessId>> {
        Ok(self.tracker.snapshot()?.into_iter().collect())
    }
}

impl HostService for HostServer {
    async fn attach(
        self,
        _: tarpc::context::Context,
        pid: ProcessId,
        mode: Option<String>,
    ) -> HostResult<SessionHandle> {
        self.attach_session(pid, mode)
    }

    async fn detach(self, _: tarpc::context::Context, handle: SessionHandle) -> HostResult<()> {
        self.detach_session(&handle)
    }

    async fn active_vms(self, _: tarpc::context::Context) -> HostResult<Vec<ProcessId>> {
        self.membership()
    }
}

/// Export the host service on `bind` and serve it until shutdown.
///
/// Returns the advertised endpoint to publish in the registry.
pub async fn start_host_endpoint(
    host: HostServer,
    bind: SocketAddr,
    advertise_host: &str,
    shutdown_tx: broadcast::Sender<()>,
) -> anyhow::Result<(Endpoint, JoinHandle<()>)> {
    use tarpc::serde_transport::tcp;

    let mut listener = tcp::listen(bind, Bincode::default).await?;
    listener.config_mut().max_frame_length(usize::MAX);

    let endpoint = Endpoint::new(advertise_host, listener.local_addr().port());
    tracing::info!(
        "[host-rpc] listening on {} (advertised as {})",
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
                            let server = host.clone();
                            let channel = server::BaseChannel::with_defaults(transport);
                            tokio::spawn(async move {
                                channel.execute(server.serve()).for_each(|response| async {
                                    tokio::spawn(response);
                                }).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!("[host-rpc] accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });

    Ok((endpoint, task))
}

#[cfg(test)]
#[path = "tests/rpc_server_tests.rs"]
mod tests;
