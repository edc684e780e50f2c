//! Naming registry server.
//!
//! Maps service names to endpoints. The daemon creates one of these when no
//! registry is listening on the configured port.

use crate::rpc::registry_service::RegistryService;
use crate::rpc::{Endpoint, RegistryError, RegistryResult};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::server::{self, Channel};
use tarpc::tokio_serde::formats::Bincode;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Name bindings held by a registry.
#[derive(Debug, Default)]
pub struct RegistryState {
    bindings: BTreeMap<String, Endpoint>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: String, endpoint: Endpoint) -> RegistryResult<()> {
        if self.bindings.contains_key(&name) {
            return Err(RegistryError::AlreadyBound { name });
        }
        self.bindings.insert(name, endpoint);
        Ok(())
    }

    /// Bind `name`, replacing any previous binding.
    pub fn rebind(&mut self, name: String, endpoint: Endpoint) -> Option<Endpoint> {
        self.bindings.insert(name, endpoint)
    }

    pub fn lookup(&self, name: &str) -> RegistryResult<Endpoint> {
        self.bindings
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotBound {
                name: name.to_string(),
            })
    }

    pub fn unbind(&mut self, name: &str) -> RegistryResult<Endpoint> {
        self.bindings
            .remove(name)
            .ok_or_else(|| RegistryError::NotBound {
                name: name.to_string(),
            })
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }
}

/// Server implementation for RegistryService.
#[derive(Clone)]
pub struct RegistryServer {
    state: Arc<Mutex<RegistryState>>,
}

impl RegistryServer {
    pub fn new(state: Arc<Mutex<RegistryState>>) -> Self {
        Self { state }
    }

    /// Bind a registry listener on `bind` and serve it in the background.
    ///
    /// Bind errors are returned to the caller; the listener runs until the
    /// returned handle is dropped.
    pub async fn spawn_local(
        bind: SocketAddr,
        advertise_host: &str,
    ) -> std::io::Result<LocalRegistry> {
        use tarpc::serde_transport::tcp;

        let mut listener = tcp::listen(bind, Bincode::default).await?;
        listener.config_mut().max_frame_length(usize::MAX);
        let endpoint = Endpoint::new(advertise_host, listener.local_addr().port());

        let state = Arc::new(Mutex::new(RegistryState::new()));
        let registry = RegistryServer::new(state.clone());

        tracing::info!("[registry] created registry on {}", listener.local_addr());

        let task = tokio::spawn(async move {
            while let Some(result) = listener.next().await {
                match result {
                    Ok(transport) => {
                        let server = registry.clone();
                        let channel = server::BaseChannel::with_defaults(transport);
                        tokio::spawn(async move {
                            channel
                                .execute(server.serve())
                                .for_each(|response| async {
                                    tokio::spawn(response);
                                })
                                .await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!("[registry] accept error: {}", e);
                    }
                }
            }
        });

        Ok(LocalRegistry {
            endpoint,
            state,
            task,
        })
    }
}

impl RegistryService for RegistryServer {
    async fn bind(
        self,
        _: tarpc::context::Context,
        name: String,
        endpoint: Endpoint,
    ) -> RegistryResult<()> {
        tracing::debug!("[registry] bind {} -> {}", name, endpoint);
        self.state.lock().await.bind(name, endpoint)
    }

    async fn rebind(
        self,
        _: tarpc::context::Context,
        name: String,
        endpoint: Endpoint,
    ) {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.rebind(name.clone(), endpoint.clone()) {
            tracing::info!("[registry] rebind {}: {} replaced by {}", name, previous, endpoint);
        } else {
            tracing::debug!("[registry] rebind {} -> {}", name, endpoint);
        }
    }

    async fn lookup(self, _: tarpc::context::Context, name: String) -> RegistryResult<Endpoint> {
        self.state.lock().await.lookup(&name)
    }

    async fn unbind(self, _: tarpc::context::Context, name: String) -> RegistryResult<()> {
        self.state.lock().await.unbind(&name)?;
        tracing::debug!("[registry] unbind {}", name);
        Ok(())
    }

    async fn list(self, _: tarpc::context::Context) -> Vec<String> {
        self.state.lock().await.names()
    }
}

/// A registry created by this process.
///
/// Dropping it stops accepting new registry connections.
pub struct LocalRegistry {
    endpoint: Endpoint,
    state: Arc<Mutex<RegistryState>>,
    task: JoinHandle<()>,
}

impl LocalRegistry {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn names(&self) -> Vec<String> {
        self.state.lock().await.names()
    }
}

impl Drop for LocalRegistry {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
#[path = "tests/server_tests.rs"]
mod tests;
