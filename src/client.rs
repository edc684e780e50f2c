//! RPC clients for remote callers.
//!
//! Resolves the host service through the registry, then talks to the host
//! and to the session endpoint with tarpc over TCP.

use crate::rpc::host_service::HostServiceClient;
use crate::rpc::registry_service::RegistryServiceClient;
use crate::rpc::session_service::SessionServiceClient;
use crate::rpc::{Endpoint, ProcessId, SessionHandle};
use anyhow::{Context, Result};
use tarpc::client;
use tarpc::tokio_serde::formats::Bincode;

/// Connect a raw host service client.
pub async fn connect_host(endpoint: &Endpoint) -> std::io::Result<HostServiceClient> {
    use tarpc::serde_transport::tcp;

    let mut transport = tcp::connect(endpoint.address(), Bincode::default);
    transport.config_mut().max_frame_length(usize::MAX);
    Ok(HostServiceClient::new(client::Config::default(), transport.await?).spawn())
}

/// Connect a raw session service client.
pub async fn connect_session(endpoint: &Endpoint) -> std::io::Result<SessionServiceClient> {
    use tarpc::serde_transport::tcp;

    let mut transport = tcp::connect(endpoint.address(), Bincode::default);
    transport.config_mut().max_frame_length(usize::MAX);
    Ok(SessionServiceClient::new(client::Config::default(), transport.await?).spawn())
}

/// Connect a raw registry client.
pub async fn connect_registry(endpoint: &Endpoint) -> std::io::Result<RegistryServiceClient> {
    use tarpc::serde_transport::tcp;

    let transport = tcp::connect(endpoint.address(), Bincode::default).await?;
    Ok(RegistryServiceClient::new(client::Config::default(), transport).spawn())
}

/// Connection to a remote host service.
pub struct RemoteHost {
    client: HostServiceClient,
    endpoint: Endpoint,
}

impl RemoteHost {
    /// Resolve `name` in the registry at `registry` and connect to it.
    pub async fn lookup(registry: &Endpoint, name: &str) -> Result<Self> {
        let registry_client = connect_registry(registry)
            .await
            .with_context(|| format!("Could not contact registry at {}", registry))?;
        let endpoint = registry_client
            .lookup(tarpc::context::current(), name.to_string())
            .await??;
        Self::connect(&endpoint).await
    }

    /// Connect directly to a host endpoint.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        let client = connect_host(endpoint)
            .await
            .with_context(|| format!("Could not connect to host service at {}", endpoint))?;
        Ok(Self {
            client,
            endpoint: endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub async fn active_vms(&self) -> Result<Vec<ProcessId>> {
        Ok(self.client.active_vms(tarpc::context::current()).await??)
    }

    /// Attach to `pid` and connect to the returned session.
    pub async fn attach(&self, pid: ProcessId, mode: Option<&str>) -> Result<RemoteSession> {
        let handle = self
            .client
            .attach(tarpc::context::current(), pid, mode.map(str::to_string))
            .await??;
        let client = connect_session(&handle.endpoint)
            .await
            .with_context(|| format!("Could not connect to session endpoint {}", handle.endpoint))?;
        Ok(RemoteSession { handle, client })
    }

    /// Detach a session through the host service.
    pub async fn detach(&self, session: RemoteSession) -> Result<()> {
        Ok(self
            .client
            .detach(tarpc::context::current(), session.handle)
            .await??)
    }
}

/// Remote reference to an attached session.
pub struct RemoteSession {
    handle: SessionHandle,
    client: SessionServiceClient,
}

impl RemoteSession {
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub async fn bytes(&self) -> Result<Vec<u8>> {
        Ok(self
            .client
            .bytes(tarpc::context::current(), self.handle.session_id)
            .await??)
    }

    pub async fn capacity(&self) -> Result<u64> {
        Ok(self
            .client
            .capacity(tarpc::context::current(), self.handle.session_id)
            .await??)
    }

    pub async fn owner_process_id(&self) -> Result<ProcessId> {
        Ok(self
            .client
            .owner_process_id(tarpc::context::current(), self.handle.session_id)
            .await??)
    }

    pub async fn detach(self) -> Result<()> {
        Ok(self
            .client
            .detach(tarpc::context::current(), self.handle.session_id)
            .await??)
    }
}
