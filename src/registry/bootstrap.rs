//! Service registration bootstrap.
//!
//! Publishes the host service under a well-known name. When no registry is
//! listening, the bootstrap may create one in-process and retry once.
//!
//! ```text
//! Unbound -> Binding -> Bound
//!                    \-> BindFailed
//! ```

use crate::client::connect_registry;
use crate::registry::server::{LocalRegistry, RegistryServer};
use crate::registry::url::{MalformedName, ServiceUrl};
use crate::rpc::Endpoint;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Failures talking to a naming directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("registry at {endpoint} refused the connection")]
    Unreachable {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("could not connect to registry at {endpoint}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("could not create registry on port {port}")]
    Creation {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("registry call failed")]
    Rpc(#[from] tarpc::client::RpcError),
}

/// Why the bootstrap could not publish the service.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    MalformedName(#[from] MalformedName),
    #[error("no registry reachable at {endpoint}")]
    RegistryUnreachable {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error("registry creation failed")]
    RegistryCreation(#[source] DirectoryError),
    #[error("binding failed")]
    Directory(#[source] DirectoryError),
}

/// Access to naming directories.
#[async_trait]
pub trait Directory: Send {
    /// Publish `service` under `name` in the registry at `registry`,
    /// replacing any previous binding.
    async fn rebind(
        &mut self,
        registry: &Endpoint,
        name: &str,
        service: &Endpoint,
    ) -> Result<(), DirectoryError>;

    /// Create a registry in this process listening on `port`.
    ///
    /// Returns an endpoint this process can reach the new registry at.
    async fn create_local(&mut self, port: u16) -> Result<Endpoint, DirectoryError>;
}

/// Directory reached over TCP with the registry RPC service.
///
/// A registry created through `create_local` lives as long as this value.
pub struct TcpDirectory {
    bind_address: IpAddr,
    advertise_host: String,
    created: Option<LocalRegistry>,
}

impl TcpDirectory {
    pub fn new(bind_address: IpAddr, advertise_host: impl Into<String>) -> Self {
        Self {
            bind_address,
            advertise_host: advertise_host.into(),
            created: None,
        }
    }

    /// The registry created by this directory, if any.
    pub fn local_registry(&self) -> Option<&LocalRegistry> {
        self.created.as_ref()
    }
}

#[async_trait]
impl Directory for TcpDirectory {
    async fn rebind(
        &mut self,
        registry: &Endpoint,
        name: &str,
        service: &Endpoint,
    ) -> Result<(), DirectoryError> {
        let client = connect_registry(registry).await.map_err(|source| {
            if source.kind() == io::ErrorKind::ConnectionRefused {
                DirectoryError::Unreachable {
                    endpoint: registry.clone(),
                    source,
                }
            } else {
                DirectoryError::Connect {
                    endpoint: registry.clone(),
                    source,
                }
            }
        })?;

        client
            .rebind(tarpc::context::current(), name.to_string(), service.clone())
            .await?;
        Ok(())
    }

    async fn create_local(&mut self, port: u16) -> Result<Endpoint, DirectoryError> {
        let addr = SocketAddr::new(self.bind_address, port);
        let registry = RegistryServer::spawn_local(addr, &self.advertise_host)
            .await
            .map_err(|source| DirectoryError::Creation { port, source })?;
        let endpoint = Endpoint::new(
            connect_address(self.bind_address).to_string(),
            registry.endpoint().port,
        );
        self.created = Some(registry);
        Ok(endpoint)
    }
}

/// Address to dial a listener bound on `bind`.
fn connect_address(bind: IpAddr) -> IpAddr {
    match bind {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    }
}

/// Where the host service was published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub name: String,
    pub registry: Endpoint,
    pub service: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    Binding,
    Bound(ServiceBinding),
    BindFailed(String),
}

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub registry_host: String,
    pub registry_port: u16,
    pub auto_create_registry: bool,
}

/// Registration state machine.
pub struct Bootstrap<D: Directory> {
    config: BootstrapConfig,
    directory: D,
    state: BindState,
    registry_created: bool,
}

impl<D: Directory> Bootstrap<D> {
    pub fn new(config: BootstrapConfig, directory: D) -> Self {
        Self {
            config,
            directory,
            state: BindState::Unbound,
            registry_created: false,
        }
    }

    pub fn state(&self) -> &BindState {
        &self.state
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Whether this bootstrap has created a registry.
    pub fn registry_created(&self) -> bool {
        self.registry_created
    }

    /// Publish `service` under `name`.
    ///
    /// A refused connection triggers at most one registry creation per
    /// bootstrap, followed by a single retry.
    pub async fn bind(
        &mut self,
        name: &str,
        service: &Endpoint,
    ) -> Result<ServiceBinding, BindError> {
        self.state = BindState::Binding;
        let result = self.try_bind(name, service).await;
        self.state = match &result {
            Ok(binding) => BindState::Bound(binding.clone()),
            Err(e) => BindState::BindFailed(e.to_string()),
        };
        result
    }

    async fn try_bind(
        &mut self,
        name: &str,
        service: &Endpoint,
    ) -> Result<ServiceBinding, BindError> {
        let url = ServiceUrl::parse(name)?;
        let port = url.port.unwrap_or(self.config.registry_port);
        let host = url
            .host
            .clone()
            .unwrap_or_else(|| self.config.registry_host.clone());
        let mut registry = Endpoint::new(host, port);

        loop {
            match self.directory.rebind(&registry, &url.name, service).await {
                Ok(()) => {
                    tracing::info!(
                        "[bootstrap] bound {} at {} -> {}",
                        url.name,
                        registry,
                        service
                    );
                    return Ok(ServiceBinding {
                        name: url.name,
                        registry,
                        service: service.clone(),
                    });
                }
                Err(DirectoryError::Unreachable { endpoint, source }) => {
                    if !self.config.auto_create_registry || self.registry_created {
                        return Err(BindError::RegistryUnreachable { endpoint, source });
                    }
                    tracing::info!(
                        "[bootstrap] no registry at {}, creating one on port {}",
                        endpoint,
                        port
                    );
                    let created = self
                        .directory
                        .create_local(port)
                        .await
                        .map_err(BindError::RegistryCreation)?;
                    self.registry_created = true;
                    // Without an explicit host, retry where the new registry listens.
                    if url.host.is_some() {
                        registry.port = created.port;
                    } else {
                        registry = created;
                    }
                }
                Err(e) => return Err(BindError::Directory(e)),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/bootstrap_tests.rs"]
mod tests;
