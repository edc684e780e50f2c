//! Registry service definitions for the naming directory.

use crate::rpc::{Endpoint, RegistryResult};

/// Naming directory mapping service names to endpoints.
#[tarpc::service]
pub trait RegistryService {
    /// Bind a name. Fails if the name is already bound.
    async fn bind(name: String, endpoint: Endpoint) -> RegistryResult<()>;

    /// Bind a name, replacing any existing binding.
    async fn rebind(name: String, endpoint: Endpoint);

    /// Resolve a name to its endpoint.
    async fn lookup(name: String) -> RegistryResult<Endpoint>;

    /// Remove a binding.
    async fn unbind(name: String) -> RegistryResult<()>;

    /// All bound names, sorted.
    async fn list() -> Vec<String>;
}
