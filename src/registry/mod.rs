//! Naming registry and service registration.
//!
//! - **URL (`url.rs`)**: service name parsing.
//! - **Server (`server.rs`)**: in-process registry served over tarpc.
//! - **Bootstrap (`bootstrap.rs`)**: publishes the host service, creating a
//!   registry when none is reachable.

pub mod bootstrap;
pub mod server;
pub mod url;

pub use bootstrap::{
    BindError, BindState, Bootstrap, BootstrapConfig, Directory, DirectoryError, ServiceBinding,
    TcpDirectory,
};
pub use server::{LocalRegistry, RegistryServer};
pub use url::ServiceUrl;
