//! Daemon entry point.
//!
//! Wires the local provider, membership tracker, session endpoint and host
//! service together, then publishes the host service in the registry.

use crate::config::DaemonConfig;
use crate::host::{
    run_lease_sweeper, start_host_endpoint, start_session_endpoint, HostServer,
    MembershipTracker,
};
use crate::provider::{InstrumentationProvider, LocalProvider};
use crate::registry::{Bootstrap, ServiceBinding, TcpDirectory};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A started daemon. Serves until `shutdown` is called or it is dropped.
pub struct RunningDaemon {
    binding: ServiceBinding,
    host: HostServer,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
    // Owns any registry this daemon created.
    _bootstrap: Bootstrap<TcpDirectory>,
}

impl RunningDaemon {
    pub fn binding(&self) -> &ServiceBinding {
        &self.binding
    }

    pub fn host(&self) -> &HostServer {
        &self.host
    }

    /// Stop accepting connections and wait for the background tasks.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        for mut task in self.tasks.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Start every component and publish the host service.
///
/// Fails if the service could not be bound in a registry.
pub async fn start_daemon(config: &DaemonConfig) -> Result<RunningDaemon> {
    config.validate()?;
    let advertise_host = config.advertised_host();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let provider: Arc<dyn InstrumentationProvider> = Arc::new(LocalProvider::for_host(
        config.perfdata_root(),
        config.poll_interval(),
    ));
    let tracker = MembershipTracker::start(provider.as_ref())
        .context("Failed to read initial process membership")?;
    tracing::info!(
        "[daemon] tracking {} instrumented processes under {}",
        tracker.snapshot().map(|s| s.len()).unwrap_or(0),
        config.perfdata_root().display()
    );

    let (exports, session_task) = start_session_endpoint(
        SocketAddr::new(config.bind_address, config.session_port),
        &advertise_host,
        shutdown_tx.clone(),
    )
    .await
    .context("Failed to start session endpoint")?;

    let sweeper_task = tokio::spawn(run_lease_sweeper(
        exports.clone(),
        config.session_lease(),
        shutdown_tx.clone(),
    ));

    let host = HostServer::new(provider, Arc::new(tracker), exports);
    let (endpoint, host_task) = start_host_endpoint(
        host.clone(),
        SocketAddr::new(config.bind_address, config.host_port),
        &advertise_host,
        shutdown_tx.clone(),
    )
    .await
    .context("Failed to start host service")?;

    let directory = TcpDirectory::new(config.bind_address, advertise_host);
    let mut bootstrap = Bootstrap::new(config.bootstrap_config(), directory);
    let binding = match bootstrap.bind(&config.service_name, &endpoint).await {
        Ok(binding) => binding,
        Err(e) => {
            let _ = shutdown_tx.send(());
            return Err(anyhow::Error::new(e).context(format!(
                "Could not bind '{}' in the registry",
                config.service_name
            )));
        }
    };

    Ok(RunningDaemon {
        binding,
        host,
        shutdown_tx,
        tasks: vec![session_task, sweeper_task, host_task],
        _bootstrap: bootstrap,
    })
}

/// Run the daemon until interrupted.
pub async fn run_daemon(config: DaemonConfig) -> Result<()> {
    let daemon = start_daemon(&config).await?;
    let binding = daemon.binding();
    tracing::info!(
        "[daemon] {} bound in registry {} (host service at {})",
        binding.name,
        binding.registry,
        binding.service
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("[daemon] shutting down");
    daemon.shutdown().await;
    Ok(())
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
