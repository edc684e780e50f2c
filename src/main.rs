mod client;
mod config;
mod daemon;
mod host;
mod logging;
mod paths;
mod provider;
mod registry;
mod rpc;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use client::RemoteHost;
use config::DaemonConfig;
use logging::{LogConfig, LogFormat, LogLevel};
use rpc::{Endpoint, ProcessId};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "perfstatd")]
#[command(about = "Serves instrumentation buffers of local processes to remote monitors")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.perfstatd/config.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error, off
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format: human or json
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default)
    Serve(ServeArgs),
    /// List instrumented processes on a remote host
    List(RemoteArgs),
    /// Attach to a process and dump its instrumentation buffer
    Dump(DumpArgs),
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Do not create a registry when none is listening
    #[arg(long)]
    no_registry: bool,

    /// Registry port
    #[arg(short = 'p', long)]
    registry_port: Option<u16>,

    /// Port for the host service
    #[arg(long)]
    host_port: Option<u16>,

    /// Port for exported sessions
    #[arg(long)]
    session_port: Option<u16>,

    /// Name the host service is bound under
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Directory containing hsperfdata_* directories
    #[arg(long)]
    perfdata_root: Option<PathBuf>,

    /// Also write JSON logs to ~/.perfstatd/perfstatd.log
    #[arg(long)]
    log_file: bool,
}

#[derive(Args)]
struct RemoteArgs {
    /// Registry address as host:port
    #[arg(long, default_value = "127.0.0.1:1099")]
    registry: String,

    /// Name the host service is bound under
    #[arg(short = 'n', long, default_value = config::DEFAULT_SERVICE_NAME)]
    name: String,

    /// Print JSON instead of one pid per line
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DumpArgs {
    /// Process to attach to
    pid: u32,

    #[command(flatten)]
    remote: RemoteArgs,

    /// Access mode passed to the provider
    #[arg(long)]
    mode: Option<String>,

    /// Write the buffer to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, config: &mut DaemonConfig) {
        if self.no_registry {
            config.auto_create_registry = false;
        }
        if let Some(port) = self.registry_port {
            config.registry_port = port;
        }
        if let Some(port) = self.host_port {
            config.host_port = port;
        }
        if let Some(port) = self.session_port {
            config.session_port = port;
        }
        if let Some(name) = &self.name {
            config.service_name = name.clone();
        }
        if let Some(root) = &self.perfdata_root {
            config.perfdata_root = Some(root.clone());
        }
        if self.log_file {
            config.log_to_file = true;
        }
    }
}

fn parse_registry(addr: &str) -> Result<Endpoint> {
    let (host, port) = addr
        .rsplit_once(':')
        .with_context(|| format!("Registry address must be host:port, got '{}'", addr))?;
    let port = port
        .parse()
        .with_context(|| format!("Invalid registry port in '{}'", addr))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(Endpoint::new(host, port))
}

async fn list(args: &RemoteArgs) -> Result<()> {
    let host = RemoteHost::lookup(&parse_registry(&args.registry)?, &args.name).await?;
    let active = host.active_vms().await?;

    if args.json {
        println!("{}", serde_json::to_string(&active)?);
    } else {
        for pid in active {
            println!("{}", pid);
        }
    }
    Ok(())
}

async fn dump(args: &DumpArgs) -> Result<()> {
    let host = RemoteHost::lookup(&parse_registry(&args.remote.registry)?, &args.remote.name)
        .await?;
    let session = host
        .attach(ProcessId(args.pid), args.mode.as_deref())
        .await?;

    let result = write_dump(args, &session).await;
    let detached = host.detach(session).await;
    result.and(detached)
}

async fn write_dump(args: &DumpArgs, session: &client::RemoteSession) -> Result<()> {
    let capacity = session.capacity().await?;
    let bytes = session.bytes().await?;

    if args.remote.json {
        let summary = serde_json::json!({
            "pid": args.pid,
            "capacity": capacity,
            "length": bytes.len(),
        });
        println!("{}", summary);
    } else {
        println!("pid {}: capacity {} bytes, {} bytes read", args.pid, capacity, bytes.len());
    }

    if let Some(path) = &args.output {
        std::fs::write(path, &bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Client commands log to stderr only; stdout carries their output.
fn init_tool_logging(config: &DaemonConfig) -> Result<()> {
    logging::init_logging(&LogConfig {
        level: config.log_level,
        format: config.log_format,
        file: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    match cli.command.unwrap_or(Command::Serve(ServeArgs::default())) {
        Command::Serve(args) => {
            args.apply(&mut config);
            config.validate()?;
            logging::init_logging(&config.log_config()?)?;

            if let Err(e) = daemon::run_daemon(config).await {
                tracing::error!("[daemon] {:#}", e);
                std::process::exit(1);
            }
            Ok(())
        }
        Command::List(args) => {
            init_tool_logging(&config)?;
            list(&args).await
        }
        Command::Dump(args) => {
            init_tool_logging(&config)?;
            dump(&args).await
        }
    }
}
