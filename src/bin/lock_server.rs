//! The lock server binary.
//!
//! With a `[paxos]` section in the settings file the node also runs the
//! replicated configuration layer: it starts its Paxos instance, learns
//! the agreed membership, and proposes itself into the view when absent.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use extentfs::config::ViewManager;
use extentfs::lock::server::LockServer;
use extentfs::rpc::server::RpcServer;
use extentfs::settings::ServerSettings;

/// Cache-coherent lock service for the distributed filesystem.
#[derive(Parser, Debug)]
#[command(name = "lock-server")]
struct Args {
    /// TCP port to listen on.
    port: u16,

    /// Path to a TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let settings = ServerSettings::load_optional(args.config.as_deref())?;

    let server = LockServer::new();
    let listen = format!("{}:{}", settings.listen.as_deref().unwrap_or("0.0.0.0"), args.port);
    let rpc = RpcServer::bind(&listen, server).await.with_context(|| format!("cannot bind {listen}"))?;
    info!(addr = %rpc.local_addr(), "lock server ready");

    // The configuration layer is optional; a standalone lock server is a
    // view of one.
    let _views = match settings.paxos {
        Some(paxos) => {
            let log_dir = paxos.log_dir.clone().unwrap_or_else(|| PathBuf::from("."));
            let first = paxos.members.first() == Some(&paxos.listen);
            let views = ViewManager::start(&paxos.listen, &log_dir, first, &paxos.members)
                .await
                .context("cannot start paxos node")?;
            let (instance, members) = views.latest().await;
            info!(instance, ?members, me = views.me(), "membership view");
            if !members.is_empty() && !members.contains(&views.me().to_owned()) {
                let mut wanted = members.clone();
                wanted.push(views.me().to_owned());
                if views.propose_view(&wanted).await {
                    info!(?wanted, "joined the view");
                } else {
                    warn!("could not join the view; serving anyway");
                }
            }
            Some(views)
        }
        None => None,
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
