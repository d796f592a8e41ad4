//! The extent server binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use extentfs::extent::server::ExtentServer;
use extentfs::rpc::server::RpcServer;
use extentfs::settings::ServerSettings;

/// Durable extent store for the distributed filesystem.
#[derive(Parser, Debug)]
#[command(name = "extent-server")]
struct Args {
    /// TCP port to listen on.
    port: u16,

    /// Working directory holding the ID/ subtree.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Path to a TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let settings = ServerSettings::load_optional(args.config.as_deref())?;

    let dir = settings.extent_dir.unwrap_or(args.dir);
    let server = ExtentServer::open(&dir)
        .await
        .with_context(|| format!("cannot open extent store in {}", dir.display()))?;

    let listen = format!("{}:{}", settings.listen.as_deref().unwrap_or("0.0.0.0"), args.port);
    let rpc = RpcServer::bind(&listen, server).await.with_context(|| format!("cannot bind {listen}"))?;
    info!(addr = %rpc.local_addr(), dir = %dir.display(), "extent server ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
