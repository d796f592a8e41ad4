//! The filesystem client binary.
//!
//! Builds the client stack (extent cache, lock client, filesystem layer)
//! and probes the root directory. The kernel userspace-filesystem bridge
//! attaches through the library API; this process parks until
//! interrupted, then returns its cached locks.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use extentfs::fs::{DfsClient, ROOT_INUM};

/// Mounts the distributed filesystem against an extent and lock server.
#[derive(Parser, Debug)]
#[command(name = "dfs-client")]
struct Args {
    /// Mount point handed to the filesystem bridge.
    mountpoint: PathBuf,

    /// Extent server port, or `host:port`.
    extent_server: String,

    /// Lock server port, or `host:port`.
    lock_server: String,
}

/// A bare port means the local host.
fn endpoint(target: &str) -> String {
    if target.contains(':') {
        target.to_owned()
    } else {
        format!("127.0.0.1:{target}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let extent_dst = endpoint(&args.extent_server);
    let lock_dst = endpoint(&args.lock_server);
    let client = DfsClient::start(&extent_dst, &lock_dst)
        .await
        .context("cannot start filesystem client")?;

    let root = client.getdir(ROOT_INUM).await;
    anyhow::ensure!(root.is_ok(), "cannot reach the root directory; are the servers up?");
    info!(
        mountpoint = %args.mountpoint.display(),
        extent = %extent_dst,
        lock = %lock_dst,
        "filesystem client ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("unmounting");
    client.shutdown().await;
    Ok(())
}
