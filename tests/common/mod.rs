//! Shared fixtures: real servers on ephemeral ports, temp-dir backed.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;

use extentfs::extent::server::ExtentServer;
use extentfs::lock::server::LockServer;
use extentfs::rpc::server::RpcServer;

/// Generous bound for awaiting cross-task protocol steps.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// An extent server plus a lock server, each on an ephemeral port.
pub struct Cluster {
    pub extent_dir: TempDir,
    pub extent_server: Arc<ExtentServer>,
    pub lock_server: Arc<LockServer>,
    extent_rpc: RpcServer,
    lock_rpc: RpcServer,
}

impl Cluster {
    pub async fn start() -> Self {
        let extent_dir = TempDir::new().expect("create temp dir");
        let extent_server = ExtentServer::open(extent_dir.path()).await.expect("open store");
        let extent_rpc =
            RpcServer::bind("127.0.0.1:0", extent_server.clone()).await.expect("bind extent");
        let lock_server = LockServer::new();
        let lock_rpc = RpcServer::bind("127.0.0.1:0", lock_server.clone()).await.expect("bind lock");
        Self { extent_dir, extent_server, lock_server, extent_rpc, lock_rpc }
    }

    pub fn extent_addr(&self) -> String {
        self.extent_rpc.local_addr().to_string()
    }

    pub fn lock_addr(&self) -> String {
        self.lock_rpc.local_addr().to_string()
    }
}

/// Reserves a local port by binding and immediately dropping a listener.
#[allow(dead_code)]
pub async fn free_port_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").to_string()
}
