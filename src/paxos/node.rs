//! One Paxos node: acceptor plus proposer behind a single RPC endpoint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::debug;

use crate::rpc::server::RpcServer;

use super::acceptor::Acceptor;
use super::proposer::{Breakpoint, Proposer};
use super::PaxosCommit;

/// A running Paxos node.
///
/// Binding and identity are one step: the node's address string is its
/// `me`, used in ballots and the log file name. Dropping the node stops
/// its RPC service.
pub struct PaxosNode {
    me: String,
    acceptor: Arc<Acceptor>,
    proposer: Proposer,
    _server: RpcServer,
}

impl PaxosNode {
    /// Binds `addr` (port 0 for ephemeral), opens the durable log under
    /// `log_dir`, and starts serving. See [`Acceptor::open`] for the
    /// `first`/`initial_value` bootstrap rule.
    pub async fn start(
        addr: &str,
        log_dir: impl AsRef<Path>,
        first: bool,
        initial_value: &str,
        commit_cb: Option<Arc<dyn PaxosCommit>>,
    ) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind(addr).await?;
        let me = listener.local_addr()?.to_string();
        let log_path = log_file(log_dir.as_ref(), &me);
        let acceptor = Acceptor::open(&me, log_path, first, initial_value, commit_cb).await?;
        let proposer = Proposer::new(&me, acceptor.clone());
        let server = RpcServer::serve(listener, acceptor.clone())?;
        debug!(%me, first, "paxos node started");
        Ok(Arc::new(Self { me, acceptor, proposer, _server: server }))
    }

    /// This node's address, as used in ballots and member lists.
    pub fn me(&self) -> &str {
        &self.me
    }

    /// Proposes `value` for `instance` among `members`; true when the
    /// decide round completed.
    pub async fn propose(&self, instance: u64, members: &[String], value: &str) -> bool {
        self.proposer.run(instance, members, value).await
    }

    /// Arms a proposer test breakpoint.
    pub async fn set_breakpoint(&self, bp: Breakpoint) {
        self.proposer.set_breakpoint(bp).await
    }

    /// The highest decided instance on this node.
    pub async fn instance_h(&self) -> u64 {
        self.acceptor.instance_h().await
    }

    /// The decided value of `instance`, if known here.
    pub async fn value(&self, instance: u64) -> Option<String> {
        self.acceptor.value(instance).await
    }

    /// Raw durable log (test hook).
    pub async fn dump(&self) -> std::io::Result<String> {
        self.acceptor.dump().await
    }

    /// Replaces the durable log (test hook).
    pub async fn restore(&self, text: &str) -> std::io::Result<()> {
        self.acceptor.restore(text).await
    }
}

/// The log file for node `me` under `dir`; colons make poor file names.
fn log_file(dir: &Path, me: &str) -> PathBuf {
    dir.join(format!("paxos-{}.log", me.replace(':', "_")))
}
