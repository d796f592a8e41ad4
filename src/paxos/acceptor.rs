//! The Paxos acceptor.
//!
//! State mutations a restarted acceptor must remember are appended to the
//! durable log before the RPC reply leaves. The decide path commits the
//! value, resets the round, and delivers the [`PaxosCommit`] upcall with
//! the mutex released.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use num_traits::FromPrimitive;
use tokio::sync::Mutex;
use tracing::{debug, error, trace};

use crate::proto::paxos::{AcceptArgs, Ballot, DecideArgs, PrepareArgs, PrepareRes};
use crate::proto::{PaxosMethod, Status};
use crate::rpc::RpcService;
use crate::wire::emit;

use super::log::{AcceptorState, Log};
use super::PaxosCommit;

struct Inner {
    state: AcceptorState,
    log: Log,
}

/// One node's acceptor role.
pub struct Acceptor {
    me: String,
    inner: Mutex<Inner>,
    commit_cb: Option<Arc<dyn PaxosCommit>>,
}

impl Acceptor {
    /// Opens the acceptor for node `me`, replaying `log_path`. A `first`
    /// node with a fresh log seeds instance 1 with `initial_value` (the
    /// bootstrap membership).
    pub async fn open(
        me: &str,
        log_path: impl Into<PathBuf>,
        first: bool,
        initial_value: &str,
        commit_cb: Option<Arc<dyn PaxosCommit>>,
    ) -> std::io::Result<Arc<Self>> {
        let (mut log, mut state) = Log::open(log_path, me).await?;
        if state.instance_h == 0 && first {
            state.values.insert(1, initial_value.to_owned());
            log.log_instance(1, initial_value).await?;
            state.instance_h = 1;
            debug!(%me, %initial_value, "seeded first instance");
        }
        Ok(Arc::new(Self {
            me: me.to_owned(),
            inner: Mutex::new(Inner { state, log }),
            commit_cb,
        }))
    }

    /// The highest prepare ballot seen; the proposer picks above it.
    pub async fn n_h(&self) -> Ballot {
        self.inner.lock().await.state.n_h.clone()
    }

    /// The highest decided instance.
    pub async fn instance_h(&self) -> u64 {
        self.inner.lock().await.state.instance_h
    }

    /// The decided value of `instance`, if this node has it.
    pub async fn value(&self, instance: u64) -> Option<String> {
        self.inner.lock().await.state.values.get(&instance).cloned()
    }

    /// Handles `preparereq`.
    pub async fn prepare(&self, instance: u64, n: Ballot) -> PrepareRes {
        let mut inner = self.inner.lock().await;
        if instance <= inner.state.instance_h {
            trace!(instance, "prepare for old instance");
            return PrepareRes {
                oldinstance: true,
                accept: false,
                n_a: Ballot::default(),
                v_a: inner.state.values.get(&instance).cloned().unwrap_or_default(),
            };
        }
        if n > inner.state.n_h {
            let previous = std::mem::replace(&mut inner.state.n_h, n);
            let n_h = inner.state.n_h.clone();
            if let Err(err) = inner.log.log_high(&n_h).await {
                error!(?err, "paxos log write failed");
                inner.state.n_h = previous;
                return PrepareRes::default();
            }
            trace!(instance, n = n_h.n, "promised");
            return PrepareRes {
                oldinstance: false,
                accept: true,
                n_a: inner.state.n_a.clone(),
                v_a: inner.state.v_a.clone(),
            };
        }
        trace!(instance, "prepare rejected");
        PrepareRes::default()
    }

    /// Handles `acceptreq`; true when the proposal is accepted.
    pub async fn accept(&self, instance: u64, n: Ballot, v: String) -> bool {
        let mut inner = self.inner.lock().await;
        if instance <= inner.state.instance_h || n < inner.state.n_h {
            trace!(instance, "accept rejected");
            return false;
        }
        if let Err(err) = inner.log.log_prop(&n, &v).await {
            error!(?err, "paxos log write failed");
            return false;
        }
        inner.state.n_a = n;
        inner.state.v_a = v;
        trace!(instance, n = inner.state.n_a.n, "accepted");
        true
    }

    /// Handles `decidereq`; true when `instance_h` advanced.
    pub async fn decide(&self, instance: u64, v: String) -> bool {
        self.commit(instance, v).await
    }

    /// Commits a decided value (from a decide RPC, or learned through an
    /// `oldinstance` prepare reply). Fires the upcall without the mutex.
    pub async fn commit(&self, instance: u64, value: String) -> bool {
        {
            let mut inner = self.inner.lock().await;
            if instance <= inner.state.instance_h {
                return false;
            }
            if let Err(err) = inner.log.log_instance(instance, &value).await {
                error!(?err, "paxos log write failed");
                return false;
            }
            inner.state.values.insert(instance, value.clone());
            inner.state.instance_h = instance;
            inner.state.reset_round(&self.me);
            debug!(instance, %value, "instance decided");
        }
        if let Some(cb) = &self.commit_cb {
            cb.paxos_commit(instance, &value).await;
        }
        true
    }

    /// Returns the raw durable log (test hook).
    pub async fn dump(&self) -> std::io::Result<String> {
        self.inner.lock().await.log.dump().await
    }

    /// Replaces the durable log and in-memory state (test hook).
    pub async fn restore(&self, text: &str) -> std::io::Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = inner.log.restore(text, &self.me).await?;
        Ok(())
    }
}

#[async_trait]
impl RpcService for Acceptor {
    async fn dispatch(&self, method: u32, body: Vec<u8>) -> (Status, Vec<u8>) {
        let mut src = Cursor::new(body);
        match PaxosMethod::from_u32(method) {
            Some(PaxosMethod::PrepareReq) => match PrepareArgs::decode(&mut src) {
                Ok(args) => {
                    let res = self.prepare(args.instance, args.n).await;
                    let mut body = Vec::new();
                    let _ = res.encode(&mut body);
                    (Status::Ok, body)
                }
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            Some(PaxosMethod::AcceptReq) => match AcceptArgs::decode(&mut src) {
                Ok(args) => {
                    let accepted = self.accept(args.instance, args.n, args.v).await;
                    let mut body = Vec::new();
                    let _ = emit::u32(&mut body, u32::from(accepted));
                    (Status::Ok, body)
                }
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            Some(PaxosMethod::DecideReq) => match DecideArgs::decode(&mut src) {
                Ok(args) => {
                    let advanced = self.decide(args.instance, args.v).await;
                    let mut body = Vec::new();
                    let _ = emit::u32(&mut body, u32::from(advanced));
                    (Status::Ok, body)
                }
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            None => (Status::RpcErr, Vec::new()),
        }
    }
}
