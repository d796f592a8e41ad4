//! The caching lock server.
//!
//! Each lock runs a four-state grant machine (free, locked, revoked,
//! retried). When a waiter shows up for a granted lock, a revoke is
//! queued to the holder; when a revoked lock comes back, a retry is
//! queued to the head waiter, which then re-issues its acquire. Both
//! callback kinds are delivered by dedicated dispatcher tasks so the
//! lock map's mutex is never held across an outbound RPC.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use num_traits::FromPrimitive;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::proto::lock::{CallbackArgs, LockArgs};
use crate::proto::{LockId, LockMethod, RlockMethod, Status, Xid};
use crate::rpc::client::RpcClient;
use crate::rpc::RpcService;
use crate::wire::{emit, parse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrantState {
    /// Nobody owns the lock and no grant is outstanding.
    Free,
    /// Owned by `holder`; no waiter.
    Locked,
    /// Owned by `holder`; waiters queued; a revoke is queued or sent.
    Revoked,
    /// Granted to `holder` by a release; its follow-up acquire is due.
    Retried,
}

struct LockRec {
    state: GrantState,
    holder: String,
    holder_xid: Xid,
    waiters: VecDeque<String>,
    waiter_xids: HashMap<String, Xid>,
}

impl LockRec {
    fn new() -> Self {
        Self {
            state: GrantState::Free,
            holder: String::new(),
            holder_xid: 0,
            waiters: VecDeque::new(),
            waiter_xids: HashMap::new(),
        }
    }
}

/// A queued revoke or retry: destination client, lock, and the tag the
/// client uses to order the callback against its acquire.
struct CallbackJob {
    dst: String,
    lid: LockId,
    xxid: Xid,
}

type ClientPool = Arc<DashMap<String, Arc<RpcClient>>>;

/// The lock server's grant state machines plus callback dispatch.
pub struct LockServer {
    locks: Mutex<HashMap<LockId, LockRec>>,
    revoke_send: UnboundedSender<CallbackJob>,
    retry_send: UnboundedSender<CallbackJob>,
    acquire_calls: AtomicU64,
}

impl LockServer {
    /// Creates the server and spawns its revoker and retryer tasks.
    pub fn new() -> Arc<Self> {
        let clients: ClientPool = Arc::new(DashMap::new());
        let (revoke_send, revoke_recv) = mpsc::unbounded_channel();
        let (retry_send, retry_recv) = mpsc::unbounded_channel();
        CallbackTask::spawn(revoke_recv, clients.clone(), RlockMethod::Revoke);
        CallbackTask::spawn(retry_recv, clients, RlockMethod::Retry);
        Arc::new(Self {
            locks: Mutex::new(HashMap::new()),
            revoke_send,
            retry_send,
            acquire_calls: AtomicU64::new(0),
        })
    }

    /// How many acquire RPCs this server has served.
    pub fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::Relaxed)
    }

    /// Handles an acquire RPC: `Ok` grants the lock, `Retry` promises a
    /// retry callback once it is the caller's turn.
    pub async fn acquire(&self, lid: LockId, client: &str, xid: Xid) -> Status {
        self.acquire_calls.fetch_add(1, Ordering::Relaxed);
        let mut locks = self.locks.lock().await;
        let rec = locks.entry(lid).or_insert_with(LockRec::new);
        debug!(lid, client, xid, state = ?rec.state, "acquire");

        match rec.state {
            GrantState::Free => {
                rec.state = GrantState::Locked;
                rec.holder = client.to_owned();
                rec.holder_xid = xid;
                Status::Ok
            }
            GrantState::Locked => {
                if rec.holder == client && rec.holder_xid == xid {
                    // Duplicate of the acquire that granted the lock.
                    return Status::Ok;
                }
                Self::enqueue_waiter(rec, client, xid);
                rec.state = GrantState::Revoked;
                let job =
                    CallbackJob { dst: rec.holder.clone(), lid, xxid: rec.holder_xid + 1 };
                let _ = self.revoke_send.send(job);
                Status::Retry
            }
            GrantState::Revoked => {
                if rec.holder == client && rec.holder_xid == xid {
                    return Status::Ok;
                }
                // A revoke is already in flight; just queue up.
                Self::enqueue_waiter(rec, client, xid);
                Status::Retry
            }
            GrantState::Retried => {
                if rec.holder == client {
                    // The client the retry was sent to; the grant lands.
                    rec.state = GrantState::Locked;
                    rec.holder_xid = xid;
                    if !rec.waiters.is_empty() {
                        rec.state = GrantState::Revoked;
                        let job = CallbackJob { dst: client.to_owned(), lid, xxid: xid + 1 };
                        let _ = self.revoke_send.send(job);
                    }
                    Status::Ok
                } else {
                    Self::enqueue_waiter(rec, client, xid);
                    Status::Retry
                }
            }
        }
    }

    /// Handles a release RPC. The caller must be the current holder with
    /// the xid of the grant.
    pub async fn release(&self, lid: LockId, client: &str, xid: Xid) -> Status {
        let mut locks = self.locks.lock().await;
        let Some(rec) = locks.get_mut(&lid) else {
            warn!(lid, client, "release of unknown lock");
            return Status::Noent;
        };
        if rec.holder != client || rec.holder_xid != xid {
            warn!(lid, client, xid, "release from non-holder");
            return Status::Noent;
        }
        if rec.state != GrantState::Locked && rec.state != GrantState::Revoked {
            return Status::Noent;
        }
        debug!(lid, client, xid, "release");

        match rec.waiters.pop_front() {
            None => {
                rec.state = GrantState::Free;
                rec.holder.clear();
            }
            Some(next) => {
                // Hand the lock to the head waiter and tell it to come
                // get it.
                let waiter_xid = rec.waiter_xids.remove(&next).unwrap_or(0);
                rec.holder = next.clone();
                rec.state = GrantState::Retried;
                debug!(lid, next = %next, "queueing retry");
                let _ = self.retry_send.send(CallbackJob { dst: next, lid, xxid: waiter_xid + 1 });
            }
        }
        Status::Ok
    }

    /// Handles a stat RPC. Under the caching protocol the server has no
    /// meaningful per-lock count; it answers zero.
    pub fn stat(&self, _lid: LockId) -> u64 {
        0
    }

    fn enqueue_waiter(rec: &mut LockRec, client: &str, xid: Xid) {
        // A duplicate acquire from a queued waiter refreshes its xid but
        // must not queue it twice.
        if rec.waiter_xids.insert(client.to_owned(), xid).is_none() {
            rec.waiters.push_back(client.to_owned());
        }
    }
}

#[async_trait]
impl RpcService for LockServer {
    async fn dispatch(&self, method: u32, body: Vec<u8>) -> (Status, Vec<u8>) {
        let mut src = Cursor::new(body);
        match LockMethod::from_u32(method) {
            Some(LockMethod::Acquire) => match LockArgs::decode(&mut src) {
                Ok(args) => (self.acquire(args.lid, &args.client, args.xid).await, Vec::new()),
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            Some(LockMethod::Release) => match LockArgs::decode(&mut src) {
                Ok(args) => (self.release(args.lid, &args.client, args.xid).await, Vec::new()),
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            Some(LockMethod::Stat) => match parse::u64(&mut src) {
                Ok(lid) => {
                    let mut body = Vec::new();
                    let _ = emit::u64(&mut body, self.stat(lid));
                    (Status::Ok, body)
                }
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            None => {
                warn!(method, "unknown lock method");
                (Status::RpcErr, Vec::new())
            }
        }
    }
}

/// Dispatcher loop delivering one kind of callback (revoke or retry) to
/// lock clients, one RPC at a time.
struct CallbackTask {
    jobs: UnboundedReceiver<CallbackJob>,
    clients: ClientPool,
    method: RlockMethod,
}

impl CallbackTask {
    fn spawn(
        jobs: UnboundedReceiver<CallbackJob>,
        clients: ClientPool,
        method: RlockMethod,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { jobs, clients, method }.run())
    }

    async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            let cl = self
                .clients
                .entry(job.dst.clone())
                .or_insert_with(|| Arc::new(RpcClient::new(job.dst.clone())))
                .clone();
            let mut body = Vec::new();
            let _ = CallbackArgs { lid: job.lid, xxid: job.xxid }.encode(&mut body);
            debug!(lid = job.lid, dst = %job.dst, xxid = job.xxid, method = ?self.method, "callback");
            if let Err(err) = cl.call(self.method as u32, &body).await {
                warn!(lid = job.lid, dst = %job.dst, ?err, "callback failed");
            }
        }
    }
}
