//! The caching lock client.
//!
//! Each lock is cached in one of six states; once a lock reaches `Free`
//! the client serves repeat acquires without a server round-trip. The
//! client hosts a callback service for the server's `revoke` and `retry`
//! messages, and a releaser task that flushes and returns revoked locks.
//!
//! Callbacks can overtake the acquire reply they pertain to. Every
//! callback carries the acquire's xid plus one; a callback whose tag does
//! not match the lock's current `xxid` parks on the lock's ordering
//! barrier until the acquiring task advances it.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use num_traits::FromPrimitive;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::proto::lock::{CallbackArgs, LockArgs};
use crate::proto::{LockId, LockMethod, RlockMethod, Status, Xid};
use crate::rpc::client::RpcClient;
use crate::rpc::server::RpcServer;
use crate::rpc::RpcService;

use super::Flusher;

/// Cache state of one lock at this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    /// Never acquired, or fully released back to the server.
    None,
    /// An acquire RPC is outstanding, or a retry is awaited.
    Acquiring,
    /// This client owns the lock; no local task holds it.
    Free,
    /// This client owns the lock; a local task holds it.
    Locked,
    /// Owned and held, but the server wants it back.
    Revoked,
    /// Queued on the releaser for return to the server.
    Releasing,
}

/// A waiter queue standing in for a condition variable: register under
/// the cache mutex, drop the guard, await. Woken tasks re-validate.
#[derive(Default)]
struct Condvar {
    waiters: Vec<oneshot::Sender<()>>,
}

impl Condvar {
    fn register(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    fn notify_one(&mut self) {
        while let Some(tx) = self.waiters.pop() {
            if tx.send(()).is_ok() {
                break;
            }
        }
    }

    fn notify_all(&mut self) {
        for tx in self.waiters.drain(..) {
            let _ = tx.send(());
        }
    }
}

struct LockEntry {
    state: CacheState,
    /// Sequence number of this lock's next (or in-flight) acquire.
    xid: Xid,
    /// Tag expected on the next callback: the last processed acquire's
    /// xid plus one. Callbacks with other tags park on `order_cond`.
    xxid: Xid,
    /// Set by the retry handler; consumed by the acquiring task.
    retry_ready: bool,
    state_cond: Condvar,
    retry_cond: Condvar,
    order_cond: Condvar,
}

impl Default for LockEntry {
    fn default() -> Self {
        Self {
            state: CacheState::None,
            xid: 0,
            xxid: 0,
            retry_ready: false,
            state_cond: Condvar::default(),
            retry_cond: Condvar::default(),
            order_cond: Condvar::default(),
        }
    }
}

enum ReleaseJob {
    Release(LockId),
    Shutdown,
}

type LockMap = Arc<Mutex<HashMap<LockId, LockEntry>>>;

/// Caching client for one lock server.
pub struct LockClient {
    /// This client's identity: the `host:port` its callback service bound.
    id: String,
    server: Arc<RpcClient>,
    locks: LockMap,
    release_send: UnboundedSender<ReleaseJob>,
    flusher: Option<Arc<dyn Flusher>>,
    releaser: Mutex<Option<JoinHandle<()>>>,
    callback: std::sync::OnceLock<RpcServer>,
}

impl LockClient {
    /// Connects to the lock server at `server_dst`, binds the callback
    /// service on an ephemeral local port, and spawns the releaser.
    pub async fn start(
        server_dst: &str,
        flusher: Option<Arc<dyn Flusher>>,
    ) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let id = listener.local_addr()?.to_string();
        let server = Arc::new(RpcClient::new(server_dst));
        let locks: LockMap = Arc::new(Mutex::new(HashMap::new()));
        let (release_send, release_recv) = mpsc::unbounded_channel();

        let client = Arc::new(Self {
            id: id.clone(),
            server: server.clone(),
            locks: locks.clone(),
            release_send,
            flusher: flusher.clone(),
            releaser: Mutex::new(None),
            callback: std::sync::OnceLock::new(),
        });

        let releaser = ReleaseTask::spawn(release_recv, server, locks, flusher, id);
        *client.releaser.lock().await = Some(releaser);

        let callback = RpcServer::serve(listener, client.clone())?;
        client.callback.set(callback).map_err(|_| std::io::Error::other("callback set twice"))?;
        debug!(id = %client.id, "lock client started");
        Ok(client)
    }

    /// This client's identity as known to the lock server.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquires `lid` for the calling task, contacting the server only
    /// when the lock is not already cached.
    pub async fn acquire(&self, lid: LockId) -> super::Result<()> {
        enum Plan {
            Granted,
            Send { xid: Xid },
            Wait(oneshot::Receiver<()>),
        }

        loop {
            let plan = {
                let mut locks = self.locks.lock().await;
                let entry = locks.entry(lid).or_default();
                match entry.state {
                    CacheState::Free => {
                        // Cached and idle: reclaim locally.
                        entry.state = CacheState::Locked;
                        Plan::Granted
                    }
                    CacheState::None => {
                        entry.state = CacheState::Acquiring;
                        entry.retry_ready = false;
                        Plan::Send { xid: entry.xid }
                    }
                    _ => Plan::Wait(entry.state_cond.register()),
                }
            };
            match plan {
                Plan::Granted => {
                    trace!(lid, "acquired from cache");
                    return Ok(());
                }
                Plan::Wait(rx) => {
                    let _ = rx.await;
                }
                Plan::Send { xid } => return self.acquire_from_server(lid, xid).await,
            }
        }
    }

    async fn acquire_from_server(&self, lid: LockId, xid: Xid) -> super::Result<()> {
        debug!(lid, xid, "acquiring from server");
        let status = match self.call_acquire(lid, xid).await {
            Ok(status) => status,
            Err(status) => {
                self.abort_acquire(lid).await;
                return Err(status);
            }
        };

        {
            let mut locks = self.locks.lock().await;
            if let Some(entry) = locks.get_mut(&lid) {
                // The reply is processed: advance the callback tag and
                // wake anything parked on the ordering barrier.
                entry.xxid = xid + 1;
                entry.order_cond.notify_all();
                if status == Status::Ok {
                    entry.state = CacheState::Locked;
                }
            }
        }
        match status {
            Status::Ok => {
                debug!(lid, "granted by server");
                return Ok(());
            }
            Status::Retry => {}
            other => {
                self.abort_acquire(lid).await;
                return Err(other);
            }
        }

        // RETRY: wait for the server's retry callback, then re-send with
        // the next xid. The lock was handed to this client, so the second
        // attempt lands.
        let xid = loop {
            let ready = {
                let mut locks = self.locks.lock().await;
                let Some(entry) = locks.get_mut(&lid) else { return Err(Status::RpcErr) };
                if entry.retry_ready {
                    entry.retry_ready = false;
                    entry.xid += 1;
                    Ok(entry.xid)
                } else {
                    Err(entry.retry_cond.register())
                }
            };
            match ready {
                Ok(xid) => break xid,
                Err(rx) => {
                    trace!(lid, "waiting for retry callback");
                    let _ = rx.await;
                }
            }
        };

        debug!(lid, xid, "re-acquiring after retry");
        if let Err(status) = self.call_acquire(lid, xid).await {
            self.abort_acquire(lid).await;
            return Err(status);
        }
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get_mut(&lid) {
            entry.xxid = xid + 1;
            entry.order_cond.notify_all();
            entry.state = CacheState::Locked;
        }
        Ok(())
    }

    async fn call_acquire(&self, lid: LockId, xid: Xid) -> super::Result<Status> {
        let mut body = Vec::new();
        let _ = LockArgs { lid, client: self.id.clone(), xid }.encode(&mut body);
        let (status, _) = self
            .server
            .call(LockMethod::Acquire as u32, &body)
            .await
            .map_err(|_| Status::RpcErr)?;
        Ok(status)
    }

    /// Rolls a failed acquire back to `None` so other local tasks can
    /// start over.
    async fn abort_acquire(&self, lid: LockId) {
        let mut locks = self.locks.lock().await;
        if let Some(entry) = locks.get_mut(&lid) {
            entry.state = CacheState::None;
            entry.state_cond.notify_one();
        }
    }

    /// Releases `lid` locally. A revoked lock is queued for the releaser;
    /// an uncontended one stays cached as `Free`.
    pub async fn release(&self, lid: LockId) -> super::Result<()> {
        let mut locks = self.locks.lock().await;
        let Some(entry) = locks.get_mut(&lid) else {
            warn!(lid, "release of unknown lock");
            return Err(Status::Noent);
        };
        match entry.state {
            CacheState::Locked => {
                entry.state = CacheState::Free;
                entry.state_cond.notify_one();
                Ok(())
            }
            CacheState::Revoked => {
                debug!(lid, "releasing revoked lock to server");
                entry.state = CacheState::Releasing;
                let _ = self.release_send.send(ReleaseJob::Release(lid));
                Ok(())
            }
            _ => {
                warn!(lid, state = ?entry.state, "release in invalid state");
                Err(Status::Noent)
            }
        }
    }

    /// Handles a revoke callback from the server.
    pub async fn revoke(&self, lid: LockId, xxid: Xid) -> Status {
        loop {
            let rx = {
                let mut locks = self.locks.lock().await;
                let Some(entry) = locks.get_mut(&lid) else {
                    warn!(lid, "revoke of unknown lock");
                    return Status::RpcErr;
                };
                if entry.xxid != xxid {
                    // The revoke overtook the acquire it pertains to;
                    // park until the acquire is processed.
                    trace!(lid, xxid, current = entry.xxid, "revoke out of order");
                    entry.order_cond.register()
                } else {
                    return match entry.state {
                        CacheState::Free => {
                            debug!(lid, "revoking idle lock");
                            entry.state = CacheState::Releasing;
                            let _ = self.release_send.send(ReleaseJob::Release(lid));
                            Status::Ok
                        }
                        CacheState::Locked => {
                            debug!(lid, "revoking held lock");
                            entry.state = CacheState::Revoked;
                            Status::Ok
                        }
                        _ => {
                            warn!(lid, state = ?entry.state, "revoke in invalid state");
                            Status::RpcErr
                        }
                    };
                }
            };
            let _ = rx.await;
        }
    }

    /// Handles a retry callback from the server.
    pub async fn retry(&self, lid: LockId, xxid: Xid) -> Status {
        loop {
            let rx = {
                let mut locks = self.locks.lock().await;
                let Some(entry) = locks.get_mut(&lid) else {
                    warn!(lid, "retry of unknown lock");
                    return Status::RpcErr;
                };
                if entry.xxid != xxid {
                    trace!(lid, xxid, current = entry.xxid, "retry out of order");
                    entry.order_cond.register()
                } else if entry.state == CacheState::Acquiring {
                    entry.retry_ready = true;
                    entry.retry_cond.notify_all();
                    return Status::Ok;
                } else {
                    warn!(lid, state = ?entry.state, "retry in invalid state");
                    return Status::RpcErr;
                }
            };
            let _ = rx.await;
        }
    }

    /// Drains the releaser and returns every idle cached lock to the
    /// server. The client must not be used afterwards.
    pub async fn shutdown(&self) {
        let _ = self.release_send.send(ReleaseJob::Shutdown);
        if let Some(handle) = self.releaser.lock().await.take() {
            let _ = handle.await;
        }

        let mut free = Vec::new();
        {
            let mut locks = self.locks.lock().await;
            for (lid, entry) in locks.iter_mut() {
                if entry.state == CacheState::Free {
                    entry.state = CacheState::None;
                    free.push((*lid, entry.xid));
                }
            }
        }
        for (lid, xid) in free {
            if let Some(flusher) = &self.flusher {
                if let Err(status) = flusher.flush(lid).await {
                    warn!(lid, ?status, "flush during shutdown failed");
                }
            }
            let mut body = Vec::new();
            let _ = LockArgs { lid, client: self.id.clone(), xid }.encode(&mut body);
            if let Err(err) = self.server.call(LockMethod::Release as u32, &body).await {
                warn!(lid, ?err, "release during shutdown failed");
            }
        }
        debug!(id = %self.id, "lock client shut down");
    }
}

#[async_trait]
impl RpcService for LockClient {
    async fn dispatch(&self, method: u32, body: Vec<u8>) -> (Status, Vec<u8>) {
        let mut src = Cursor::new(body);
        match RlockMethod::from_u32(method) {
            Some(RlockMethod::Revoke) => match CallbackArgs::decode(&mut src) {
                Ok(args) => (self.revoke(args.lid, args.xxid).await, Vec::new()),
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            Some(RlockMethod::Retry) => match CallbackArgs::decode(&mut src) {
                Ok(args) => (self.retry(args.lid, args.xxid).await, Vec::new()),
                Err(_) => (Status::RpcErr, Vec::new()),
            },
            None => {
                warn!(method, "unknown callback method");
                (Status::RpcErr, Vec::new())
            }
        }
    }
}

/// Releaser loop: flushes dirty state covered by a revoked lock, sends
/// the release RPC, and retires the cache entry.
struct ReleaseTask {
    jobs: UnboundedReceiver<ReleaseJob>,
    server: Arc<RpcClient>,
    locks: LockMap,
    flusher: Option<Arc<dyn Flusher>>,
    id: String,
}

impl ReleaseTask {
    fn spawn(
        jobs: UnboundedReceiver<ReleaseJob>,
        server: Arc<RpcClient>,
        locks: LockMap,
        flusher: Option<Arc<dyn Flusher>>,
        id: String,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { jobs, server, locks, flusher, id }.run())
    }

    async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            let lid = match job {
                ReleaseJob::Release(lid) => lid,
                ReleaseJob::Shutdown => break,
            };
            let xid = {
                let locks = self.locks.lock().await;
                match locks.get(&lid) {
                    Some(entry) => entry.xid,
                    None => continue,
                }
            };

            // Dirty data must reach the extent server before the lock
            // changes hands.
            if let Some(flusher) = &self.flusher {
                if let Err(status) = flusher.flush(lid).await {
                    warn!(lid, ?status, "flush before release failed");
                }
            }

            let mut body = Vec::new();
            let _ = LockArgs { lid, client: self.id.clone(), xid }.encode(&mut body);
            if let Err(err) = self.server.call(LockMethod::Release as u32, &body).await {
                warn!(lid, ?err, "release RPC failed");
            }

            let mut locks = self.locks.lock().await;
            if let Some(entry) = locks.get_mut(&lid) {
                entry.state = CacheState::None;
                entry.xid += 1;
                // A task waiting locally can now go ask the server.
                entry.state_cond.notify_one();
            }
            debug!(lid, "released to server");
        }
    }
}
