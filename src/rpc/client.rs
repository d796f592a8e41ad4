//! RPC client: one lazily-established connection per destination, with a
//! reader task routing replies to pending calls by xid.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::proto::Status;
use crate::wire::{emit, parse};

use super::{read_frame, write_frame, Error, Result};

/// Transient transport failures are retried this many times before the
/// error is surfaced to the caller.
const CALL_RETRIES: u32 = 5;

/// Delay between transport-failure retries.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Pending calls keyed by xid. `None` marks a connection whose reader has
/// exited: nothing can be registered there anymore.
type PendingMap = Arc<Mutex<Option<HashMap<u32, oneshot::Sender<(Status, Vec<u8>)>>>>>;

/// A typed RPC caller bound to one destination address.
///
/// The connection is established on first use and re-established after
/// failures; calls overlapping on one connection are matched to replies
/// by xid.
pub struct RpcClient {
    dst: String,
    next_xid: AtomicU32,
    conn: Mutex<Option<Arc<Conn>>>,
}

struct Conn {
    write: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    reader: JoinHandle<()>,
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl RpcClient {
    /// Creates a caller for `dst` (`host:port`). No I/O happens here.
    pub fn new(dst: impl Into<String>) -> Self {
        Self { dst: dst.into(), next_xid: AtomicU32::new(1), conn: Mutex::new(None) }
    }

    /// The destination this client dials.
    pub fn dst(&self) -> &str {
        &self.dst
    }

    /// Performs one call, retrying transient transport failures.
    ///
    /// The returned [`Status`] is the service's answer and is never an
    /// error at this layer.
    pub async fn call(&self, method: u32, body: &[u8]) -> Result<(Status, Vec<u8>)> {
        let mut attempt = 0;
        loop {
            match self.try_call(method, body).await {
                Ok(reply) => return Ok(reply),
                Err(err) if attempt < CALL_RETRIES => {
                    debug!(dst = %self.dst, ?err, attempt, "call failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Performs one call with a deadline covering connect, send and reply.
    pub async fn call_timeout(
        &self,
        method: u32,
        body: &[u8],
        timeout: Duration,
    ) -> Result<(Status, Vec<u8>)> {
        match tokio::time::timeout(timeout, self.call(method, body)).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn try_call(&self, method: u32, body: &[u8]) -> Result<(Status, Vec<u8>)> {
        let conn = self.connection().await?;
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        let registered = {
            let mut pending = conn.pending.lock().await;
            match pending.as_mut() {
                Some(map) => {
                    map.insert(xid, tx);
                    true
                }
                None => false,
            }
        };
        if !registered {
            self.invalidate(&conn).await;
            return Err(Error::Disconnected);
        }

        let mut frame = Vec::with_capacity(8 + body.len());
        let _ = emit::u32(&mut frame, xid);
        let _ = emit::u32(&mut frame, method);
        frame.extend_from_slice(body);

        let sent = {
            let mut write = conn.write.lock().await;
            write_frame(&mut *write, &frame).await
        };
        if let Err(err) = sent {
            if let Some(map) = conn.pending.lock().await.as_mut() {
                map.remove(&xid);
            }
            self.invalidate(&conn).await;
            return Err(Error::IO(err));
        }

        match rx.await {
            Ok(reply) => Ok(reply),
            Err(_) => {
                // The reader task dropped the pending map: connection died.
                self.invalidate(&conn).await;
                Err(Error::Disconnected)
            }
        }
    }

    async fn connection(&self) -> Result<Arc<Conn>> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let socket = TcpStream::connect(&self.dst).await?;
        socket.set_nodelay(true)?;
        trace!(dst = %self.dst, "connected");
        let (readhalf, writehalf) = socket.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader = ReplyReader::spawn(readhalf, pending.clone());
        let conn = Arc::new(Conn { write: Mutex::new(writehalf), pending, reader });
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Forgets `stale` so the next call dials afresh. A newer connection
    /// installed meanwhile is left alone.
    async fn invalidate(&self, stale: &Arc<Conn>) {
        let mut slot = self.conn.lock().await;
        if let Some(current) = slot.as_ref() {
            if Arc::ptr_eq(current, stale) {
                *slot = None;
            }
        }
    }
}

/// Reads reply frames and completes the matching pending call.
struct ReplyReader {
    readhalf: OwnedReadHalf,
    pending: PendingMap,
}

impl ReplyReader {
    fn spawn(readhalf: OwnedReadHalf, pending: PendingMap) -> JoinHandle<()> {
        tokio::spawn(Self { readhalf, pending }.run())
    }

    async fn run(mut self) {
        loop {
            let frame = match read_frame(&mut self.readhalf).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    debug!(?err, "reply stream failed");
                    break;
                }
            };
            let mut src = Cursor::new(frame);
            let (xid, status) = match (parse::u32(&mut src), parse::variant::<Status>(&mut src)) {
                (Ok(xid), Ok(status)) => (xid, status),
                _ => {
                    debug!("malformed reply header");
                    continue;
                }
            };
            let body = {
                let pos = src.position() as usize;
                let mut frame = src.into_inner();
                frame.drain(..pos);
                frame
            };
            let tx = self.pending.lock().await.as_mut().and_then(|map| map.remove(&xid));
            if let Some(tx) = tx {
                let _ = tx.send((status, body));
            }
        }
        // Close the map: pending callers wake with a disconnect and no
        // new call can register against this connection.
        *self.pending.lock().await = None;
    }
}
