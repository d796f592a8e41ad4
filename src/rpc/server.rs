//! RPC server: accept loop and per-connection task pipeline.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::proto::Status;
use crate::wire::{emit, parse};

use super::{read_frame, write_frame, RpcService};

/// A bound RPC server dispatching requests to an [`RpcService`].
///
/// Dropping the server stops the accept loop; connections already
/// established run until their peer hangs up.
pub struct RpcServer {
    addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl RpcServer {
    /// Binds `addr` (use port 0 for an ephemeral port) and starts serving.
    pub async fn bind(addr: &str, service: Arc<dyn RpcService>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::serve(listener, service)
    }

    /// Starts serving on an already-bound listener. Useful when the bound
    /// port must be known before the service value can be built.
    pub fn serve(listener: TcpListener, service: Arc<dyn RpcService>) -> std::io::Result<Self> {
        let addr = listener.local_addr()?;
        let accept_task = tokio::spawn(accept_forever(listener, service));
        debug!(%addr, "rpc server listening");
        Ok(Self { addr, accept_task })
    }

    /// The address the server actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_forever(listener: TcpListener, service: Arc<dyn RpcService>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                trace!(%peer, "accepted connection");
                if let Err(err) = socket.set_nodelay(true) {
                    warn!(%peer, ?err, "set_nodelay failed");
                }
                process_socket(socket, service.clone());
            }
            Err(err) => {
                warn!(?err, "accept failed");
            }
        }
    }
}

fn process_socket(socket: TcpStream, service: Arc<dyn RpcService>) {
    let (readhalf, writehalf) = socket.into_split();
    let (reply_send, reply_recv) = mpsc::unbounded_channel::<Vec<u8>>();
    RequestTask::spawn(readhalf, service, reply_send);
    ReplyWriter::spawn(writehalf, reply_recv);
}

/// Reads request frames from a connection and spawns one handler task per
/// request so slow handlers never block the stream.
struct RequestTask {
    readhalf: OwnedReadHalf,
    service: Arc<dyn RpcService>,
    reply_send: UnboundedSender<Vec<u8>>,
}

impl RequestTask {
    fn spawn(
        readhalf: OwnedReadHalf,
        service: Arc<dyn RpcService>,
        reply_send: UnboundedSender<Vec<u8>>,
    ) -> JoinHandle<()> {
        tokio::spawn(Self { readhalf, service, reply_send }.run())
    }

    async fn run(mut self) {
        loop {
            let frame = match read_frame(&mut self.readhalf).await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    debug!(?err, "request stream failed");
                    break;
                }
            };
            let mut src = Cursor::new(frame);
            let (xid, method) = match (parse::u32(&mut src), parse::u32(&mut src)) {
                (Ok(xid), Ok(method)) => (xid, method),
                _ => {
                    debug!("malformed request header");
                    continue;
                }
            };
            let body = {
                let pos = src.position() as usize;
                let mut frame = src.into_inner();
                frame.drain(..pos);
                frame
            };
            let service = self.service.clone();
            let reply_send = self.reply_send.clone();
            tokio::spawn(async move {
                let (status, reply_body) = service.dispatch(method, body).await;
                // A send failure means the peer is gone; drop the reply.
                let _ = reply_send.send(encode_reply(xid, status, &reply_body));
            });
        }
    }
}

fn encode_reply(xid: u32, status: Status, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + body.len());
    // Writes into a Vec cannot fail.
    let _ = emit::u32(&mut frame, xid);
    let _ = emit::variant(&mut frame, status);
    frame.extend_from_slice(body);
    frame
}

/// Writes reply frames in arrival order.
struct ReplyWriter {
    writehalf: OwnedWriteHalf,
    reply_recv: UnboundedReceiver<Vec<u8>>,
}

impl ReplyWriter {
    fn spawn(writehalf: OwnedWriteHalf, reply_recv: UnboundedReceiver<Vec<u8>>) -> JoinHandle<()> {
        tokio::spawn(Self { writehalf, reply_recv }.run())
    }

    async fn run(mut self) {
        while let Some(frame) = self.reply_recv.recv().await {
            if let Err(err) = write_frame(&mut self.writehalf, &frame).await {
                debug!(?err, "reply stream failed");
                break;
            }
        }
    }
}
