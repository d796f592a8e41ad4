//! Framed request/response RPC over TCP.
//!
//! Frames are length-prefixed: `len | xid | method | body` for requests and
//! `len | xid | status | body` for replies, all integers big-endian. Every
//! request is handled in its own task, so a handler that parks (a lock
//! callback waiting out an ordering barrier) never stalls the connection.

pub mod client;
pub mod server;

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::proto::Status;
use crate::wire;

/// Result of RPC operations with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Largest accepted frame: an extent body plus header slack.
const MAX_FRAME_LEN: usize = wire::MAX_OPAQUE_LEN + 4096;

/// Transport-level RPC errors. Status codes carried in replies are not
/// errors and travel in the `Ok` arm of [`Result`].
#[derive(Debug)]
pub enum Error {
    /// Socket-level failure.
    IO(io::Error),
    /// A frame or reply failed to decode.
    Wire(wire::Error),
    /// The connection died while a call was outstanding.
    Disconnected,
    /// A deadline passed before the reply arrived.
    Timeout,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<wire::Error> for Error {
    fn from(err: wire::Error) -> Self {
        Error::Wire(err)
    }
}

/// A service reachable over the RPC substrate.
///
/// `dispatch` decodes the method-specific body and returns the reply
/// status plus encoded reply body. Decode failures and unknown methods
/// map to [`Status::RpcErr`].
#[async_trait]
pub trait RpcService: Send + Sync + 'static {
    async fn dispatch(&self, method: u32, body: Vec<u8>) -> (Status, Vec<u8>);
}

/// Reads one length-prefixed frame; `None` on a clean end of stream.
async fn read_frame(src: &mut (impl AsyncRead + Unpin)) -> io::Result<Option<Vec<u8>>> {
    let len = match src.read_u32().await {
        Ok(len) => len as usize,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut frame = vec![0u8; len];
    src.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Writes one length-prefixed frame.
async fn write_frame(dest: &mut (impl AsyncWrite + Unpin), payload: &[u8]) -> io::Result<()> {
    dest.write_u32(payload.len() as u32).await?;
    dest.write_all(payload).await?;
    dest.flush().await
}
