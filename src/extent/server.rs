//! The durable extent server.
//!
//! Extents live under an `ID/` subtree of the server's working directory:
//! `<16-lowercase-hex>` holds the bytes and `<16-lowercase-hex>_attr`
//! holds the space-separated `atime mtime ctime size` record. An id whose
//! data or attr file is missing does not exist.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use num_traits::FromPrimitive;
use tokio::fs;
use tracing::{debug, warn};

use crate::proto::extent::{ExtentAttr, IdArgs, PutArgs};
use crate::proto::{ExtentId, ExtentMethod, Status};
use crate::rpc::RpcService;
use crate::wire::emit;

use super::unix_now;

/// The root directory extent, present from bootstrap.
pub const ROOT_ID: ExtentId = 1;

/// Durable single-node extent store.
pub struct ExtentServer {
    id_dir: PathBuf,
    put_calls: AtomicU64,
}

impl ExtentServer {
    /// Opens (or initializes) the store rooted at `dir`, creating the
    /// `ID/` subtree and the root directory extent when absent.
    pub async fn open(dir: impl Into<PathBuf>) -> std::io::Result<Arc<Self>> {
        let id_dir = dir.into().join("ID");
        fs::create_dir_all(&id_dir).await?;
        let server = Arc::new(Self { id_dir, put_calls: AtomicU64::new(0) });
        if !server.exists(ROOT_ID).await {
            server
                .write_extent(ROOT_ID, &[])
                .await
                .map_err(|_| std::io::Error::other("cannot bootstrap root extent"))?;
            debug!("bootstrapped root directory extent");
        }
        Ok(server)
    }

    /// How many `put` RPCs this server has served.
    pub fn put_calls(&self) -> u64 {
        self.put_calls.load(Ordering::Relaxed)
    }

    fn data_path(&self, id: ExtentId) -> PathBuf {
        self.id_dir.join(format!("{id:016x}"))
    }

    fn attr_path(&self, id: ExtentId) -> PathBuf {
        self.id_dir.join(format!("{id:016x}_attr"))
    }

    async fn exists(&self, id: ExtentId) -> bool {
        fs::try_exists(self.data_path(id)).await.unwrap_or(false)
            && fs::try_exists(self.attr_path(id)).await.unwrap_or(false)
    }

    async fn read_attr(&self, id: ExtentId) -> super::Result<ExtentAttr> {
        let text = fs::read_to_string(self.attr_path(id)).await.map_err(|_| Status::IoErr)?;
        let mut fields = text.split_whitespace().map(str::parse::<u64>);
        let mut next = || fields.next().and_then(|f| f.ok()).ok_or(Status::IoErr);
        Ok(ExtentAttr { atime: next()?, mtime: next()?, ctime: next()?, size: next()? })
    }

    async fn write_attr(&self, id: ExtentId, attr: &ExtentAttr) -> super::Result<()> {
        let text = format!("{} {} {} {}\n", attr.atime, attr.mtime, attr.ctime, attr.size);
        fs::write(self.attr_path(id), text).await.map_err(|_| Status::IoErr)
    }

    async fn write_extent(&self, id: ExtentId, data: &[u8]) -> super::Result<()> {
        let now = unix_now();
        let attr = ExtentAttr { atime: now, mtime: now, ctime: now, size: data.len() as u64 };
        self.write_attr(id, &attr).await?;
        fs::write(self.data_path(id), data).await.map_err(|_| Status::IoErr)
    }

    /// Reads an extent's bytes, refreshing its access time.
    pub async fn get(&self, id: ExtentId) -> super::Result<Vec<u8>> {
        if !self.exists(id).await {
            return Err(Status::Noent);
        }
        let mut attr = self.read_attr(id).await?;
        attr.atime = unix_now();
        self.write_attr(id, &attr).await?;
        fs::read(self.data_path(id)).await.map_err(|_| Status::IoErr)
    }

    /// Reads an extent's attributes, refreshing its access time.
    pub async fn getattr(&self, id: ExtentId) -> super::Result<ExtentAttr> {
        if !self.exists(id).await {
            return Err(Status::Noent);
        }
        let mut attr = self.read_attr(id).await?;
        attr.atime = unix_now();
        self.write_attr(id, &attr).await?;
        Ok(attr)
    }

    /// Creates or replaces an extent.
    pub async fn put(&self, id: ExtentId, data: &[u8]) -> super::Result<()> {
        self.put_calls.fetch_add(1, Ordering::Relaxed);
        self.write_extent(id, data).await
    }

    /// Deletes an extent and its attributes.
    pub async fn remove(&self, id: ExtentId) -> super::Result<()> {
        if !self.exists(id).await {
            return Err(Status::Noent);
        }
        fs::remove_file(self.attr_path(id)).await.map_err(|_| Status::IoErr)?;
        fs::remove_file(self.data_path(id)).await.map_err(|_| Status::IoErr)
    }

    /// Reports whether an extent exists, without touching access times.
    pub async fn check(&self, id: ExtentId) -> bool {
        self.exists(id).await
    }
}

#[async_trait]
impl RpcService for ExtentServer {
    async fn dispatch(&self, method: u32, body: Vec<u8>) -> (Status, Vec<u8>) {
        let mut src = Cursor::new(body);
        let reply = match ExtentMethod::from_u32(method) {
            Some(ExtentMethod::Get) => match IdArgs::decode(&mut src) {
                Ok(args) => self.get(args.id).await.map(|data| {
                    let mut body = Vec::with_capacity(4 + data.len());
                    let _ = emit::vector(&mut body, &data);
                    body
                }),
                Err(_) => Err(Status::RpcErr),
            },
            Some(ExtentMethod::GetAttr) => match IdArgs::decode(&mut src) {
                Ok(args) => self.getattr(args.id).await.map(|attr| {
                    let mut body = Vec::new();
                    let _ = attr.encode(&mut body);
                    body
                }),
                Err(_) => Err(Status::RpcErr),
            },
            Some(ExtentMethod::Put) => match PutArgs::decode(&mut src) {
                Ok(args) => self.put(args.id, &args.data).await.map(|()| Vec::new()),
                Err(_) => Err(Status::RpcErr),
            },
            Some(ExtentMethod::Remove) => match IdArgs::decode(&mut src) {
                Ok(args) => self.remove(args.id).await.map(|()| Vec::new()),
                Err(_) => Err(Status::RpcErr),
            },
            Some(ExtentMethod::Check) => match IdArgs::decode(&mut src) {
                Ok(args) => {
                    let exists = self.check(args.id).await;
                    let mut body = Vec::new();
                    let _ = emit::u32(&mut body, u32::from(exists));
                    Ok(body)
                }
                Err(_) => Err(Status::RpcErr),
            },
            None => {
                warn!(method, "unknown extent method");
                Err(Status::RpcErr)
            }
        };
        match reply {
            Ok(body) => (Status::Ok, body),
            Err(status) => (status, Vec::new()),
        }
    }
}
