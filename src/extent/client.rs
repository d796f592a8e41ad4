//! The extent client and its write-back cache.
//!
//! Reads are served through the cache; writes and removes stay local
//! (dirty entries, tombstones) until [`ExtentClient::flush`] pushes them
//! to the server. Every call assumes the caller holds the lock covering
//! the extent, so cross-client races cannot occur; the internal mutex
//! only serializes local tasks and is released across server RPCs.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::proto::extent::{ExtentAttr, IdArgs, PutArgs};
use crate::proto::{ExtentId, ExtentMethod, Status};
use crate::rpc::client::RpcClient;
use crate::wire::{self, parse};

use super::unix_now;

#[derive(Debug, Clone)]
struct ExtentEntry {
    data: Vec<u8>,
    dirty: bool,
}

#[derive(Default)]
struct CacheState {
    extents: HashMap<ExtentId, ExtentEntry>,
    attrs: HashMap<ExtentId, ExtentAttr>,
    /// Ids removed locally but not yet flushed. An id is never in both
    /// `extents` and `tombstones`.
    tombstones: HashSet<ExtentId>,
}

/// Caching client for one extent server.
pub struct ExtentClient {
    cl: RpcClient,
    cache: Mutex<CacheState>,
}

impl ExtentClient {
    /// Creates a client for the extent server at `dst` (`host:port`).
    pub fn new(dst: impl Into<String>) -> Self {
        Self { cl: RpcClient::new(dst), cache: Mutex::new(CacheState::default()) }
    }

    /// Reads an extent's bytes, fetching from the server on a cache miss.
    pub async fn get(&self, id: ExtentId) -> super::Result<Vec<u8>> {
        {
            let cache = self.cache.lock().await;
            if cache.tombstones.contains(&id) {
                return Err(Status::Noent);
            }
            if let Some(entry) = cache.extents.get(&id) {
                trace!(id = %format_args!("{id:016x}"), "extent cache hit");
                return Ok(entry.data.clone());
            }
        }

        let mut args = Vec::new();
        let _ = IdArgs { id }.encode(&mut args);
        let (status, body) =
            self.cl.call(ExtentMethod::Get as u32, &args).await.map_err(|_| Status::RpcErr)?;
        if status != Status::Ok {
            return Err(status);
        }
        let data = parse::vec_max_size(&mut Cursor::new(body), wire::MAX_OPAQUE_LEN)
            .map_err(|_| Status::RpcErr)?;

        // Re-examine under the mutex: a local put or remove may have won
        // the race while the fetch was in flight.
        let mut cache = self.cache.lock().await;
        if cache.tombstones.contains(&id) {
            return Err(Status::Noent);
        }
        if let Some(entry) = cache.extents.get(&id) {
            return Ok(entry.data.clone());
        }
        debug!(id = %format_args!("{id:016x}"), "extent cached");
        cache.extents.insert(id, ExtentEntry { data: data.clone(), dirty: false });
        Ok(data)
    }

    /// Reads an extent's attributes, fetching from the server on a miss.
    pub async fn getattr(&self, id: ExtentId) -> super::Result<ExtentAttr> {
        {
            let cache = self.cache.lock().await;
            if cache.tombstones.contains(&id) {
                return Err(Status::Noent);
            }
            if let Some(attr) = cache.attrs.get(&id) {
                return Ok(*attr);
            }
        }

        let mut args = Vec::new();
        let _ = IdArgs { id }.encode(&mut args);
        let (status, body) =
            self.cl.call(ExtentMethod::GetAttr as u32, &args).await.map_err(|_| Status::RpcErr)?;
        if status != Status::Ok {
            return Err(status);
        }
        let attr = ExtentAttr::decode(&mut Cursor::new(body)).map_err(|_| Status::RpcErr)?;

        let mut cache = self.cache.lock().await;
        if cache.tombstones.contains(&id) {
            return Err(Status::Noent);
        }
        Ok(*cache.attrs.entry(id).or_insert(attr))
    }

    /// Stores an extent in the cache, marking it dirty. The server copy
    /// is not touched until the next flush.
    pub async fn put(&self, id: ExtentId, data: Vec<u8>) -> super::Result<()> {
        let mut cache = self.cache.lock().await;
        cache.tombstones.remove(&id);
        let now = unix_now();
        let attr = ExtentAttr { atime: now, mtime: now, ctime: now, size: data.len() as u64 };
        cache.attrs.insert(id, attr);
        cache.extents.insert(id, ExtentEntry { data, dirty: true });
        Ok(())
    }

    /// Removes an extent locally, leaving a tombstone for the flush.
    ///
    /// Later `get`/`getattr` calls answer `Noent` even while the server
    /// still holds the extent.
    pub async fn remove(&self, id: ExtentId) -> super::Result<()> {
        let mut cache = self.cache.lock().await;
        cache.extents.remove(&id);
        cache.attrs.remove(&id);
        cache.tombstones.insert(id);
        Ok(())
    }

    /// Pushes local state for `id` to the server and drops the cache
    /// entries. Clean or unknown ids flush to nothing.
    pub async fn flush(&self, id: ExtentId) -> super::Result<()> {
        enum Action {
            Remove,
            Put(Vec<u8>),
            Nothing,
        }

        let action = {
            let mut cache = self.cache.lock().await;
            cache.attrs.remove(&id);
            if cache.tombstones.remove(&id) {
                Action::Remove
            } else {
                match cache.extents.remove(&id) {
                    Some(entry) if entry.dirty => Action::Put(entry.data),
                    _ => Action::Nothing,
                }
            }
        };

        match action {
            Action::Remove => {
                debug!(id = %format_args!("{id:016x}"), "flush: removing extent");
                let mut args = Vec::new();
                let _ = IdArgs { id }.encode(&mut args);
                let (status, _) = self
                    .cl
                    .call(ExtentMethod::Remove as u32, &args)
                    .await
                    .map_err(|_| Status::RpcErr)?;
                // The server never saw an unflushed create; nothing to undo.
                match status {
                    Status::Ok | Status::Noent => Ok(()),
                    other => Err(other),
                }
            }
            Action::Put(data) => {
                debug!(id = %format_args!("{id:016x}"), len = data.len(), "flush: writing extent");
                let mut args = Vec::new();
                let _ = PutArgs { id, data }.encode(&mut args);
                let (status, _) = self
                    .cl
                    .call(ExtentMethod::Put as u32, &args)
                    .await
                    .map_err(|_| Status::RpcErr)?;
                match status {
                    Status::Ok => Ok(()),
                    other => Err(other),
                }
            }
            Action::Nothing => Ok(()),
        }
    }

    /// Asks the server whether an extent exists. Bypasses the cache: the
    /// answer drives fresh-id generation, not reads.
    pub async fn check(&self, id: ExtentId) -> super::Result<bool> {
        let mut args = Vec::new();
        let _ = IdArgs { id }.encode(&mut args);
        let (status, body) =
            self.cl.call(ExtentMethod::Check as u32, &args).await.map_err(|_| Status::RpcErr)?;
        if status != Status::Ok {
            return Err(status);
        }
        Ok(parse::u32(&mut Cursor::new(body)).map_err(|_| Status::RpcErr)? != 0)
    }
}
