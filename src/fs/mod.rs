//! Filesystem semantics over extents and locks.
//!
//! Inodes are extent ids: bit 63 set means a regular file, clear means a
//! directory, and id 1 is the root directory. Every public operation
//! wraps its body in an acquire/release of the governing lock (the
//! parent directory's inum for directory operations), so concurrent
//! clients serialize per inode; the write-back extent cache batches the
//! actual server writes at lock release.

pub mod dir;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::extent::client::ExtentClient;
use crate::lock::client::LockClient;
use crate::lock::Flusher;
use crate::proto::{ExtentId, LockId, Status};

/// An inode number: an extent id with the type bit interpreted.
pub type Inum = ExtentId;

/// The root directory inode, present from bootstrap.
pub const ROOT_INUM: Inum = 1;

const FILE_BIT: u64 = 1 << 63;

/// True when `inum` names a regular file.
pub fn is_file(inum: Inum) -> bool {
    inum & FILE_BIT != 0
}

/// True when `inum` names a directory.
pub fn is_dir(inum: Inum) -> bool {
    !is_file(inum)
}

/// Result of filesystem operations with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Filesystem-level errors, as surfaced to the VFS bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Persistence or transport failure, an invalid offset, a missing
    /// name, or an operation inappropriate for the object.
    IO,
    /// The name to be created already exists.
    Exist,
}

/// Attributes of a regular file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileInfo {
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
}

/// Attributes of a directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirInfo {
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// Flushes the extent cache when the lock client relinquishes a lease.
struct CacheFlusher {
    extents: Arc<ExtentClient>,
}

#[async_trait]
impl Flusher for CacheFlusher {
    async fn flush(&self, lid: LockId) -> std::result::Result<(), Status> {
        self.extents.flush(lid).await
    }
}

/// The client-side filesystem.
pub struct DfsClient {
    extents: Arc<ExtentClient>,
    locks: Arc<LockClient>,
}

impl DfsClient {
    /// Connects the extent cache and lock client, wiring the flush hook
    /// so dirty extents reach the server before a lock changes hands.
    pub async fn start(extent_dst: &str, lock_dst: &str) -> std::io::Result<Self> {
        let extents = Arc::new(ExtentClient::new(extent_dst));
        let flusher = Arc::new(CacheFlusher { extents: extents.clone() });
        let locks = LockClient::start(lock_dst, Some(flusher)).await?;
        Ok(Self { extents, locks })
    }

    /// Returns cached locks to the server and stops background tasks.
    pub async fn shutdown(&self) {
        self.locks.shutdown().await;
    }

    /// Creates an empty regular file `name` under `parent`.
    pub async fn create(&self, parent: Inum, name: &str) -> Result<Inum> {
        self.lock(parent).await?;
        let result = self.create_locked(parent, name, true).await;
        self.unlock(parent).await;
        result
    }

    /// Creates an empty directory `name` under `parent`.
    pub async fn mkdir(&self, parent: Inum, name: &str) -> Result<Inum> {
        self.lock(parent).await?;
        let result = self.create_locked(parent, name, false).await;
        self.unlock(parent).await;
        result
    }

    /// Looks `name` up under `parent`.
    pub async fn lookup(&self, parent: Inum, name: &str) -> Result<Option<Inum>> {
        self.lock(parent).await?;
        let result = self.read_dir_map(parent).await.map(|entries| entries.get(name).copied());
        self.unlock(parent).await;
        result
    }

    /// Reads the full mapping of directory `ino`.
    pub async fn readdir(&self, ino: Inum) -> Result<BTreeMap<String, Inum>> {
        self.lock(ino).await?;
        let result = self.read_dir_map(ino).await;
        self.unlock(ino).await;
        result
    }

    /// Removes regular file `name` from `parent`. Directories cannot be
    /// removed this way.
    pub async fn remove(&self, parent: Inum, name: &str) -> Result<()> {
        self.lock(parent).await?;
        let result = self.remove_locked(parent, name).await;
        self.unlock(parent).await;
        result
    }

    /// Reads up to `size` bytes of `ino` at `off`. An offset at or past
    /// the end of the file is an error.
    pub async fn read(&self, ino: Inum, size: usize, off: usize) -> Result<Vec<u8>> {
        self.lock(ino).await?;
        let result = self.read_locked(ino, size, off).await;
        self.unlock(ino).await;
        result
    }

    /// Writes `buf` into `ino` at `off`, zero-filling any hole before it.
    pub async fn write(&self, ino: Inum, buf: &[u8], off: usize) -> Result<()> {
        self.lock(ino).await?;
        let result = self.write_locked(ino, buf, off).await;
        self.unlock(ino).await;
        result
    }

    /// Truncates or zero-pads `ino` to exactly `size` bytes.
    pub async fn set_file_size(&self, ino: Inum, size: usize) -> Result<()> {
        self.lock(ino).await?;
        let result = self.set_size_locked(ino, size).await;
        self.unlock(ino).await;
        result
    }

    /// Reads a regular file's attributes.
    pub async fn getfile(&self, ino: Inum) -> Result<FileInfo> {
        self.lock(ino).await?;
        let result = self.extents.getattr(ino).await.map_err(|_| Error::IO).map(|attr| {
            FileInfo { atime: attr.atime, mtime: attr.mtime, ctime: attr.ctime, size: attr.size }
        });
        self.unlock(ino).await;
        debug!(ino = %format_args!("{ino:016x}"), "getfile");
        result
    }

    /// Reads a directory's attributes.
    pub async fn getdir(&self, ino: Inum) -> Result<DirInfo> {
        self.lock(ino).await?;
        let result = self
            .extents
            .getattr(ino)
            .await
            .map_err(|_| Error::IO)
            .map(|attr| DirInfo { atime: attr.atime, mtime: attr.mtime, ctime: attr.ctime });
        self.unlock(ino).await;
        result
    }

    async fn lock(&self, inum: Inum) -> Result<()> {
        self.locks.acquire(inum).await.map_err(|_| Error::IO)
    }

    async fn unlock(&self, inum: Inum) {
        if let Err(status) = self.locks.release(inum).await {
            warn!(inum = %format_args!("{inum:016x}"), ?status, "lock release failed");
        }
    }

    async fn read_dir_map(&self, ino: Inum) -> Result<BTreeMap<String, Inum>> {
        let bytes = self.extents.get(ino).await.map_err(|_| Error::IO)?;
        Ok(dir::parse_dir(&bytes))
    }

    async fn write_dir_map(&self, ino: Inum, entries: &BTreeMap<String, Inum>) -> Result<()> {
        self.extents.put(ino, dir::encode_dir(entries)).await.map_err(|_| Error::IO)
    }

    async fn create_locked(&self, parent: Inum, name: &str, file: bool) -> Result<Inum> {
        let mut entries = self.read_dir_map(parent).await?;
        if entries.contains_key(name) {
            return Err(Error::Exist);
        }
        let ino = self.fresh_inum(file).await?;
        entries.insert(name.to_owned(), ino);
        self.write_dir_map(parent, &entries).await?;
        // The new object exists from birth, if only as an empty extent.
        self.extents.put(ino, Vec::new()).await.map_err(|_| Error::IO)?;
        debug!(
            parent = %format_args!("{parent:016x}"),
            name,
            ino = %format_args!("{ino:016x}"),
            "created"
        );
        Ok(ino)
    }

    async fn remove_locked(&self, parent: Inum, name: &str) -> Result<()> {
        let mut entries = self.read_dir_map(parent).await?;
        let Some(ino) = entries.get(name).copied() else {
            return Err(Error::IO);
        };
        if is_dir(ino) {
            return Err(Error::IO);
        }
        self.extents.remove(ino).await.map_err(|_| Error::IO)?;
        entries.remove(name);
        self.write_dir_map(parent, &entries).await?;
        debug!(parent = %format_args!("{parent:016x}"), name, "removed");
        Ok(())
    }

    async fn read_locked(&self, ino: Inum, size: usize, off: usize) -> Result<Vec<u8>> {
        let data = self.extents.get(ino).await.map_err(|_| Error::IO)?;
        if off >= data.len() {
            return Err(Error::IO);
        }
        let end = data.len().min(off + size);
        Ok(data[off..end].to_vec())
    }

    async fn write_locked(&self, ino: Inum, buf: &[u8], off: usize) -> Result<()> {
        let data = self.extents.get(ino).await.map_err(|_| Error::IO)?;
        let data = splice(data, buf, off);
        self.extents.put(ino, data).await.map_err(|_| Error::IO)
    }

    async fn set_size_locked(&self, ino: Inum, size: usize) -> Result<()> {
        let mut data = self.extents.get(ino).await.map_err(|_| Error::IO)?;
        data.resize(size, 0);
        self.extents.put(ino, data).await.map_err(|_| Error::IO)
    }

    /// Draws a fresh random inum in the requested range, re-drawing while
    /// the extent server knows the id.
    async fn fresh_inum(&self, file: bool) -> Result<Inum> {
        loop {
            let raw: u64 = rand::random();
            let ino = if file { raw | FILE_BIT } else { raw & !FILE_BIT };
            if ino == 0 || ino == ROOT_INUM {
                continue;
            }
            match self.extents.check(ino).await {
                Ok(false) => return Ok(ino),
                Ok(true) => continue,
                Err(_) => return Err(Error::IO),
            }
        }
    }
}

/// Applies a positional write to a file image.
///
/// A write past the end zero-fills the hole first; a write fully inside
/// the file overwrites in place; a write straddling the end replaces the
/// tail from `off` on.
fn splice(mut data: Vec<u8>, buf: &[u8], off: usize) -> Vec<u8> {
    if off >= data.len() {
        data.resize(off, 0);
        data.extend_from_slice(buf);
    } else if off + buf.len() <= data.len() {
        data[off..off + buf.len()].copy_from_slice(buf);
    } else {
        data.truncate(off);
        data.extend_from_slice(buf);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::{is_dir, is_file, splice, ROOT_INUM};

    #[test]
    fn test_inum_type_bit() {
        assert!(is_dir(ROOT_INUM));
        assert!(is_file(0x8000_0000_0000_0001));
        assert!(is_dir(0x7fff_ffff_ffff_ffff));
    }

    #[test]
    fn test_splice_overwrites_in_place() {
        assert_eq!(splice(b"abcdef".to_vec(), b"XY", 2), b"abXYef");
    }

    #[test]
    fn test_splice_pads_holes_with_zeros() {
        assert_eq!(splice(b"ab".to_vec(), b"XY", 4), b"ab\0\0XY");
        assert_eq!(splice(Vec::new(), b"XY", 3), b"\0\0\0XY");
    }

    #[test]
    fn test_splice_replaces_tail() {
        assert_eq!(splice(b"abcdef".to_vec(), b"XYZ", 4), b"abcdXYZ");
    }
}
