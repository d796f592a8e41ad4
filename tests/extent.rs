//! Extent store tests: durability, the write-back cache, tombstones,
//! and flush-at-release.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::timeout;

use common::{Cluster, STEP_TIMEOUT};
use extentfs::extent::client::ExtentClient;
use extentfs::extent::server::ExtentServer;
use extentfs::lock::client::LockClient;
use extentfs::lock::Flusher;
use extentfs::proto::{LockId, Status};

const FILE_INO: u64 = 0x8000_0000_0000_0001;

#[tokio::test]
async fn server_persists_extents_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let server = ExtentServer::open(dir.path()).await.expect("open");

    // The root directory extent exists from bootstrap.
    assert!(server.check(1).await);

    server.put(0x2a, b"hello").await.expect("put");
    assert_eq!(server.get(0x2a).await.expect("get"), b"hello");
    let attr = server.getattr(0x2a).await.expect("getattr");
    assert_eq!(attr.size, 5);

    // One data file and one attr record, named by the 16-digit hex id.
    let data = dir.path().join("ID").join("000000000000002a");
    let attr_file = dir.path().join("ID").join("000000000000002a_attr");
    assert!(data.exists());
    assert!(attr_file.exists());

    server.remove(0x2a).await.expect("remove");
    assert!(!server.check(0x2a).await);
    assert_eq!(server.get(0x2a).await, Err(Status::Noent));
    assert_eq!(server.remove(0x2a).await, Err(Status::Noent));
}

#[tokio::test]
async fn reopened_server_sees_prior_extents() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let server = ExtentServer::open(dir.path()).await.expect("open");
        server.put(7, b"durable").await.expect("put");
    }
    let server = ExtentServer::open(dir.path()).await.expect("reopen");
    assert_eq!(server.get(7).await.expect("get"), b"durable");
}

#[tokio::test]
async fn cache_defers_puts_until_flush() {
    let cluster = Cluster::start().await;
    let client = ExtentClient::new(cluster.extent_addr());

    client.put(FILE_INO, b"abc".to_vec()).await.expect("put");
    assert_eq!(client.get(FILE_INO).await.expect("get"), b"abc");
    assert_eq!(cluster.extent_server.put_calls(), 0);

    client.flush(FILE_INO).await.expect("flush");
    assert_eq!(cluster.extent_server.put_calls(), 1);
    assert_eq!(cluster.extent_server.get(FILE_INO).await.expect("server get"), b"abc");

    // The entry is gone from the cache; flushing again is a no-op.
    client.flush(FILE_INO).await.expect("idempotent flush");
    assert_eq!(cluster.extent_server.put_calls(), 1);
}

#[tokio::test]
async fn tombstone_hides_extent_regardless_of_server_state() {
    let cluster = Cluster::start().await;
    let client = ExtentClient::new(cluster.extent_addr());

    client.put(9, b"doomed".to_vec()).await.expect("put");
    client.flush(9).await.expect("flush");
    assert!(cluster.extent_server.check(9).await);

    client.remove(9).await.expect("remove");
    // Locally gone, even though the server still answers.
    assert_eq!(client.get(9).await, Err(Status::Noent));
    assert_eq!(client.getattr(9).await, Err(Status::Noent));
    assert!(cluster.extent_server.check(9).await);

    // The flush pushes the remove to the server.
    client.flush(9).await.expect("flush remove");
    assert!(!cluster.extent_server.check(9).await);
}

#[tokio::test]
async fn remove_then_put_resurrects_the_extent() {
    let cluster = Cluster::start().await;
    let client = ExtentClient::new(cluster.extent_addr());

    client.put(5, b"one".to_vec()).await.expect("put");
    client.remove(5).await.expect("remove");
    client.put(5, b"two".to_vec()).await.expect("put again");
    assert_eq!(client.get(5).await.expect("get"), b"two");

    client.flush(5).await.expect("flush");
    assert_eq!(cluster.extent_server.get(5).await.expect("server get"), b"two");
}

struct CacheFlusher {
    extents: Arc<ExtentClient>,
}

#[async_trait]
impl Flusher for CacheFlusher {
    async fn flush(&self, lid: LockId) -> Result<(), Status> {
        self.extents.flush(lid).await
    }
}

#[tokio::test]
async fn dirty_extent_flushes_when_the_lease_returns() {
    let cluster = Cluster::start().await;
    let extents = Arc::new(ExtentClient::new(cluster.extent_addr()));
    let flusher = Arc::new(CacheFlusher { extents: extents.clone() });
    let c1 = LockClient::start(&cluster.lock_addr(), Some(flusher)).await.expect("start c1");

    // Write under the lock; nothing reaches the server yet.
    c1.acquire(FILE_INO).await.expect("acquire");
    extents.put(FILE_INO, b"abc".to_vec()).await.expect("put");
    c1.release(FILE_INO).await.expect("release");
    assert_eq!(cluster.extent_server.put_calls(), 0);

    // Another client wanting the lock forces the lease home; the flush
    // must carry exactly one put with the data.
    let c2 = LockClient::start(&cluster.lock_addr(), None).await.expect("start c2");
    timeout(STEP_TIMEOUT, c2.acquire(FILE_INO)).await.expect("handoff timed out").expect("acquire");
    assert_eq!(cluster.extent_server.put_calls(), 1);
    assert_eq!(cluster.extent_server.get(FILE_INO).await.expect("server get"), b"abc");
    c2.release(FILE_INO).await.expect("release");
}
