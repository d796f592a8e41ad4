//! Filesystem semantics tests over live extent and lock servers.

mod common;

use tokio::time::timeout;

use common::{Cluster, STEP_TIMEOUT};
use extentfs::fs::{is_dir, is_file, DfsClient, Error, ROOT_INUM};

async fn client(cluster: &Cluster) -> DfsClient {
    DfsClient::start(&cluster.extent_addr(), &cluster.lock_addr()).await.expect("start client")
}

#[tokio::test]
async fn create_lookup_readdir() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;

    let ino = fs.create(ROOT_INUM, "report.txt").await.expect("create");
    assert!(is_file(ino));
    assert_eq!(fs.lookup(ROOT_INUM, "report.txt").await.expect("lookup"), Some(ino));
    assert_eq!(fs.lookup(ROOT_INUM, "absent").await.expect("lookup"), None);

    let entries = fs.readdir(ROOT_INUM).await.expect("readdir");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries.get("report.txt"), Some(&ino));

    // A second create of the same name must fail.
    assert_eq!(fs.create(ROOT_INUM, "report.txt").await, Err(Error::Exist));
}

#[tokio::test]
async fn mkdir_creates_a_directory_inode() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;

    let sub = fs.mkdir(ROOT_INUM, "sub").await.expect("mkdir");
    assert!(is_dir(sub));
    assert_eq!(fs.mkdir(ROOT_INUM, "sub").await, Err(Error::Exist));

    // The new directory is empty and usable as a parent.
    assert!(fs.readdir(sub).await.expect("readdir").is_empty());
    let inner = fs.create(sub, "nested.txt").await.expect("create");
    assert_eq!(fs.lookup(sub, "nested.txt").await.expect("lookup"), Some(inner));
    // The parent still has exactly one entry.
    assert_eq!(fs.readdir(ROOT_INUM).await.expect("readdir").len(), 1);
}

#[tokio::test]
async fn write_read_round_trip() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;
    let ino = fs.create(ROOT_INUM, "data").await.expect("create");

    fs.write(ino, b"hello world", 0).await.expect("write");
    assert_eq!(fs.read(ino, 11, 0).await.expect("read"), b"hello world");
    // Reads cap at end of file.
    assert_eq!(fs.read(ino, 100, 6).await.expect("read"), b"world");
    // An offset at the end is invalid.
    assert_eq!(fs.read(ino, 1, 11).await, Err(Error::IO));

    let info = fs.getfile(ino).await.expect("getfile");
    assert_eq!(info.size, 11);
}

#[tokio::test]
async fn write_past_end_zero_fills_the_hole() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;
    let ino = fs.create(ROOT_INUM, "holes").await.expect("create");

    fs.write(ino, b"xy", 4).await.expect("write");
    assert_eq!(fs.read(ino, 6, 0).await.expect("read"), b"\0\0\0\0xy");

    // An overwrite straddling the end replaces the tail.
    fs.write(ino, b"ABCD", 5).await.expect("write");
    assert_eq!(fs.read(ino, 16, 0).await.expect("read"), b"\0\0\0\0xABCD");
}

#[tokio::test]
async fn set_file_size_truncates_and_pads() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;
    let ino = fs.create(ROOT_INUM, "sized").await.expect("create");

    fs.write(ino, b"abcdef", 0).await.expect("write");
    fs.set_file_size(ino, 3).await.expect("truncate");
    assert_eq!(fs.read(ino, 10, 0).await.expect("read"), b"abc");

    fs.set_file_size(ino, 8).await.expect("extend");
    assert_eq!(fs.read(ino, 8, 0).await.expect("read"), b"abc\0\0\0\0\0");
    assert_eq!(fs.getfile(ino).await.expect("getfile").size, 8);
}

#[tokio::test]
async fn remove_deletes_files_but_not_directories() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;

    let ino = fs.create(ROOT_INUM, "victim").await.expect("create");
    fs.write(ino, b"payload", 0).await.expect("write");
    fs.remove(ROOT_INUM, "victim").await.expect("remove");
    assert_eq!(fs.lookup(ROOT_INUM, "victim").await.expect("lookup"), None);
    // The extent is gone with the name.
    assert_eq!(fs.read(ino, 7, 0).await, Err(Error::IO));

    // Absent names and directories refuse removal.
    assert_eq!(fs.remove(ROOT_INUM, "victim").await, Err(Error::IO));
    fs.mkdir(ROOT_INUM, "keep").await.expect("mkdir");
    assert_eq!(fs.remove(ROOT_INUM, "keep").await, Err(Error::IO));
}

#[tokio::test]
async fn getdir_reports_root_attributes() {
    let cluster = Cluster::start().await;
    let fs = client(&cluster).await;
    // The root exists from bootstrap with fresh timestamps.
    let info = fs.getdir(ROOT_INUM).await.expect("getdir");
    assert!(info.ctime > 0);
}

#[tokio::test]
async fn second_client_observes_flushed_writes() {
    let cluster = Cluster::start().await;
    let c1 = client(&cluster).await;
    let c2 = client(&cluster).await;

    let ino = c1.create(ROOT_INUM, "shared.txt").await.expect("create");
    c1.write(ino, b"coherent", 0).await.expect("write");

    // C2's lookups and reads revoke C1's cached locks, which flushes the
    // dirty directory and file extents on the way.
    let found = timeout(STEP_TIMEOUT, c2.lookup(ROOT_INUM, "shared.txt"))
        .await
        .expect("lookup timed out")
        .expect("lookup");
    assert_eq!(found, Some(ino));
    let data = timeout(STEP_TIMEOUT, c2.read(ino, 8, 0))
        .await
        .expect("read timed out")
        .expect("read");
    assert_eq!(data, b"coherent");

    c1.shutdown().await;
    c2.shutdown().await;
}
