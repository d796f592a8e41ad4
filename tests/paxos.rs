//! Paxos tests: agreement, contention, durability.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;

use common::{free_port_addr, STEP_TIMEOUT};
use extentfs::config::ViewManager;
use extentfs::paxos::node::PaxosNode;
use extentfs::paxos::proposer::Breakpoint;
use extentfs::paxos::PaxosCommit;

/// Records every commit upcall.
#[derive(Default)]
struct Recorder {
    commits: Mutex<Vec<(u64, String)>>,
}

#[async_trait]
impl PaxosCommit for Recorder {
    async fn paxos_commit(&self, instance: u64, value: &str) {
        self.commits.lock().await.push((instance, value.to_owned()));
    }
}

async fn start_node(recorder: Arc<Recorder>, dir: &std::path::Path) -> Arc<PaxosNode> {
    PaxosNode::start("127.0.0.1:0", dir, false, "", Some(recorder))
        .await
        .expect("start paxos node")
}

#[tokio::test]
async fn majority_decides_with_one_dead_member() {
    let dir = tempfile::tempdir().expect("tempdir");
    let rec_a = Arc::new(Recorder::default());
    let rec_b = Arc::new(Recorder::default());
    let a = start_node(rec_a.clone(), dir.path()).await;
    let b = start_node(rec_b.clone(), dir.path()).await;
    let dead = free_port_addr().await;

    let members = vec![a.me().to_owned(), b.me().to_owned(), dead];
    let decided = timeout(STEP_TIMEOUT, a.propose(1, &members, "v1"))
        .await
        .expect("proposal timed out");
    assert!(decided);

    assert_eq!(a.value(1).await.as_deref(), Some("v1"));
    assert_eq!(b.value(1).await.as_deref(), Some("v1"));
    assert_eq!(rec_a.commits.lock().await.as_slice(), &[(1, "v1".to_owned())]);
    assert_eq!(rec_b.commits.lock().await.as_slice(), &[(1, "v1".to_owned())]);
}

#[tokio::test]
async fn later_proposer_adopts_value_accepted_by_majority() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let b = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let c = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let members = vec![a.me().to_owned(), b.me().to_owned(), c.me().to_owned()];

    // A pushes "v1" through prepare and accept on a majority, then stops
    // before any decide.
    a.set_breakpoint(Breakpoint::AfterAccept).await;
    assert!(!a.propose(1, &members, "v1").await);
    assert_eq!(a.value(1).await, None);

    // B's prepare majority intersects A's accept majority, so B must
    // adopt "v1" even though it proposed "v2".
    assert!(b.propose(1, &members, "v2").await);
    assert_eq!(a.value(1).await.as_deref(), Some("v1"));
    assert_eq!(b.value(1).await.as_deref(), Some("v1"));
    assert_eq!(c.value(1).await.as_deref(), Some("v1"));
}

#[tokio::test]
async fn later_proposer_keeps_own_value_when_nothing_was_accepted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let b = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let c = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let members = vec![a.me().to_owned(), b.me().to_owned(), c.me().to_owned()];

    // A stops after the prepare majority: no acceptor ever saw "v1".
    a.set_breakpoint(Breakpoint::AfterPrepare).await;
    assert!(!a.propose(1, &members, "v1").await);

    assert!(b.propose(1, &members, "v2").await);
    assert_eq!(b.value(1).await.as_deref(), Some("v2"));
    assert_eq!(c.value(1).await.as_deref(), Some("v2"));
}

#[tokio::test]
async fn proposer_learns_already_decided_instance_from_old_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let b = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let members = vec![a.me().to_owned(), b.me().to_owned()];

    assert!(a.propose(1, &members, "v1").await);

    // B proposes for the stale instance; the oldinstance reply makes it
    // adopt the decided value locally and abandon the run.
    assert!(!b.propose(1, &members, "v9").await);
    assert_eq!(b.value(1).await.as_deref(), Some("v1"));
}

#[tokio::test]
async fn restart_replays_the_durable_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = PaxosNode::start("127.0.0.1:0", dir.path(), true, "m1", None)
        .await
        .expect("start first node");
    let b = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let a_addr = a.me().to_owned();

    // The first node bootstraps instance 1 and then decides instance 2.
    assert_eq!(a.value(1).await.as_deref(), Some("m1"));
    let members = vec![a_addr.clone(), b.me().to_owned()];
    assert!(a.propose(2, &members, "m1,m2").await);

    // Restart the node on the same address; the log must bring back
    // every decided instance.
    drop(a);
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let a = PaxosNode::start(&a_addr, dir.path(), true, "ignored", None)
        .await
        .expect("restart node");
    assert_eq!(a.instance_h().await, 2);
    assert_eq!(a.value(1).await.as_deref(), Some("m1"));
    assert_eq!(a.value(2).await.as_deref(), Some("m1,m2"));
}

#[tokio::test]
async fn dump_and_restore_move_acceptor_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let a = PaxosNode::start("127.0.0.1:0", dir.path(), true, "m1", None)
        .await
        .expect("start first node");
    let b = start_node(Arc::new(Recorder::default()), dir.path()).await;
    let members = vec![a.me().to_owned(), b.me().to_owned()];
    assert!(a.propose(2, &members, "m1,m2").await);

    let snapshot = a.dump().await.expect("dump");
    let fresh = start_node(Arc::new(Recorder::default()), dir.path()).await;
    fresh.restore(&snapshot).await.expect("restore");
    assert_eq!(fresh.instance_h().await, 2);
    assert_eq!(fresh.value(2).await.as_deref(), Some("m1,m2"));
}

#[tokio::test]
async fn view_managers_agree_on_membership_changes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let addr_a = free_port_addr().await;
    let addr_b = free_port_addr().await;
    let roster = vec![addr_a.clone(), addr_b.clone()];

    let a = ViewManager::start(&addr_a, dir.path(), true, &roster).await.expect("start a");
    let b = ViewManager::start(&addr_b, dir.path(), false, &roster).await.expect("start b");

    let (instance, members) = a.latest().await;
    assert_eq!(instance, 1);
    assert_eq!(members, roster);

    // Shrink the view to just A; both managers must converge on view 2.
    let next = vec![addr_a.clone()];
    assert!(timeout(STEP_TIMEOUT, a.propose_view(&next)).await.expect("proposal timed out"));
    assert_eq!(a.view(2).await, Some(next.clone()));
    assert_eq!(b.view(2).await, Some(next));
}
