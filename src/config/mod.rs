//! Paxos-replicated lock-service membership.
//!
//! Each view is an ordered list of node addresses; view change `i` is
//! Paxos instance `i`, whose decided value encodes the new member list.
//! The [`ViewManager`] owns this node's Paxos instance and records every
//! decided view; proposals run among the members of the current view.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::paxos::node::PaxosNode;
use crate::paxos::PaxosCommit;

#[cfg(test)]
mod tests;

/// Attempts before [`ViewManager::propose_view`] gives up.
const PROPOSE_ATTEMPTS: u32 = 5;

/// Encodes a member list into a Paxos value.
pub fn members_to_value(members: &[String]) -> String {
    members.join(",")
}

/// Decodes a Paxos value back into a member list.
pub fn value_to_members(value: &str) -> Vec<String> {
    value.split(',').filter(|m| !m.is_empty()).map(str::to_owned).collect()
}

/// Decided views, keyed by instance. This is the [`PaxosCommit`] sink.
struct ViewState {
    views: Mutex<BTreeMap<u64, Vec<String>>>,
}

#[async_trait]
impl PaxosCommit for ViewState {
    async fn paxos_commit(&self, instance: u64, value: &str) {
        let members = value_to_members(value);
        info!(instance, ?members, "view change committed");
        self.views.lock().await.insert(instance, members);
    }
}

/// This node's window onto the agreed membership.
pub struct ViewManager {
    state: Arc<ViewState>,
    node: Arc<PaxosNode>,
}

impl ViewManager {
    /// Starts the node's Paxos instance and seeds the view table from
    /// whatever the durable log already decided. A `first` node with a
    /// fresh log establishes view 1 as `initial_members`.
    pub async fn start(
        addr: &str,
        log_dir: impl AsRef<Path>,
        first: bool,
        initial_members: &[String],
    ) -> io::Result<Self> {
        let state = Arc::new(ViewState { views: Mutex::new(BTreeMap::new()) });
        let node = PaxosNode::start(
            addr,
            log_dir,
            first,
            &members_to_value(initial_members),
            Some(state.clone()),
        )
        .await?;

        let highest = node.instance_h().await;
        for instance in 1..=highest {
            if let Some(value) = node.value(instance).await {
                state.views.lock().await.insert(instance, value_to_members(&value));
            }
        }
        Ok(Self { state, node })
    }

    /// This node's address.
    pub fn me(&self) -> &str {
        self.node.me()
    }

    /// Direct access to the underlying Paxos node.
    pub fn node(&self) -> &Arc<PaxosNode> {
        &self.node
    }

    /// The members of view `instance`, if decided here.
    pub async fn view(&self, instance: u64) -> Option<Vec<String>> {
        self.state.views.lock().await.get(&instance).cloned()
    }

    /// The newest decided view and its instance, or `(0, [])`.
    pub async fn latest(&self) -> (u64, Vec<String>) {
        let views = self.state.views.lock().await;
        match views.iter().next_back() {
            Some((instance, members)) => (*instance, members.clone()),
            None => (0, Vec::new()),
        }
    }

    /// Proposes `new_members` as the next view, retrying lost rounds with
    /// a randomized delay (competing proposers may livelock otherwise).
    pub async fn propose_view(&self, new_members: &[String]) -> bool {
        for attempt in 0..PROPOSE_ATTEMPTS {
            let (latest, mut roster) = self.latest().await;
            if roster.is_empty() {
                // Nothing agreed yet: the proposed members bootstrap.
                roster = new_members.to_vec();
            }
            let instance = latest + 1;
            if self
                .node
                .propose(instance, &roster, &members_to_value(new_members))
                .await
            {
                return true;
            }
            // Someone else may have decided this instance meanwhile.
            if self.node.instance_h().await >= instance {
                let decided = self.node.value(instance).await.unwrap_or_default();
                if value_to_members(&decided) == new_members {
                    return true;
                }
            }
            let jitter = rand::thread_rng().gen_range(50..250);
            warn!(attempt, instance, jitter, "view proposal lost, retrying");
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }
        false
    }
}
