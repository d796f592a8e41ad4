//! Single-decree Paxos over a known roster.
//!
//! Each instance agrees on one value; the configuration layer runs one
//! instance per membership change. Every node plays both proposer and
//! acceptor. When a value is decided the acceptor invokes the
//! [`PaxosCommit`] capability so higher layers learn the outcome; the
//! callback runs without the Paxos mutex held.

pub mod acceptor;
pub mod log;
pub mod node;
pub mod proposer;

use async_trait::async_trait;

/// Upcall capability handed to the acceptor: fires once per decided
/// instance, in instance order on any single node.
#[async_trait]
pub trait PaxosCommit: Send + Sync {
    async fn paxos_commit(&self, instance: u64, value: &str);
}

/// True when `subset` holds a majority of `all`.
pub(crate) fn majority(all: &[String], subset: &[String]) -> bool {
    let count = all.iter().filter(|m| subset.contains(m)).count();
    count >= all.len() / 2 + 1
}

#[cfg(test)]
mod tests {
    use super::majority;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_majority_thresholds() {
        let all = addrs(&["a", "b", "c"]);
        assert!(majority(&all, &addrs(&["a", "b"])));
        assert!(!majority(&all, &addrs(&["a"])));
        assert!(majority(&all, &addrs(&["a", "b", "c"])));
        // Members outside the roster do not count.
        assert!(!majority(&all, &addrs(&["a", "x"])));
    }
}
