//! The acceptor's durable log.
//!
//! An append-only text file, one record per line:
//!
//! ```text
//! instance <i> <v>
//! high <n> <m>
//! prop <n> <m> <v>
//! ```
//!
//! `<v>` runs to the end of the line and may be empty; `<m>` is a node
//! address and contains no whitespace. Records are flushed and synced
//! before the RPC that caused them is answered; replaying the file in
//! order reconstructs everything a restarted acceptor must remember.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::proto::paxos::Ballot;

/// Acceptor state reconstructed from (and mirrored by) the log.
#[derive(Debug, Clone)]
pub struct AcceptorState {
    /// Highest decided instance.
    pub instance_h: u64,
    /// Decided values for instances `1..=instance_h`.
    pub values: HashMap<u64, String>,
    /// Highest prepare ballot seen for the current instance.
    pub n_h: Ballot,
    /// Highest accepted ballot for the current instance.
    pub n_a: Ballot,
    /// Value accepted at `n_a`.
    pub v_a: String,
}

impl AcceptorState {
    pub fn new(me: &str) -> Self {
        Self {
            instance_h: 0,
            values: HashMap::new(),
            n_h: Ballot::new(0, me),
            n_a: Ballot::new(0, me),
            v_a: String::new(),
        }
    }

    /// Resets the per-instance triple after a decide.
    pub fn reset_round(&mut self, me: &str) {
        self.n_h = Ballot::new(0, me);
        self.n_a = Ballot::new(0, me);
        self.v_a.clear();
    }
}

/// Append-only log backing one acceptor.
pub struct Log {
    path: PathBuf,
    file: File,
}

impl Log {
    /// Opens (or creates) the log at `path` and replays any existing
    /// records into a fresh [`AcceptorState`] for `me`.
    pub async fn open(path: impl Into<PathBuf>, me: &str) -> io::Result<(Self, AcceptorState)> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err),
        };
        let state = replay(&text, me);
        if state.instance_h > 0 {
            debug!(path = %path.display(), instance_h = state.instance_h, "replayed paxos log");
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok((Self { path, file }, state))
    }

    /// Records a decided instance.
    pub async fn log_instance(&mut self, instance: u64, value: &str) -> io::Result<()> {
        self.append(format!("instance {instance} {value}\n")).await
    }

    /// Records the highest prepare ballot.
    pub async fn log_high(&mut self, n: &Ballot) -> io::Result<()> {
        self.append(format!("high {} {}\n", n.n, n.m)).await
    }

    /// Records an accepted proposal.
    pub async fn log_prop(&mut self, n: &Ballot, value: &str) -> io::Result<()> {
        self.append(format!("prop {} {} {}\n", n.n, n.m, value)).await
    }

    /// Returns the raw log text (test hook).
    pub async fn dump(&self) -> io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }

    /// Replaces the log with `text` and replays it (test hook).
    pub async fn restore(&mut self, text: &str, me: &str) -> io::Result<AcceptorState> {
        tokio::fs::write(&self.path, text).await?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        Ok(replay(text, me))
    }

    async fn append(&mut self, record: String) -> io::Result<()> {
        self.file.write_all(record.as_bytes()).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

/// Rebuilds acceptor state by applying log records in order.
pub fn replay(text: &str, me: &str) -> AcceptorState {
    let mut state = AcceptorState::new(me);
    for line in text.lines() {
        let Some((kind, rest)) = line.split_once(' ') else { continue };
        match kind {
            "instance" => {
                let (i, v) = split_number(rest);
                let Some(i) = i else { continue };
                state.values.insert(i, v.to_owned());
                if i > state.instance_h {
                    state.instance_h = i;
                }
                state.reset_round(me);
            }
            "high" => {
                if let Some(n) = parse_ballot(rest) {
                    state.n_h = n;
                }
            }
            "prop" => {
                let (n, rest) = match rest.split_once(' ') {
                    Some((n, rest)) => (n, rest),
                    None => continue,
                };
                let (m, v) = rest.split_once(' ').unwrap_or((rest, ""));
                if let Ok(n) = n.parse() {
                    state.n_a = Ballot::new(n, m);
                    state.v_a = v.to_owned();
                }
            }
            _ => {}
        }
    }
    state
}

fn split_number(rest: &str) -> (Option<u64>, &str) {
    match rest.split_once(' ') {
        Some((num, tail)) => (num.parse().ok(), tail),
        None => (rest.parse().ok(), ""),
    }
}

fn parse_ballot(rest: &str) -> Option<Ballot> {
    let (n, m) = rest.split_once(' ').unwrap_or((rest, ""));
    Some(Ballot::new(n.parse().ok()?, m))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::replay;
    use crate::proto::paxos::Ballot;

    const ME: &str = "127.0.0.1:9001";

    #[test]
    fn test_replay_reconstructs_decides() {
        let text = "instance 1 a:1\nhigh 3 n2\nprop 3 n2 a:1,b:2\ninstance 2 a:1,b:2\n";
        let state = replay(text, ME);
        assert_eq!(state.instance_h, 2);
        assert_eq!(state.values.get(&1).map(String::as_str), Some("a:1"));
        assert_eq!(state.values.get(&2).map(String::as_str), Some("a:1,b:2"));
        // The decide reset the per-instance round.
        assert_eq!(state.n_h, Ballot::new(0, ME));
        assert_eq!(state.n_a, Ballot::new(0, ME));
        assert!(state.v_a.is_empty());
    }

    #[test]
    fn test_replay_keeps_open_round() {
        let text = "instance 1 a:1\nhigh 5 n3\nprop 4 n2 a:1,c:3\n";
        let state = replay(text, ME);
        assert_eq!(state.instance_h, 1);
        assert_eq!(state.n_h, Ballot::new(5, "n3"));
        assert_eq!(state.n_a, Ballot::new(4, "n2"));
        assert_eq!(state.v_a, "a:1,c:3");
    }

    #[test]
    fn test_replay_empty_value() {
        let state = replay("instance 1 \n", ME);
        assert_eq!(state.values.get(&1).map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_log_round_trips_through_dump_and_restore() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Path::new(dir.path()).join("paxos-test.log");
        let (mut log, state) = super::Log::open(&path, ME).await.expect("open");
        assert_eq!(state.instance_h, 0);

        log.log_high(&Ballot::new(2, ME)).await.expect("high");
        log.log_prop(&Ballot::new(2, ME), "m1,m2").await.expect("prop");
        log.log_instance(1, "m1,m2").await.expect("instance");

        let dumped = log.dump().await.expect("dump");
        let (mut other, _) = super::Log::open(dir.path().join("other.log"), ME).await.expect("open");
        let restored = other.restore(&dumped, ME).await.expect("restore");
        assert_eq!(restored.instance_h, 1);
        assert_eq!(restored.values.get(&1).map(String::as_str), Some("m1,m2"));
    }
}
