//! The Paxos proposer.
//!
//! One run drives a single instance through prepare, accept and decide.
//! Unreachable members simply are not counted: every RPC carries a one
//! second deadline, and a majority of live acceptors is enough.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use crate::proto::paxos::{AcceptArgs, Ballot, DecideArgs, PrepareArgs, PrepareRes};
use crate::proto::{PaxosMethod, Status};
use crate::rpc::client::RpcClient;
use crate::wire::parse;

use super::acceptor::Acceptor;
use super::majority;

/// Deadline for every proposer-side RPC.
const RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Test hooks aborting a run between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakpoint {
    /// Stop after a prepare majority, before any accept is sent.
    AfterPrepare,
    /// Stop after an accept majority, before any decide is sent.
    AfterAccept,
}

struct ProposerState {
    /// A run is in flight; concurrent runs on one node are refused.
    running: bool,
    /// Numeric part of the last ballot this node used.
    n: u64,
    breakpoint: Option<Breakpoint>,
}

/// One node's proposer role.
pub struct Proposer {
    me: String,
    acceptor: Arc<Acceptor>,
    state: Mutex<ProposerState>,
    peers: DashMap<String, Arc<RpcClient>>,
}

impl Proposer {
    pub fn new(me: &str, acceptor: Arc<Acceptor>) -> Self {
        Self {
            me: me.to_owned(),
            acceptor,
            state: Mutex::new(ProposerState { running: false, n: 0, breakpoint: None }),
            peers: DashMap::new(),
        }
    }

    /// Arms a test breakpoint for the next run.
    pub async fn set_breakpoint(&self, bp: Breakpoint) {
        self.state.lock().await.breakpoint = Some(bp);
    }

    /// Drives `instance` toward agreement on `proposed_v` among
    /// `members`. Returns true when a decide was delivered; false when
    /// the run was refused, lost, abandoned, or stopped by a breakpoint.
    pub async fn run(&self, instance: u64, members: &[String], proposed_v: &str) -> bool {
        let (ballot, breakpoint) = {
            let mut state = self.state.lock().await;
            if state.running {
                warn!(instance, "proposer already running");
                return false;
            }
            state.running = true;
            // Strictly above anything this node has seen or used.
            let n_h = self.acceptor.n_h().await;
            state.n = state.n.max(n_h.n) + 1;
            (Ballot::new(state.n, &self.me), state.breakpoint.take())
        };
        info!(instance, n = ballot.n, value = proposed_v, "starting paxos run");

        let decided = self.phases(instance, members, proposed_v, ballot, breakpoint).await;
        self.state.lock().await.running = false;
        decided
    }

    async fn phases(
        &self,
        instance: u64,
        members: &[String],
        proposed_v: &str,
        ballot: Ballot,
        breakpoint: Option<Breakpoint>,
    ) -> bool {
        // Prepare.
        let mut promisers = Vec::new();
        let mut adopted: Option<(Ballot, String)> = None;
        for member in members {
            let args = PrepareArgs { src: self.me.clone(), instance, n: ballot.clone() };
            let mut body = Vec::new();
            let _ = args.encode(&mut body);
            let res = match self.call(member, PaxosMethod::PrepareReq, &body).await {
                Some(reply) => match PrepareRes::decode(&mut std::io::Cursor::new(reply)) {
                    Ok(res) => res,
                    Err(_) => continue,
                },
                None => continue,
            };
            if res.oldinstance {
                // Someone already decided this instance; adopt and stop.
                debug!(instance, %member, "instance already decided");
                self.acceptor.commit(instance, res.v_a).await;
                return false;
            }
            if res.accept {
                trace!(%member, "promised");
                promisers.push(member.clone());
                if res.n_a.n > 0 && adopted.as_ref().map_or(true, |(b, _)| res.n_a > *b) {
                    adopted = Some((res.n_a, res.v_a));
                }
            }
        }
        if !majority(members, &promisers) {
            debug!(instance, promisers = promisers.len(), "no prepare majority");
            return false;
        }
        // A previously accepted value binds this proposer.
        let value = match adopted {
            Some((_, v_a)) => v_a,
            None => proposed_v.to_owned(),
        };
        if breakpoint == Some(Breakpoint::AfterPrepare) {
            warn!(instance, "stopping at breakpoint 1");
            return false;
        }

        // Accept, to promisers only.
        let mut accepted = Vec::new();
        for member in &promisers {
            let args = AcceptArgs {
                src: self.me.clone(),
                instance,
                n: ballot.clone(),
                v: value.clone(),
            };
            let mut body = Vec::new();
            let _ = args.encode(&mut body);
            if let Some(reply) = self.call(member, PaxosMethod::AcceptReq, &body).await {
                if parse::u32(&mut std::io::Cursor::new(reply)).unwrap_or(0) == 1 {
                    trace!(%member, "accepted");
                    accepted.push(member.clone());
                }
            }
        }
        if !majority(members, &accepted) {
            debug!(instance, accepted = accepted.len(), "no accept majority");
            return false;
        }
        if breakpoint == Some(Breakpoint::AfterAccept) {
            warn!(instance, "stopping at breakpoint 2");
            return false;
        }

        // Decide, to acceptors that took the value.
        for member in &accepted {
            let args = DecideArgs { src: self.me.clone(), instance, v: value.clone() };
            let mut body = Vec::new();
            let _ = args.encode(&mut body);
            if self.call(member, PaxosMethod::DecideReq, &body).await.is_none() {
                debug!(%member, "decide not delivered");
            }
        }
        info!(instance, %value, "paxos run decided");
        true
    }

    /// One proposer-side RPC; timeouts and transport errors collapse to
    /// `None` so the member is simply not counted.
    async fn call(&self, member: &str, method: PaxosMethod, body: &[u8]) -> Option<Vec<u8>> {
        let cl = self
            .peers
            .entry(member.to_owned())
            .or_insert_with(|| Arc::new(RpcClient::new(member.to_owned())))
            .clone();
        match cl.call_timeout(method as u32, body, RPC_TIMEOUT).await {
            Ok((Status::Ok, reply)) => Some(reply),
            Ok((status, _)) => {
                debug!(%member, ?status, "paxos rpc refused");
                None
            }
            Err(err) => {
                debug!(%member, ?err, "paxos rpc failed");
                None
            }
        }
    }
}
