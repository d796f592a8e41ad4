//! Extentfs - a distributed extent filesystem with cache-coherent locking.
//!
//! Three cooperating services back the filesystem: an extent store (durable
//! byte arrays keyed by 64-bit id), a lock service whose leases clients may
//! cache across transactions, and a Paxos-replicated configuration layer
//! that keeps the lock-service membership agreed. The [`fs`] module turns
//! filesystem calls into lock acquisitions followed by extent reads and
//! writes; dirty extents are flushed back when a lock is relinquished.

pub mod config;
pub mod extent;
pub mod fs;
pub mod lock;
pub mod paxos;
pub mod proto;
pub mod rpc;
pub mod settings;
pub mod wire;
