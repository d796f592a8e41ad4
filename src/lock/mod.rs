//! Cache-coherent lock service.
//!
//! Locks are leases a client may cache across transactions: once granted,
//! repeat acquires are served locally until the server revokes the lease
//! on behalf of a waiter. The [`server::LockServer`] runs the grant state
//! machine; the [`client::LockClient`] keeps the per-lock cache and hosts
//! the callback service the server revokes through.

pub mod client;
pub mod server;

use async_trait::async_trait;

use crate::proto::{LockId, Status};

/// Result of lock operations. Failures are wire statuses.
pub type Result<T> = std::result::Result<T, Status>;

/// Hook invoked by the lock client's releaser before a lock is returned
/// to the server.
///
/// The filesystem layer wires this to the extent cache flush so dirty
/// data reaches the extent server before lock ownership moves on.
#[async_trait]
pub trait Flusher: Send + Sync {
    async fn flush(&self, lid: LockId) -> std::result::Result<(), Status>;
}
