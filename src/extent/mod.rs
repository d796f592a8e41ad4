//! Extent store: durable byte arrays keyed by 64-bit id.
//!
//! The [`server::ExtentServer`] persists one data file and one attribute
//! record per id; the [`client::ExtentClient`] layers a write-back cache
//! with tombstones on top. The client assumes the caller holds the lock
//! covering each extent it touches.

pub mod client;
pub mod server;

use crate::proto::Status;

/// Result of extent operations. Failures are wire statuses: `Noent`,
/// `IoErr` or `RpcErr`.
pub type Result<T> = std::result::Result<T, Status>;

/// Seconds since the Unix epoch, used for extent attribute stamps.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
