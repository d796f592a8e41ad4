//! Protocol definitions shared by the extentfs services.
//!
//! Each service owns a method-id space and a set of typed messages; the
//! message codecs are built from the [`crate::wire`] primitives. Replies
//! carry a [`Status`] ahead of the method-specific body.

pub mod extent;
pub mod lock;
pub mod paxos;

#[cfg(test)]
mod tests;

use num_derive::{FromPrimitive, ToPrimitive};

/// Identifier of an extent (and, at the filesystem layer, an inode).
pub type ExtentId = u64;

/// Identifier of a lock. The filesystem locks an inode under its own id.
pub type LockId = u64;

/// Per-lock transaction counter disambiguating duplicate RPCs.
pub type Xid = u64;

/// Status codes travelling in every RPC reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum Status {
    /// The operation succeeded.
    Ok = 0,
    /// Transport-level failure, including handler dispatch errors.
    RpcErr = 1,
    /// The object is absent, or the caller does not hold the lock.
    Noent = 2,
    /// Persistence failure, invalid offset, or an operation
    /// inappropriate for the object.
    IoErr = 3,
    /// The operation would grow an object beyond the server's limit.
    Fbig = 4,
    /// A name to be created already exists.
    Exist = 5,
    /// The lock is contended; the server will send `retry` when it is
    /// this client's turn. Not an error.
    Retry = 6,
}

/// Extent-service method ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum ExtentMethod {
    Get = 0x6001,
    GetAttr = 0x6002,
    Put = 0x6003,
    Remove = 0x6004,
    Check = 0x6005,
}

/// Lock-service method ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum LockMethod {
    Acquire = 0x7001,
    Release = 0x7002,
    Stat = 0x7003,
}

/// Methods of the callback service every lock client hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum RlockMethod {
    Revoke = 0x8001,
    Retry = 0x8002,
}

/// Paxos-service method ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum PaxosMethod {
    PrepareReq = 0x9001,
    AcceptReq = 0x9002,
    DecideReq = 0x9003,
}
