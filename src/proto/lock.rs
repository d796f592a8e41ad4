//! Lock-service and lock-callback message types.

use std::io::{self, Read, Write};

use crate::wire::{self, emit, parse};

use super::{LockId, Xid};

/// Arguments of `acquire` and `release`.
///
/// `client` is the `host:port` of the caller's callback service; together
/// with `xid` it disambiguates duplicate RPCs.
#[derive(Debug, Clone)]
pub struct LockArgs {
    pub lid: LockId,
    pub client: String,
    pub xid: Xid,
}

impl LockArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::u64(dest, self.lid)?;
        emit::string(dest, &self.client)?;
        emit::u64(dest, self.xid)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            lid: parse::u64(src)?,
            client: parse::string_max_size(src, wire::MAX_ADDR_LEN)?,
            xid: parse::u64(src)?,
        })
    }
}

/// Arguments of the server-to-client `revoke` and `retry` callbacks.
///
/// `xxid` tags the callback with the acquire it pertains to (the acquire's
/// xid plus one) so a client can park messages that overtook the acquire
/// reply.
#[derive(Debug, Clone, Copy)]
pub struct CallbackArgs {
    pub lid: LockId,
    pub xxid: Xid,
}

impl CallbackArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::u64(dest, self.lid)?;
        emit::u64(dest, self.xxid)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self { lid: parse::u64(src)?, xxid: parse::u64(src)? })
    }
}
