//! Extent-service message types.

use std::io::{self, Read, Write};

use crate::wire::{self, emit, parse};

use super::ExtentId;

/// Attributes stored alongside every extent.
///
/// Invariant: `size` equals the length of the extent's byte contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentAttr {
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub size: u64,
}

impl ExtentAttr {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::u64(dest, self.atime)?;
        emit::u64(dest, self.mtime)?;
        emit::u64(dest, self.ctime)?;
        emit::u64(dest, self.size)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            atime: parse::u64(src)?,
            mtime: parse::u64(src)?,
            ctime: parse::u64(src)?,
            size: parse::u64(src)?,
        })
    }
}

/// Arguments of `get`, `getattr`, `remove` and `check` (a bare id).
#[derive(Debug, Clone, Copy)]
pub struct IdArgs {
    pub id: ExtentId,
}

impl IdArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::u64(dest, self.id)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self { id: parse::u64(src)? })
    }
}

/// Arguments of `put`.
#[derive(Debug, Clone)]
pub struct PutArgs {
    pub id: ExtentId,
    pub data: Vec<u8>,
}

impl PutArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::u64(dest, self.id)?;
        emit::vector(dest, &self.data)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            id: parse::u64(src)?,
            data: parse::vec_max_size(src, wire::MAX_OPAQUE_LEN)?,
        })
    }
}
