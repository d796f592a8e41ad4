//! Primitive serialization utilities for the extentfs wire format.
//!
//! Mirrors [`super::parse`]: big-endian integers, `u32` length prefixes.
//! Serializing into an in-memory `Vec<u8>` cannot fail, but the functions
//! keep `io::Result` signatures so frames can also be written straight to
//! a stream.

use std::io::{self, Error, ErrorKind, Write};

use byteorder::{BigEndian, WriteBytesExt};
use num_traits::ToPrimitive;

/// Serializes a `u32` in big-endian order.
pub fn u32(dest: &mut dyn Write, n: u32) -> io::Result<()> {
    dest.write_u32::<BigEndian>(n)
}

/// Serializes a `u64` in big-endian order.
pub fn u64(dest: &mut dyn Write, n: u64) -> io::Result<()> {
    dest.write_u64::<BigEndian>(n)
}

/// Serializes a boolean as a `0`/`1` discriminator.
pub fn bool(dest: &mut dyn Write, b: bool) -> io::Result<()> {
    u32(dest, if b { 1 } else { 0 })
}

/// Serializes a byte slice with a `u32` length prefix.
pub fn vector(dest: &mut dyn Write, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "field too long"))?;
    dest.write_u32::<BigEndian>(len)?;
    dest.write_all(data)
}

/// Serializes a string as a length-prefixed UTF-8 byte vector.
pub fn string(dest: &mut dyn Write, s: &str) -> io::Result<()> {
    vector(dest, s.as_bytes())
}

/// Serializes an enum variant as a `u32` discriminator.
pub fn variant(dest: &mut dyn Write, v: impl ToPrimitive) -> io::Result<()> {
    let disc = v
        .to_u32()
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "variant out of range"))?;
    u32(dest, disc)
}
