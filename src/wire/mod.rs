//! Primitive wire codecs shared by every extentfs protocol.
//!
//! All multibyte values travel in big-endian (network byte order); byte
//! vectors and strings are length-prefixed with a `u32`. The typed message
//! codecs in [`crate::proto`] are built from these primitives.

pub mod emit;
pub mod parse;

#[cfg(test)]
mod tests;

use std::string::FromUtf8Error;

/// Result of parsing operations with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Upper bound on the length of an opaque byte field (extent contents).
pub const MAX_OPAQUE_LEN: usize = 64 * 1024 * 1024;

/// Upper bound on the length of an address or identifier string.
pub const MAX_ADDR_LEN: usize = 256;

/// Upper bound on the length of a Paxos value (an encoded member list).
pub const MAX_VALUE_LEN: usize = 16 * 1024;

/// Wire decoding errors.
#[derive(Debug)]
pub enum Error {
    /// The underlying reader failed or ran dry mid-field.
    IO(std::io::Error),
    /// A discriminator did not map to any known enum variant.
    EnumDiscMismatch,
    /// A string field was not valid UTF-8.
    IncorrectString(FromUtf8Error),
    /// A length prefix exceeded the field's maximum.
    MaxElemLimit,
}
