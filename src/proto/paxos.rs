//! Paxos message types.

use std::io::{self, Read, Write};

use crate::wire::{self, emit, parse};

/// A proposal ballot.
///
/// Ballots order lexicographically by `(n, m)`; the derived ordering
/// relies on the field order here.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ballot {
    pub n: u64,
    pub m: String,
}

impl Ballot {
    pub fn new(n: u64, m: impl Into<String>) -> Self {
        Self { n, m: m.into() }
    }

    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::u64(dest, self.n)?;
        emit::string(dest, &self.m)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self { n: parse::u64(src)?, m: parse::string_max_size(src, wire::MAX_ADDR_LEN)? })
    }
}

/// Arguments of `preparereq`.
#[derive(Debug, Clone)]
pub struct PrepareArgs {
    pub src: String,
    pub instance: u64,
    pub n: Ballot,
}

impl PrepareArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::string(dest, &self.src)?;
        emit::u64(dest, self.instance)?;
        self.n.encode(dest)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            src: parse::string_max_size(src, wire::MAX_ADDR_LEN)?,
            instance: parse::u64(src)?,
            n: Ballot::decode(src)?,
        })
    }
}

/// Reply of `preparereq`.
///
/// Exactly one of three shapes: `oldinstance` with the decided value in
/// `v_a`, a promise (`accept` with the highest accepted ballot and value),
/// or a rejection (both flags clear).
#[derive(Debug, Clone, Default)]
pub struct PrepareRes {
    pub oldinstance: bool,
    pub accept: bool,
    pub n_a: Ballot,
    pub v_a: String,
}

impl PrepareRes {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::bool(dest, self.oldinstance)?;
        emit::bool(dest, self.accept)?;
        self.n_a.encode(dest)?;
        emit::string(dest, &self.v_a)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            oldinstance: parse::bool(src)?,
            accept: parse::bool(src)?,
            n_a: Ballot::decode(src)?,
            v_a: parse::string_max_size(src, wire::MAX_VALUE_LEN)?,
        })
    }
}

/// Arguments of `acceptreq`.
#[derive(Debug, Clone)]
pub struct AcceptArgs {
    pub src: String,
    pub instance: u64,
    pub n: Ballot,
    pub v: String,
}

impl AcceptArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::string(dest, &self.src)?;
        emit::u64(dest, self.instance)?;
        self.n.encode(dest)?;
        emit::string(dest, &self.v)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            src: parse::string_max_size(src, wire::MAX_ADDR_LEN)?,
            instance: parse::u64(src)?,
            n: Ballot::decode(src)?,
            v: parse::string_max_size(src, wire::MAX_VALUE_LEN)?,
        })
    }
}

/// Arguments of `decidereq`.
#[derive(Debug, Clone)]
pub struct DecideArgs {
    pub src: String,
    pub instance: u64,
    pub v: String,
}

impl DecideArgs {
    pub fn encode(&self, dest: &mut dyn Write) -> io::Result<()> {
        emit::string(dest, &self.src)?;
        emit::u64(dest, self.instance)?;
        emit::string(dest, &self.v)
    }

    pub fn decode(src: &mut impl Read) -> wire::Result<Self> {
        Ok(Self {
            src: parse::string_max_size(src, wire::MAX_ADDR_LEN)?,
            instance: parse::u64(src)?,
            v: parse::string_max_size(src, wire::MAX_VALUE_LEN)?,
        })
    }
}
