#![cfg(test)]

use std::io::Cursor;

use crate::wire::{emit, parse, Error, MAX_ADDR_LEN};

#[test]
fn test_u64_round() {
    let init = [0u64, 1, 0x8000_0000_0000_0001, u64::MAX];
    let mut buf = Vec::new();
    for n in init {
        emit::u64(&mut buf, n).unwrap();
    }
    let mut src = Cursor::new(buf);
    for correct_res in init {
        let val = parse::u64(&mut src).expect("Cannot parse value!");
        assert_eq!(val, correct_res)
    }
}

#[test]
fn test_bool_rejects_bad_disc() {
    let mut buf = Vec::new();
    emit::u32(&mut buf, 7).unwrap();
    let mut src = Cursor::new(buf);
    assert!(matches!(parse::bool(&mut src), Err(Error::EnumDiscMismatch)));
}

#[test]
fn test_string_limit() {
    let mut buf = Vec::new();
    emit::string(&mut buf, &"x".repeat(MAX_ADDR_LEN + 1)).unwrap();
    let mut src = Cursor::new(buf);
    assert!(matches!(
        parse::string_max_size(&mut src, MAX_ADDR_LEN),
        Err(Error::MaxElemLimit)
    ));
}

#[test]
fn test_vector_truncated_source() {
    let mut buf = Vec::new();
    emit::u32(&mut buf, 16).unwrap();
    buf.extend_from_slice(b"short");
    let mut src = Cursor::new(buf);
    assert!(matches!(parse::vec_max_size(&mut src, 1024), Err(Error::IO(_))));
}
