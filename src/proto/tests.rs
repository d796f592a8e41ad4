#![cfg(test)]

use std::io::Cursor;

use num_traits::FromPrimitive;

use crate::proto::lock::LockArgs;
use crate::proto::paxos::{Ballot, PrepareRes};
use crate::proto::Status;

#[test]
fn test_status_discriminators() {
    assert_eq!(Status::from_u32(0), Some(Status::Ok));
    assert_eq!(Status::from_u32(6), Some(Status::Retry));
    assert_eq!(Status::from_u32(42), None);
}

#[test]
fn test_ballot_order_is_lexicographic() {
    let low = Ballot::new(3, "127.0.0.1:9002");
    let high_n = Ballot::new(4, "127.0.0.1:9001");
    let high_m = Ballot::new(3, "127.0.0.1:9003");
    assert!(high_n > low);
    assert!(high_m > low);
    assert!(high_n > high_m);
    assert!(low >= Ballot::new(3, "127.0.0.1:9002"));
}

#[test]
fn test_lock_args_round() {
    let args = LockArgs { lid: 42, client: "127.0.0.1:30001".to_owned(), xid: 7 };
    let mut buf = Vec::new();
    args.encode(&mut buf).expect("encode");
    let back = LockArgs::decode(&mut Cursor::new(buf)).expect("decode");
    assert_eq!(back.lid, 42);
    assert_eq!(back.client, "127.0.0.1:30001");
    assert_eq!(back.xid, 7);
}

#[test]
fn test_prepare_res_round() {
    let res = PrepareRes {
        oldinstance: false,
        accept: true,
        n_a: Ballot::new(9, "127.0.0.1:9001"),
        v_a: "127.0.0.1:9001,127.0.0.1:9002".to_owned(),
    };
    let mut buf = Vec::new();
    res.encode(&mut buf).expect("encode");
    let back = PrepareRes::decode(&mut Cursor::new(buf)).expect("decode");
    assert!(back.accept);
    assert!(!back.oldinstance);
    assert_eq!(back.n_a, Ballot::new(9, "127.0.0.1:9001"));
    assert_eq!(back.v_a, "127.0.0.1:9001,127.0.0.1:9002");
}
