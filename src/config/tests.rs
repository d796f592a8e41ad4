#![cfg(test)]

use super::{members_to_value, value_to_members};

#[test]
fn test_member_list_codec() {
    let members =
        vec!["127.0.0.1:9001".to_owned(), "127.0.0.1:9002".to_owned(), "127.0.0.1:9003".to_owned()];
    let value = members_to_value(&members);
    assert_eq!(value, "127.0.0.1:9001,127.0.0.1:9002,127.0.0.1:9003");
    assert_eq!(value_to_members(&value), members);
}

#[test]
fn test_empty_value_is_empty_view() {
    assert!(value_to_members("").is_empty());
    assert_eq!(members_to_value(&[]), "");
}
