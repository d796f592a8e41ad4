//! Directory extent codec.
//!
//! A directory's bytes are UTF-8 lines of `<name> <decimal-inum>`. Order
//! on disk is irrelevant; the logical entity is a name-to-inum mapping
//! with unique keys. Names contain no whitespace or newline. Unparsable
//! lines are skipped.

use std::collections::BTreeMap;

use crate::proto::ExtentId;

/// Decodes a directory extent into its mapping.
pub fn parse_dir(bytes: &[u8]) -> BTreeMap<String, ExtentId> {
    let mut entries = BTreeMap::new();
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let (Some(name), Some(inum)) = (fields.next(), fields.next()) else { continue };
        let Ok(inum) = inum.parse::<ExtentId>() else { continue };
        entries.insert(name.to_owned(), inum);
    }
    entries
}

/// Encodes a mapping back into directory bytes.
pub fn encode_dir(entries: &BTreeMap<String, ExtentId>) -> Vec<u8> {
    let mut out = String::new();
    for (name, inum) in entries {
        out.push_str(name);
        out.push(' ');
        out.push_str(&inum.to_string());
        out.push('\n');
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{encode_dir, parse_dir};

    #[test]
    fn test_parse_and_encode_round_trip() {
        let bytes = b"beta 9223372036854775809\nalpha 17\n";
        let entries = parse_dir(bytes);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.get("alpha"), Some(&17));
        assert_eq!(entries.get("beta"), Some(&0x8000_0000_0000_0001));
        // Re-encoding is deterministic (sorted by name) and parses back
        // to the same mapping.
        let encoded = encode_dir(&entries);
        assert_eq!(encoded, b"alpha 17\nbeta 9223372036854775809\n");
        assert_eq!(parse_dir(&encoded), entries);
    }

    #[test]
    fn test_empty_directory() {
        assert!(parse_dir(b"").is_empty());
        assert_eq!(encode_dir(&BTreeMap::new()), b"");
    }

    #[test]
    fn test_duplicate_names_last_entry_wins() {
        let entries = parse_dir(b"twin 1\ntwin 2\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("twin"), Some(&2));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let entries = parse_dir(b"good 5\nnonumber\nbad notanum\n\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries.get("good"), Some(&5));
    }
}
