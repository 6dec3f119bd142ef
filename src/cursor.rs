use base64::{Engine, engine::general_purpose::STANDARD};
use std::collections::BTreeMap;

/// A resumable cursor: the last offset delivered on each partition. Kept as a `BTreeMap` so that
/// encoding is deterministic for a given set of partitions.
pub type Offsets = BTreeMap<i32, i64>;

/// Encodes a partition→offset map as the opaque token carried in `since`/`@continuation`.
pub fn encode(offsets: &Offsets) -> String {
    let as_strings: BTreeMap<String, i64> =
        offsets.iter().map(|(p, o)| (p.to_string(), *o)).collect();

    let json = serde_json::to_vec(&as_strings).expect("offset map serializes");

    STANDARD.encode(json)
}

/// Decodes a cursor token back into a partition→offset map. Any failure (empty string, invalid
/// base64, invalid JSON) yields an empty map rather than an error — an unreadable cursor is
/// treated the same as "no cursor".
pub fn decode(token: &str) -> Offsets {
    if token.is_empty() {
        return Offsets::new();
    }

    let Ok(bytes) = STANDARD.decode(token) else {
        return Offsets::new();
    };

    let Ok(as_strings) = serde_json::from_slice::<BTreeMap<String, i64>>(&bytes) else {
        return Offsets::new();
    };

    as_strings
        .into_iter()
        .filter_map(|(p, o)| p.parse::<i32>().ok().map(|p| (p, o)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let mut offsets = Offsets::new();
        offsets.insert(0, 12);
        offsets.insert(1, 0);

        let token = encode(&offsets);
        assert_eq!(decode(&token), offsets);
    }

    #[test]
    fn empty_string_decodes_to_empty_map() {
        assert_eq!(decode(""), Offsets::new());
    }

    #[test]
    fn garbage_decodes_to_empty_map() {
        assert_eq!(decode("not-valid-base64!!!"), Offsets::new());
        assert_eq!(decode(&base64::engine::general_purpose::STANDARD.encode(b"not json")), Offsets::new());
    }

    #[test]
    fn known_token_matches_original_source() {
        let mut offsets = Offsets::new();
        offsets.insert(0, 0);
        assert_eq!(encode(&offsets), "eyIwIjowfQ==");
    }
}
