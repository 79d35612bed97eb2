//! [Pack]: a reversible string framing for nested arrays/dicts (spec §3).
//!
//! Separator `,`, escape `$`, separator-escape `$0`, escape-escape `$1`.
//! Encoding replaces `$` → `$1` then `,` → `$0` per item, then joins with
//! `,`. Decoding reverses this per split segment.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    items: Vec<String>,
}

impl Pack {
    pub fn new(items: Vec<String>) -> Pack {
        Pack { items }
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }

    pub fn into_items(self) -> Vec<String> {
        self.items
    }

    /// Parses a previously-encoded string, per the decode law in spec §8:
    /// `decode(encode(items)) == items` for any finite array of strings.
    ///
    /// `encode(&[])` and `encode(&[""])` both produce `""`; decoding an
    /// empty string resolves to the empty array, the more common of the
    /// two empty-pack shapes. A single empty-string item is therefore
    /// the one value that does not survive a round trip — see DESIGN.md.
    pub fn decode(encoded: &str) -> Pack {
        if encoded.is_empty() {
            return Pack::new(Vec::new());
        }
        let items = encoded.split(',').map(unescape_item).collect();
        Pack::new(items)
    }

    pub fn encode(&self) -> String {
        self.items.iter().map(|s| escape_item(s)).collect::<Vec<_>>().join(",")
    }

    /// Views the packed items as key/value pairs, pairing consecutive
    /// items. Duplicate keys resolve to the first occurrence.
    pub fn as_dict(&self) -> Vec<(String, Option<String>)> {
        let mut seen = std::collections::HashSet::new();
        let mut pairs = Vec::new();
        let mut iter = self.items.iter();
        while let Some(key) = iter.next() {
            let value = iter.next().cloned();
            if seen.insert(key.clone()) {
                pairs.push((key.clone(), value));
            }
        }
        pairs
    }
}

impl std::fmt::Display for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Escape first, then escape the separator — encoding order matters so
/// that a literal `$0` in the source string round-trips: it becomes
/// `$10` (escaped `$`, then literal `0`), never mistaken for an escaped
/// separator.
fn escape_item(s: &str) -> String {
    s.replace('$', "$1").replace(',', "$0")
}

/// Reverses [escape_item] in the opposite substitution order.
fn unescape_item(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            match chars.peek() {
                Some('0') => {
                    chars.next();
                    out.push(',');
                }
                Some('1') => {
                    chars.next();
                    out.push('$');
                }
                _ => out.push('$'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_from_spec() {
        let pack = Pack::new(vec!["a".into(), "b,".into(), "c$".into()]);
        assert_eq!(pack.encode(), "a,b$0,c$1");

        let decoded = Pack::decode("$0$0$0,$1$0,,");
        assert_eq!(
            decoded.into_items(),
            vec![",,,".to_string(), "$,".to_string(), "".to_string(), "".to_string()]
        );
    }

    #[test]
    fn round_trip_arbitrary_strings() {
        let cases: Vec<Vec<String>> = vec![
            vec![],
            vec!["plain".into(), "words".into()],
            vec!["has,comma".into(), "has$dollar".into(), "both,$".into()],
            vec!["$0$1$0$1".into()],
            vec!["".into(), "".into(), "".into()],
        ];
        for items in cases {
            let pack = Pack::new(items.clone());
            let round_tripped = Pack::decode(&pack.encode()).into_items();
            assert_eq!(round_tripped, items);
        }
    }

    #[test]
    fn dict_view_keeps_first_duplicate() {
        let pack = Pack::new(vec!["k".into(), "v1".into(), "k".into(), "v2".into()]);
        let dict = pack.as_dict();
        assert_eq!(dict, vec![("k".to_string(), Some("v1".to_string()))]);
    }
}
