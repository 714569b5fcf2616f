// ============================================================
// Layer 3 — Charset
// ============================================================
// Maps transcription characters to CTC token ids and back.
//
// Token ids are indices into the ordered character list. The CTC
// blank is the class right after the last character, so a network
// trained on a charset of N characters has N + 1 output classes and
// the blank is always the last class.
//
// Example with charset "abc":
//   'a' → 0, 'b' → 1, 'c' → 2, blank → 3, num_classes = 4

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::error::{CtcError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Charset {
    chars: Vec<char>,
    index: HashMap<char, u32>,
}

impl Charset {
    /// Build a charset from an explicit ordered character string.
    /// Duplicate characters keep their first position.
    pub fn new(chars: &str) -> Self {
        let mut ordered = Vec::new();
        let mut index   = HashMap::new();
        for c in chars.chars() {
            if !index.contains_key(&c) {
                index.insert(c, ordered.len() as u32);
                ordered.push(c);
            }
        }
        Self { chars: ordered, index }
    }

    /// Collect every distinct character of the given texts, sorted.
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let set: BTreeSet<char> = texts.into_iter().flat_map(str::chars).collect();
        let chars: String = set.into_iter().collect();
        Self::new(&chars)
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Index of the CTC blank class.
    pub fn blank(&self) -> usize {
        self.chars.len()
    }

    /// Number of network output classes (characters + blank).
    pub fn num_classes(&self) -> usize {
        self.chars.len() + 1
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars()
            .map(|c| self.index.get(&c).copied().ok_or(CtcError::UnknownCharacter(c)))
            .collect()
    }

    /// Decode token ids into text. Ids outside the charset (the blank,
    /// the padding sentinel) are skipped.
    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter_map(|&id| self.chars.get(id as usize))
            .collect()
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

impl From<String> for Charset {
    fn from(s: String) -> Self {
        Charset::new(&s)
    }
}

impl From<Charset> for String {
    fn from(c: Charset) -> Self {
        c.as_string()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_is_last_class() {
        let cs = Charset::new("abc");
        assert_eq!(cs.blank(), 3);
        assert_eq!(cs.num_classes(), 4);
    }

    #[test]
    fn test_encode_decode() {
        let cs  = Charset::new("abc ");
        let ids = cs.encode("cab a").unwrap();
        assert_eq!(ids, vec![2, 0, 1, 3, 0]);
        assert_eq!(cs.decode(&ids), "cab a");
    }

    #[test]
    fn test_unknown_character() {
        let cs = Charset::new("ab");
        assert!(matches!(cs.encode("abz"), Err(CtcError::UnknownCharacter('z'))));
    }

    #[test]
    fn test_decode_skips_blank() {
        let cs = Charset::new("ab");
        assert_eq!(cs.decode(&[0, 2, 1]), "ab");
    }

    #[test]
    fn test_from_texts_sorted_unique() {
        let cs = Charset::from_texts(["hello", "world"]);
        assert_eq!(cs.as_string(), "dehlorw");
    }

    #[test]
    fn test_serde_as_string() {
        let cs   = Charset::new("xy");
        let json = serde_json::to_string(&cs).unwrap();
        assert_eq!(json, "\"xy\"");
        let back: Charset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cs);
    }
}
