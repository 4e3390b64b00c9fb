//! Reversible protection of double-quoted text.
//!
//! Quoted arguments in a RUN line (`grep "a\|b"`, `not grep "x | y"`) must not
//! be split on `|` or spaces while the line is rewritten. Each quoted span is
//! swapped for an opaque placeholder before tokenizing and put back afterwards.
//!
//! Placeholders are plain substrings: if a placeholder happens to already occur
//! in the input text, restoring will expand it too. This is a known limitation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// A double quote, one or more characters (non-greedy), a double quote.
static QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(".+?")"#).unwrap());

/// Placeholder token -> original quoted span (quotes included).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteMap(BTreeMap<String, String>);

impl QuoteMap {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Content-derived placeholder: first 128 bits of the SHA-256, hex encoded.
fn placeholder(span: &str) -> String {
    let digest = Sha256::digest(span.as_bytes());
    hex::encode(&digest[..16])
}

/// Replace every double-quoted span in `text` with its placeholder.
///
/// Identical spans collapse onto the same placeholder.
pub fn shield(text: &str) -> (String, QuoteMap) {
    let mut map = BTreeMap::new();
    for m in QUOTED_RE.find_iter(text) {
        let span = m.as_str();
        map.entry(placeholder(span))
            .or_insert_with(|| span.to_string());
    }

    let mut shielded = text.to_string();
    for (token, span) in &map {
        shielded = shielded.replace(span.as_str(), token);
    }
    (shielded, QuoteMap(map))
}

/// Put the original quoted spans back in place of their placeholders.
pub fn restore(text: &str, map: &QuoteMap) -> String {
    map.iter()
        .fold(text.to_string(), |acc, (token, span)| acc.replace(token, span))
}
