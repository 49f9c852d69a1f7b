//! Match terms and the containment tests they run against entry text.
//!
//! A [`Term`] is one user-supplied string: a rule's own word, one of its
//! include/exclude terms, or a global block term. Depending on the tenant's
//! settings it is matched as a literal substring, as a literal with
//! full-word boundaries, or as a case-insensitive regular expression.

use regex::{Regex, RegexBuilder};

/// How a term is tested against text.
#[derive(Debug, Clone)]
pub enum TermPattern {
    /// Case-insensitive substring (optionally with full-word boundaries).
    Literal,
    /// Compiled case-insensitive regular expression.
    Regex(Regex),
    /// Regex compilation failed; the term never matches.
    Invalid(String),
}

/// A single match term. Serialized as a plain string.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Term {
    text: String,
    needle: String,
    pattern: TermPattern,
}

impl Term {
    /// Create a literal term. Surrounding whitespace is trimmed.
    pub fn new(text: impl AsRef<str>) -> Self {
        let text = text.as_ref().trim().to_string();
        let needle = text.to_lowercase();
        Self {
            text,
            needle,
            pattern: TermPattern::Literal,
        }
    }

    /// The term as the user wrote it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Case-normalized form, used as identity for dedup and lookups.
    pub fn key(&self) -> &str {
        &self.needle
    }

    pub fn pattern(&self) -> &TermPattern {
        &self.pattern
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    /// False only when regex compilation failed.
    pub fn is_active(&self) -> bool {
        !matches!(self.pattern, TermPattern::Invalid(_))
    }

    /// Recompile for the given mode. Returns the compile error message when
    /// regex mode is on and the term is not a valid pattern.
    pub fn compile(&mut self, regex_mode: bool) -> Option<String> {
        if !regex_mode {
            self.pattern = TermPattern::Literal;
            return None;
        }
        match RegexBuilder::new(&self.text).case_insensitive(true).build() {
            Ok(re) => {
                self.pattern = TermPattern::Regex(re);
                None
            }
            Err(e) => {
                let reason = e.to_string();
                self.pattern = TermPattern::Invalid(reason.clone());
                Some(reason)
            }
        }
    }

    /// Test whether this term occurs in `haystack`, which must already be
    /// lowercased. `full_word` only applies to literal terms.
    pub fn occurs_in(&self, haystack: &str, full_word: bool) -> bool {
        if self.is_empty() {
            return false;
        }
        match &self.pattern {
            TermPattern::Literal if full_word => contains_full_word(haystack, &self.needle),
            TermPattern::Literal => haystack.contains(self.needle.as_str()),
            TermPattern::Regex(re) => re.is_match(haystack),
            TermPattern::Invalid(_) => false,
        }
    }
}

impl From<String> for Term {
    fn from(text: String) -> Self {
        Term::new(text)
    }
}

impl From<&str> for Term {
    fn from(text: &str) -> Self {
        Term::new(text)
    }
}

impl From<Term> for String {
    fn from(term: Term) -> Self {
        term.text
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.needle == other.needle
    }
}

impl Eq for Term {}

/// Find `needle` in `haystack` where neither neighbour is a word character.
///
/// Ideographic scripts are written without spaces, so CJK characters count as
/// boundaries: `mk` matches in `卖mk了` but not in `mks`.
pub fn contains_full_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_word_char(c));
        let after_ok = haystack[end..].chars().next().is_none_or(|c| !is_word_char(c));
        if before_ok && after_ok {
            return true;
        }
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Alphanumeric, excluding ideographic and syllabic East Asian scripts.
/// `_` is not a word character.
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() && !is_ideographic(c)
}

fn is_ideographic(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF      // Hiragana, Katakana
            | 0x3400..=0x4DBF // CJK Extension A
            | 0x4E00..=0x9FFF // CJK Unified Ideographs
            | 0xAC00..=0xD7AF // Hangul syllables
            | 0xF900..=0xFAFF // CJK Compatibility Ideographs
            | 0x20000..=0x3134F
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_word_rejects_trailing_alphanumeric() {
        assert!(!contains_full_word("selling mks cheap", "mk"));
        assert!(!contains_full_word("amk", "mk"));
    }

    #[test]
    fn full_word_accepts_cjk_neighbours() {
        assert!(contains_full_word("卖mk了", "mk"));
        assert!(contains_full_word("出了个mk", "mk"));
    }

    #[test]
    fn full_word_accepts_string_edges_and_punctuation() {
        assert!(contains_full_word("mk", "mk"));
        assert!(contains_full_word("[mk] for sale", "mk"));
        assert!(contains_full_word("mk_2", "mk"));
    }

    #[test]
    fn underscore_is_a_boundary() {
        assert!(!is_word_char('_'));
        assert!(contains_full_word("_mk_", "mk"));
    }

    #[test]
    fn full_word_keeps_scanning_after_rejected_occurrence() {
        assert!(contains_full_word("mkmk mk", "mk"));
        assert!(!contains_full_word("mkmk", "mk"));
    }

    #[test]
    fn cjk_term_matches_inside_cjk_text() {
        assert!(contains_full_word("出了个mk", "出"));
    }

    #[test]
    fn literal_is_case_insensitive() {
        let term = Term::new("MK");
        assert!(term.occurs_in("selling mk cheap", false));
        assert_eq!(term.text(), "MK");
        assert_eq!(term.key(), "mk");
    }

    #[test]
    fn empty_term_never_matches() {
        let term = Term::new("   ");
        assert!(term.is_empty());
        assert!(!term.occurs_in("anything", false));
    }

    #[test]
    fn regex_term_matches_case_insensitively() {
        let mut term = Term::new(r"M\d+");
        assert!(term.compile(true).is_none());
        assert!(term.occurs_in("selling m12 today", false));
        assert!(!term.occurs_in("selling mk today", false));
    }

    #[test]
    fn invalid_regex_is_inactive() {
        let mut term = Term::new("(unclosed");
        let err = term.compile(true);
        assert!(err.is_some());
        assert!(!term.is_active());
        assert!(!term.occurs_in("(unclosed", false));
    }

    #[test]
    fn recompiling_without_regex_restores_literal() {
        let mut term = Term::new("(unclosed");
        term.compile(true);
        assert!(term.compile(false).is_none());
        assert!(term.is_active());
        assert!(term.occurs_in("x (unclosed y", false));
    }

    #[test]
    fn serializes_as_plain_string() {
        let term = Term::new(" 出 ");
        assert_eq!(serde_json::to_string(&term).unwrap(), "\"出\"");
        let back: Term = serde_json::from_str("\"卖\"").unwrap();
        assert_eq!(back.text(), "卖");
    }
}
