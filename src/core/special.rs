//! Special token isolation.
//!
//! Before ordinary encoding, special literals such as `<|im_start|>` are cut
//! out of the text so they map to their reserved ids instead of going through
//! BPE. Text lacking either `<|` or `|>` cannot contain a literal and is
//! passed through as a single piece.

use aho_corasick::{AhoCorasick, MatchKind};

use super::tokenizer::TokenizerError;
use super::vocab::{SPECIAL_END, SPECIAL_START};

/// A piece of text after special token splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<'a> {
    /// A special literal and its id.
    Special(&'a str, u32),
    /// Text between special literals. Never empty.
    Ordinary(&'a str),
}

impl<'a> Piece<'a> {
    pub fn as_str(&self) -> &'a str {
        match *self {
            Piece::Special(s, _) | Piece::Ordinary(s) => s,
        }
    }
}

/// Aho-Corasick matcher over the special literals.
///
/// Literals all start with `<|`, end with `|>` and contain neither marker
/// elsewhere, so no two can overlap. A single leftmost-first scan therefore
/// cuts the text exactly where splitting by each literal in turn would.
#[derive(Debug, Clone)]
pub struct SpecialSplitter {
    matcher: AhoCorasick,
    ids: Vec<u32>,
}

impl SpecialSplitter {
    /// Build a splitter for `(literal, id)` pairs. Earlier literals win when
    /// two start at the same position.
    pub fn new(tokens: &[(String, u32)]) -> Result<Self, TokenizerError> {
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostFirst)
            .build(tokens.iter().map(|(s, _)| s.as_str()))?;
        let ids = tokens.iter().map(|(_, id)| *id).collect();
        Ok(Self { matcher, ids })
    }

    /// Whether any special literal occurs anywhere in `text`.
    pub fn contains_special(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }

    /// Split `text` into special and ordinary pieces. Each call starts a fresh
    /// scan; empty text yields nothing.
    pub fn split<'a>(&'a self, text: &'a str) -> SpecialPieces<'a> {
        let matches = if text.contains(SPECIAL_START) && text.contains(SPECIAL_END) {
            Some(self.matcher.find_iter(text))
        } else {
            None
        };
        SpecialPieces {
            ids: &self.ids,
            text,
            matches,
            last_end: 0,
            pending: None,
        }
    }
}

/// Iterator returned by [`SpecialSplitter::split`].
pub struct SpecialPieces<'a> {
    ids: &'a [u32],
    text: &'a str,
    matches: Option<aho_corasick::FindIter<'a, 'a>>,
    last_end: usize,
    pending: Option<Piece<'a>>,
}

impl<'a> Iterator for SpecialPieces<'a> {
    type Item = Piece<'a>;

    fn next(&mut self) -> Option<Piece<'a>> {
        if let Some(piece) = self.pending.take() {
            return Some(piece);
        }

        if let Some(m) = self.matches.as_mut().and_then(|m| m.next()) {
            let special = Piece::Special(
                &self.text[m.start()..m.end()],
                self.ids[m.pattern().as_usize()],
            );
            let gap_start = self.last_end;
            self.last_end = m.end();
            if m.start() > gap_start {
                self.pending = Some(special);
                return Some(Piece::Ordinary(&self.text[gap_start..m.start()]));
            }
            return Some(special);
        }

        if self.last_end < self.text.len() {
            let rest = &self.text[self.last_end..];
            self.last_end = self.text.len();
            return Some(Piece::Ordinary(rest));
        }

        None
    }
}
