//! Regex pre-tokenization.
//!
//! Text is cut into pieces before BPE so that merges never cross word,
//! number, punctuation or whitespace boundaries. The pieces are consecutive
//! and together reproduce the input exactly.

use fancy_regex::Regex as FancyRegex;

#[cfg(feature = "pcre2")]
use pcre2::bytes::Regex as Pcre2Regex;

use super::tokenizer::TokenizerError;

/// Split pattern of the Qwen tokenizer.
///
/// In order: English contractions, an optional leading non-letter followed by
/// letters, a single numeric character, punctuation runs with an optional
/// leading space and trailing newlines, newline runs, whitespace not followed
/// by non-whitespace, and any remaining whitespace.
pub const QWEN_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

/// `QWEN_PATTERN` without the `\s+(?!\S)` branch.
///
/// With no lookaround left, fancy-regex hands the whole pattern to the
/// `regex` crate's automata, which need no backtracking stack however long a
/// run gets. [`lookahead_end`] restores what the removed branch did.
const QWEN_LINEAR_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+";

/// Regex backend: fancy-regex by default, PCRE2 with the `pcre2` feature.
enum RegexBackend {
    Fancy(Box<FancyRegex>),
    #[cfg(feature = "pcre2")]
    Pcre2(Pcre2Regex),
}

/// Compiled split pattern.
///
/// `QWEN_PATTERN` is recognised and run in linear time, so arbitrarily long
/// whitespace or punctuation runs split without error. Other patterns run as
/// given; if they use lookaround, very long runs can exceed the backtracking
/// limit and surface as [`TokenizerError::RegexMatch`].
pub struct PreTokenizer {
    regex: RegexBackend,
    pattern: String,
    emulate_lookahead: bool,
}

impl PreTokenizer {
    /// Compile `pattern` with the fancy-regex backend.
    pub fn new(pattern: &str) -> Result<Self, TokenizerError> {
        let emulate_lookahead = pattern == QWEN_PATTERN;
        let regex = Self::compile_fancy(pattern, emulate_lookahead)?;
        Ok(Self {
            regex: RegexBackend::Fancy(Box::new(regex)),
            pattern: pattern.to_string(),
            emulate_lookahead,
        })
    }

    fn compile_fancy(pattern: &str, emulate_lookahead: bool) -> Result<FancyRegex, TokenizerError> {
        let source = if emulate_lookahead {
            QWEN_LINEAR_PATTERN
        } else {
            pattern
        };
        Ok(FancyRegex::new(source)?)
    }

    /// Switch between the PCRE2 and fancy-regex backends.
    #[cfg(feature = "pcre2")]
    pub fn pcre2(mut self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        self.regex = if use_pcre2 {
            let mut builder = pcre2::bytes::RegexBuilder::new();
            builder.jit_if_available(true);
            builder.utf(true);
            builder.ucp(true);
            RegexBackend::Pcre2(builder.build(&self.pattern)?)
        } else {
            let regex = Self::compile_fancy(&self.pattern, self.emulate_lookahead)?;
            RegexBackend::Fancy(Box::new(regex))
        };
        Ok(self)
    }

    /// Switch to PCRE2 regex backend (stub when feature not enabled).
    #[cfg(not(feature = "pcre2"))]
    pub fn pcre2(self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        if use_pcre2 {
            Err(TokenizerError::Pcre2NotEnabled)
        } else {
            Ok(self)
        }
    }

    /// The pattern as given, before any internal rewriting.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Lazily split `text` into pieces. Each call starts a fresh scan.
    pub fn split<'a>(&'a self, text: &'a str) -> Pieces<'a> {
        let inner = match &self.regex {
            RegexBackend::Fancy(regex) => PiecesInner::Fancy {
                regex: regex.as_ref(),
                emulate_lookahead: self.emulate_lookahead,
                pos: 0,
            },
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => PiecesInner::Pcre2 {
                matches: regex.find_iter(text.as_bytes()),
            },
        };
        Pieces {
            text,
            inner,
            done: false,
        }
    }
}

/// End of a piece matched by the linear Qwen pattern, adjusted for the
/// dropped `\s+(?!\S)` branch.
///
/// A run of non-newline whitespace followed by a non-space character keeps
/// its last character back for the next piece, unless the run is a single
/// character. Whitespace runs holding a newline come from `\s*[\r\n]+` and
/// are left alone.
fn lookahead_end(text: &str, start: usize, end: usize) -> usize {
    let piece = &text[start..end];
    match text[end..].chars().next() {
        Some(next) if !next.is_whitespace() => {}
        _ => return end,
    }
    if !piece.chars().all(char::is_whitespace) {
        return end;
    }
    match piece.chars().next_back() {
        Some(last) if last != '\r' && last != '\n' => {
            let trimmed = end - last.len_utf8();
            if trimmed > start {
                trimmed
            } else {
                end
            }
        }
        _ => end,
    }
}

impl Clone for PreTokenizer {
    fn clone(&self) -> Self {
        let regex = match &self.regex {
            RegexBackend::Fancy(regex) => RegexBackend::Fancy(regex.clone()),
            #[cfg(feature = "pcre2")]
            RegexBackend::Pcre2(regex) => RegexBackend::Pcre2(regex.clone()),
        };
        Self {
            regex,
            pattern: self.pattern.clone(),
            emulate_lookahead: self.emulate_lookahead,
        }
    }
}

impl std::fmt::Debug for PreTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreTokenizer")
            .field("pattern", &self.pattern)
            .finish()
    }
}

enum PiecesInner<'a> {
    Fancy {
        regex: &'a FancyRegex,
        emulate_lookahead: bool,
        pos: usize,
    },
    #[cfg(feature = "pcre2")]
    Pcre2 {
        matches: pcre2::bytes::Matches<'a, 'a>,
    },
}

/// Iterator over the pieces of one text.
///
/// Stops after the first regex runtime error (e.g. backtrack limit exceeded).
pub struct Pieces<'a> {
    text: &'a str,
    inner: PiecesInner<'a>,
    done: bool,
}

impl Pieces<'_> {
    /// Next non-empty `(start, end)` span, or `None` at the end of the text.
    fn next_span(&mut self) -> Result<Option<(usize, usize)>, TokenizerError> {
        let text = self.text;
        match &mut self.inner {
            PiecesInner::Fancy {
                regex,
                emulate_lookahead,
                pos,
            } => loop {
                if *pos >= text.len() {
                    return Ok(None);
                }
                let found = regex
                    .find_from_pos(text, *pos)
                    .map_err(|e| TokenizerError::RegexMatch(e.to_string()))?;
                let Some(m) = found else {
                    return Ok(None);
                };
                if m.start() == m.end() {
                    // Step over one character so an empty match cannot stall.
                    match text[m.end()..].chars().next() {
                        Some(c) => *pos = m.end() + c.len_utf8(),
                        None => return Ok(None),
                    }
                    continue;
                }
                let end = if *emulate_lookahead {
                    lookahead_end(text, m.start(), m.end())
                } else {
                    m.end()
                };
                *pos = end;
                return Ok(Some((m.start(), end)));
            },
            #[cfg(feature = "pcre2")]
            PiecesInner::Pcre2 { matches } => loop {
                match matches.next() {
                    None => return Ok(None),
                    Some(Err(e)) => return Err(TokenizerError::RegexMatch(e.to_string())),
                    Some(Ok(m)) if m.start() == m.end() => continue,
                    Some(Ok(m)) => return Ok(Some((m.start(), m.end()))),
                }
            },
        }
    }
}

impl<'a> Iterator for Pieces<'a> {
    type Item = Result<&'a str, TokenizerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_span() {
            Ok(Some((start, end))) => Some(Ok(&self.text[start..end])),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
