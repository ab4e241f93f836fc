use lru::LruCache;
use rayon::prelude::*;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::bpe::byte_pair_encode;
use super::pretokenize::{PreTokenizer, QWEN_PATTERN};
use super::special::{Piece, SpecialSplitter};
use super::vocab::{VocabError, Vocabulary};

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Regex compilation error: {0}")]
    Regex(#[from] fancy_regex::Error),
    #[error("Regex match error: {0}")]
    RegexMatch(String),
    #[cfg(feature = "pcre2")]
    #[error("Regex compilation error (PCRE2): {0}")]
    Pcre2Error(#[from] pcre2::Error),
    #[error("PCRE2 feature not enabled. Compile with --features pcre2")]
    Pcre2NotEnabled,
    #[error("Vocabulary error: {0}")]
    VocabError(#[from] VocabError),
    #[error("Aho-Corasick build error: {0}")]
    AhoCorasickError(#[from] aho_corasick::BuildError),
    #[error("Decoding error: invalid UTF-8")]
    Utf8Error,
    #[error("Token id {0} is outside the vocabulary")]
    InvalidToken(u32),
    #[error("No special token in text")]
    NoSpecialToken,
    #[error("Unsupported allowed_special value: {0:?}")]
    UnsupportedPolicy(String),
}

/// Which special token literals `encode` recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllowedSpecial {
    /// Every special literal maps to its reserved id.
    #[default]
    All,
    /// Special literals are encoded as ordinary text.
    None,
    /// Like `None`, but the text must contain at least one special literal.
    ///
    /// Encoding text with no special literal fails with
    /// [`TokenizerError::NoSpecialToken`].
    NoneRaise,
}

impl AllowedSpecial {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedSpecial::All => "all",
            AllowedSpecial::None => "none",
            AllowedSpecial::NoneRaise => "none_raise",
        }
    }
}

impl FromStr for AllowedSpecial {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "none" => Ok(Self::None),
            "none_raise" => Ok(Self::NoneRaise),
            _ => Err(TokenizerError::UnsupportedPolicy(s.to_string())),
        }
    }
}

/// BPE tokenizer over a shared [`Vocabulary`].
///
/// # Pipeline
///
/// 1. Special literals are cut out of the text (policy permitting).
/// 2. Remaining text is split by the pre-tokenizer regex.
/// 3. Each piece is merged by rank into token ids.
///
/// Decoding concatenates the bytes of each id.
///
/// # Concurrency
///
/// The vocabulary is immutable and encoding keeps no shared state, so one
/// tokenizer can serve many threads. The optional chunk cache is the one
/// exception: it sits behind a mutex and is disabled by default.
///
/// # Example
///
/// ```ignore
/// let tokenizer = Tokenizer::from_file("qwen.tiktoken")?;
/// let ids = tokenizer.encode("<|im_start|>user\nhi<|im_end|>", AllowedSpecial::All)?;
/// assert_eq!(tokenizer.decode(&ids)?, "<|im_start|>user\nhi<|im_end|>");
/// ```
#[derive(Debug)]
pub struct Tokenizer {
    vocab: Arc<Vocabulary>,
    pretokenizer: PreTokenizer,
    special: SpecialSplitter,
    chunk_cache: Option<Mutex<LruCache<Vec<u8>, Vec<u32>>>>,
    cache_size: usize,
}

impl Tokenizer {
    /// Create a tokenizer with the Qwen split pattern and no chunk cache.
    pub fn new(vocab: Arc<Vocabulary>) -> Result<Self, TokenizerError> {
        Self::with_options(vocab, QWEN_PATTERN, 0)
    }

    /// Create a tokenizer with an LRU cache of `cache_size` encoded pieces.
    pub fn with_cache_size(
        vocab: Arc<Vocabulary>,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        Self::with_options(vocab, QWEN_PATTERN, cache_size)
    }

    /// Create a tokenizer with full configuration options.
    ///
    /// # Arguments
    /// * `vocab` - Shared vocabulary
    /// * `pattern` - Pre-tokenizer regex; must match every character of any input
    /// * `cache_size` - Capacity of the piece cache, `0` to disable it
    pub fn with_options(
        vocab: Arc<Vocabulary>,
        pattern: &str,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        let pretokenizer = PreTokenizer::new(pattern)?;
        let special = SpecialSplitter::new(vocab.special_tokens())?;
        let chunk_cache = NonZeroUsize::new(cache_size).map(|n| Mutex::new(LruCache::new(n)));

        log::debug!(
            "tokenizer ready: vocab_size={}, cache_size={}",
            vocab.len(),
            cache_size
        );

        Ok(Self {
            vocab,
            pretokenizer,
            special,
            chunk_cache,
            cache_size,
        })
    }

    /// Create a Qwen tokenizer from raw tiktoken bytes.
    pub fn from_bytes(vocab_data: &[u8]) -> Result<Self, TokenizerError> {
        let vocab = Vocabulary::qwen(vocab_data)?;
        Self::new(Arc::new(vocab))
    }

    /// Create a Qwen tokenizer from a tiktoken file.
    pub fn from_file(vocab_path: &str) -> Result<Self, TokenizerError> {
        let data = std::fs::read(vocab_path).map_err(VocabError::from)?;
        Self::from_bytes(&data)
    }

    /// Switch the pre-tokenizer to the PCRE2 backend (requires the `pcre2` feature).
    pub fn pcre2(mut self, use_pcre2: bool) -> Result<Self, TokenizerError> {
        self.pretokenizer = self.pretokenizer.pcre2(use_pcre2)?;
        Ok(self)
    }

    /// Encode one pre-tokenized piece, consulting the cache when enabled.
    fn encode_piece(&self, piece: &[u8]) -> Vec<u32> {
        let Some(cache) = &self.chunk_cache else {
            return byte_pair_encode(piece, &self.vocab);
        };

        if let Ok(mut cache) = cache.lock() {
            if let Some(cached) = cache.get(piece) {
                return cached.clone();
            }
        }

        let result = byte_pair_encode(piece, &self.vocab);

        if let Ok(mut cache) = cache.lock() {
            cache.put(piece.to_vec(), result.clone());
        }

        result
    }

    /// Encode text without recognising special tokens.
    pub fn encode_ordinary(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut tokens = Vec::with_capacity(text.len() / 3);
        for piece in self.pretokenizer.split(text) {
            tokens.extend(self.encode_piece(piece?.as_bytes()));
        }
        Ok(tokens)
    }

    /// Encode text under the given special token policy.
    pub fn encode(&self, text: &str, allowed: AllowedSpecial) -> Result<Vec<u32>, TokenizerError> {
        match allowed {
            AllowedSpecial::All => self.encode_with_special(text),
            AllowedSpecial::None => self.encode_ordinary(text),
            AllowedSpecial::NoneRaise => {
                if !self.special.contains_special(text) {
                    return Err(TokenizerError::NoSpecialToken);
                }
                self.encode_ordinary(text)
            }
        }
    }

    /// Encode text, mapping every special literal to its reserved id.
    pub fn encode_with_special(&self, text: &str) -> Result<Vec<u32>, TokenizerError> {
        let mut tokens = Vec::new();
        for piece in self.special.split(text) {
            match piece {
                Piece::Special(_, id) => tokens.push(id),
                Piece::Ordinary(chunk) => tokens.extend(self.encode_ordinary(chunk)?),
            }
        }
        Ok(tokens)
    }

    /// Decode token ids back to bytes.
    pub fn decode_bytes(&self, tokens: &[u32]) -> Result<Vec<u8>, TokenizerError> {
        let mut result = Vec::with_capacity(tokens.len() * 4);
        for &token in tokens {
            let bytes = self
                .vocab
                .token_bytes(token)
                .ok_or(TokenizerError::InvalidToken(token))?;
            result.extend_from_slice(bytes);
        }
        Ok(result)
    }

    /// Decode token ids to a string.
    pub fn decode(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        String::from_utf8(bytes).map_err(|_| TokenizerError::Utf8Error)
    }

    /// Decode token ids to a string, replacing invalid UTF-8 with the
    /// replacement character.
    pub fn decode_lossy(&self, tokens: &[u32]) -> Result<String, TokenizerError> {
        let bytes = self.decode_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Batch encode multiple texts in parallel.
    pub fn encode_batch(
        &self,
        texts: &[String],
        allowed: AllowedSpecial,
    ) -> Result<Vec<Vec<u32>>, TokenizerError> {
        texts
            .par_iter()
            .map(|text| self.encode(text, allowed))
            .collect()
    }

    /// Batch decode multiple token lists in parallel.
    pub fn decode_batch(&self, token_lists: &[Vec<u32>]) -> Result<Vec<String>, TokenizerError> {
        token_lists
            .par_iter()
            .map(|tokens| self.decode(tokens))
            .collect()
    }

    /// Total number of token ids, special tokens included.
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    /// Id of a special literal, if it is one.
    pub fn special_token_id(&self, literal: &str) -> Option<u32> {
        self.vocab.special_id(literal)
    }

    /// Clear the encoding cache.
    pub fn clear_cache(&self) {
        if let Some(Ok(mut cache)) = self.chunk_cache.as_ref().map(|c| c.lock()) {
            cache.clear();
        }
    }

    /// Number of cached pieces (always 0 when caching is disabled).
    pub fn cache_len(&self) -> usize {
        self.chunk_cache
            .as_ref()
            .and_then(|c| c.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }
}

impl Clone for Tokenizer {
    fn clone(&self) -> Self {
        // Caches are not shared between clones.
        let chunk_cache =
            NonZeroUsize::new(self.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Self {
            vocab: Arc::clone(&self.vocab),
            pretokenizer: self.pretokenizer.clone(),
            special: self.special.clone(),
            chunk_cache,
            cache_size: self.cache_size,
        }
    }
}
