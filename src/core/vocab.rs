//! Vocabulary loading and the immutable token store.
//!
//! The mergeable ranks come from the tiktoken file format:
//!
//! ```text
//! SGVsbG8= 0
//! V29ybGQ= 1
//! IQ== 2
//! ```
//!
//! Each line is a base64-encoded byte sequence, a single space and its rank.
//! Lower ranks are merged first and the rank doubles as the token id.
//!
//! Special tokens are not part of the file. They are assigned ids directly
//! above the mergeable range in a fixed order: `<|endoftext|>`,
//! `<|im_start|>`, `<|im_end|>`, then `<|extra_0|>` through `<|extra_204|>`.

use base64::{engine::general_purpose::STANDARD, Engine};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Opening marker shared by every special token literal.
pub const SPECIAL_START: &str = "<|";
/// Closing marker shared by every special token literal.
pub const SPECIAL_END: &str = "|>";
/// End-of-document marker, the first special token.
pub const ENDOFTEXT: &str = "<|endoftext|>";
/// Opens a ChatML message.
pub const IM_START: &str = "<|im_start|>";
/// Closes a ChatML message.
pub const IM_END: &str = "<|im_end|>";
/// Number of numbered `<|extra_N|>` filler tokens.
pub const EXTRA_TOKEN_COUNT: usize = 205;
/// First special token id of the reference Qwen vocabulary.
pub const QWEN_SPECIAL_START: u32 = 151643;

/// Errors that can occur when loading or assembling a vocabulary.
#[derive(Error, Debug)]
pub enum VocabError {
    #[error("Invalid base64 encoding: {0}")]
    Base64Error(#[from] base64::DecodeError),
    #[error("Invalid line format: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Token with rank {rank} duplicates an earlier token")]
    DuplicateToken { rank: u32 },
    #[error("Rank {0} is assigned to more than one token")]
    DuplicateRank(u32),
    #[error("Rank {rank} is outside the dense range 0..{len}")]
    NonContiguousRanks { rank: u32, len: usize },
    #[error("Byte 0x{0:02x} has no single-byte token")]
    MissingByte(u8),
    #[error("Special tokens starting at {start} overlap mergeable ranks 0..{len}")]
    SpecialOverlap { start: u32, len: usize },
    #[error("Special tokens must start at {expected}, got {start}")]
    SpecialStartMismatch { start: u32, expected: u32 },
}

/// Special token literals in id-assignment order.
pub fn special_token_literals() -> Vec<String> {
    let mut literals = Vec::with_capacity(3 + EXTRA_TOKEN_COUNT);
    literals.push(ENDOFTEXT.to_string());
    literals.push(IM_START.to_string());
    literals.push(IM_END.to_string());
    literals.extend((0..EXTRA_TOKEN_COUNT).map(|i| format!("<|extra_{}|>", i)));
    literals
}

/// Parse tiktoken data into `(token bytes, rank)` pairs, in file order.
///
/// Blank lines are skipped and a trailing `\r` is tolerated. Every other line
/// must be exactly `base64 rank`.
pub fn load_tiktoken_bpe(data: &[u8]) -> Result<Vec<(Vec<u8>, u32)>, VocabError> {
    let mut ranks = Vec::new();

    for (line_no, line) in data.split(|&b| b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&[u8]> = line.split(|&b| b == b' ').collect();
        let [token_b64, rank_str] = fields.as_slice() else {
            return Err(VocabError::ParseError(format!(
                "line {}: expected 2 space-separated fields, found {}",
                line_no + 1,
                fields.len()
            )));
        };

        let token = STANDARD.decode(token_b64)?;

        let rank_str = std::str::from_utf8(rank_str).map_err(|_| {
            VocabError::ParseError(format!("line {}: invalid UTF-8 in rank", line_no + 1))
        })?;
        let rank: u32 = rank_str.parse().map_err(|_| {
            VocabError::ParseError(format!("line {}: invalid rank: {}", line_no + 1, rank_str))
        })?;

        ranks.push((token, rank));
    }

    Ok(ranks)
}

/// Read and parse a tiktoken file.
pub fn load_tiktoken_bpe_file(path: &str) -> Result<Vec<(Vec<u8>, u32)>, VocabError> {
    let data = std::fs::read(path)?;
    load_tiktoken_bpe(&data)
}

/// Immutable token store: mergeable ranks, special tokens and the dense
/// id → bytes table used for decoding.
///
/// Built once and shared (`Arc<Vocabulary>`) between tokenizers; all lookups
/// take `&self`.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    encoder: FxHashMap<Vec<u8>, u32>,
    byte_ranks: [u32; 256],
    special_tokens: Vec<(String, u32)>,
    special_ids: FxHashMap<String, u32>,
    decoder: Vec<Vec<u8>>,
}

impl Vocabulary {
    /// Build a vocabulary from `(bytes, rank)` pairs, numbering special tokens
    /// from `special_start`.
    ///
    /// Ranks must cover `0..n` exactly once, every byte value must have a
    /// single-byte token, and `special_start` must equal `n` so the id space
    /// has no gaps.
    pub fn new<I>(ranks: I, special_start: u32) -> Result<Self, VocabError>
    where
        I: IntoIterator<Item = (Vec<u8>, u32)>,
    {
        let ranks: Vec<(Vec<u8>, u32)> = ranks.into_iter().collect();
        let len = ranks.len();

        let mut encoder: FxHashMap<Vec<u8>, u32> = FxHashMap::default();
        encoder.reserve(len);
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; len];

        for (token, rank) in ranks {
            let slot = slots
                .get_mut(rank as usize)
                .ok_or(VocabError::NonContiguousRanks { rank, len })?;
            if slot.is_some() {
                return Err(VocabError::DuplicateRank(rank));
            }
            if encoder.insert(token.clone(), rank).is_some() {
                return Err(VocabError::DuplicateToken { rank });
            }
            *slot = Some(token);
        }

        let mut byte_ranks = [0u32; 256];
        for b in 0..=u8::MAX {
            byte_ranks[b as usize] = encoder
                .get([b].as_slice())
                .copied()
                .ok_or(VocabError::MissingByte(b))?;
        }

        // Every slot is filled: `len` distinct ranks, all below `len`.
        let mut decoder: Vec<Vec<u8>> = slots.into_iter().flatten().collect();

        let expected = len as u32;
        if special_start < expected {
            return Err(VocabError::SpecialOverlap {
                start: special_start,
                len,
            });
        }
        if special_start != expected {
            return Err(VocabError::SpecialStartMismatch {
                start: special_start,
                expected,
            });
        }

        let special_tokens: Vec<(String, u32)> = special_token_literals()
            .into_iter()
            .zip(special_start..)
            .collect();
        let special_ids = special_tokens.iter().cloned().collect();
        decoder.extend(special_tokens.iter().map(|(s, _)| s.as_bytes().to_vec()));

        log::info!(
            "built vocabulary: {} mergeable tokens, {} special tokens starting at {}",
            encoder.len(),
            special_tokens.len(),
            special_start
        );

        Ok(Self {
            encoder,
            byte_ranks,
            special_tokens,
            special_ids,
            decoder,
        })
    }

    /// Build from tiktoken data, placing special tokens right after the last rank.
    pub fn from_tiktoken(data: &[u8]) -> Result<Self, VocabError> {
        let ranks = load_tiktoken_bpe(data)?;
        let special_start = ranks.len() as u32;
        Self::new(ranks, special_start)
    }

    /// Build from a tiktoken file on disk.
    pub fn from_tiktoken_file(path: &str) -> Result<Self, VocabError> {
        let ranks = load_tiktoken_bpe_file(path)?;
        let special_start = ranks.len() as u32;
        Self::new(ranks, special_start)
    }

    /// Build the reference Qwen vocabulary, whose special ids start at 151643.
    pub fn qwen(data: &[u8]) -> Result<Self, VocabError> {
        Self::new(load_tiktoken_bpe(data)?, QWEN_SPECIAL_START)
    }

    /// Rank of a byte sequence, if it is a mergeable token.
    #[inline]
    pub fn rank_of(&self, bytes: &[u8]) -> Option<u32> {
        self.encoder.get(bytes).copied()
    }

    /// Rank of the single-byte token for `b`; always present.
    #[inline]
    pub fn byte_rank(&self, b: u8) -> u32 {
        self.byte_ranks[b as usize]
    }

    /// Id of a special token literal.
    #[inline]
    pub fn special_id(&self, literal: &str) -> Option<u32> {
        self.special_ids.get(literal).copied()
    }

    /// Bytes for a token id (special tokens decode to their literal).
    #[inline]
    pub fn token_bytes(&self, id: u32) -> Option<&[u8]> {
        self.decoder.get(id as usize).map(Vec::as_slice)
    }

    /// Special tokens with their ids, in assignment order.
    pub fn special_tokens(&self) -> &[(String, u32)] {
        &self.special_tokens
    }

    /// Special token literals, in assignment order.
    pub fn special_token_strings(&self) -> impl Iterator<Item = &str> {
        self.special_tokens.iter().map(|(s, _)| s.as_str())
    }

    /// The mergeable rank map.
    pub fn encoder(&self) -> &FxHashMap<Vec<u8>, u32> {
        &self.encoder
    }

    /// Number of mergeable tokens.
    pub fn mergeable_len(&self) -> usize {
        self.encoder.len()
    }

    /// Total number of ids, mergeable and special.
    pub fn len(&self) -> usize {
        self.decoder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoder.is_empty()
    }
}
