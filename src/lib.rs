//! Qwen-compatible BPE tokenizer.
//!
//! - tiktoken vocabulary loading with 208 reserved special tokens
//! - fancy-regex pre-tokenization (PCRE2 with the `pcre2` feature)
//! - rank-ordered BPE that reproduces the reference token stream
//! - Aho-Corasick special token matching under `all` / `none` / `none_raise`
//! - Rayon batch encode/decode and an optional LRU piece cache
//! - a token counter that learns a correction factor for cheap estimates

pub mod core;

pub use crate::core::{
    AllowedSpecial, Deviation, TokenCounter, Tokenizer, TokenizerError, VocabError, Vocabulary,
    ENDOFTEXT, IM_END, IM_START, QWEN_PATTERN, QWEN_SPECIAL_START,
};
