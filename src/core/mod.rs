//! Core tokenization engine.
//!
//! # Architecture
//!
//! - [`Vocabulary`]: mergeable ranks, special tokens and the dense id table,
//!   loaded from tiktoken format
//! - [`PreTokenizer`]: regex split of text into independently encoded pieces
//! - [`byte_pair_encode`]: rank-ordered merging of one piece
//! - [`SpecialSplitter`]: Aho-Corasick isolation of special literals
//! - [`Tokenizer`]: encode/decode API with special token policies, batch
//!   helpers and an optional LRU cache
//! - [`TokenCounter`]: exact counts plus a running correction for estimates

mod bpe;
mod counter;
mod pretokenize;
mod special;
mod tokenizer;
mod vocab;

pub use bpe::byte_pair_encode;
pub use counter::{Deviation, TokenCounter};
pub use pretokenize::{Pieces, PreTokenizer, QWEN_PATTERN};
pub use special::{Piece, SpecialPieces, SpecialSplitter};
pub use tokenizer::{AllowedSpecial, Tokenizer, TokenizerError};
pub use vocab::{
    load_tiktoken_bpe, load_tiktoken_bpe_file, special_token_literals, VocabError, Vocabulary,
    ENDOFTEXT, EXTRA_TOKEN_COUNT, IM_END, IM_START, QWEN_SPECIAL_START, SPECIAL_END,
    SPECIAL_START,
};
