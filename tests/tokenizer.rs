//! Integration tests against a small synthetic tiktoken vocabulary.
//!
//! Ranks 0..=255 are the single bytes (rank == byte value); merges follow from
//! 256 in the order of `MERGES`, and special tokens start right after them.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use qwen_tokenizer::{
    AllowedSpecial, TokenCounter, Tokenizer, TokenizerError, VocabError, Vocabulary, ENDOFTEXT,
    IM_END, IM_START,
};

const MERGES: &[&[u8]] = &[
    b"ab",         // 256
    b"He",         // 257
    b"ll",         // 258
    b"Hell",       // 259
    b"Hello",      // 260
    b" W",         // 261
    b"or",         // 262
    b" Wor",       // 263
    b"ld",         // 264
    b" World",     // 265
    &[0xe4, 0xbd], // 266
    "你".as_bytes(), // 267
];

const EOT: u32 = 268;
const IM_START_ID: u32 = 269;
const IM_END_ID: u32 = 270;

fn fixture_tiktoken() -> String {
    let bytes = (0..=u8::MAX).map(|b| vec![b]);
    let merges = MERGES.iter().map(|m| m.to_vec());
    bytes
        .chain(merges)
        .enumerate()
        .map(|(rank, token)| format!("{} {}\n", STANDARD.encode(token), rank))
        .collect()
}

fn create_fixture_tokenizer() -> Tokenizer {
    let vocab = Vocabulary::from_tiktoken(fixture_tiktoken().as_bytes()).unwrap();
    Tokenizer::new(Arc::new(vocab)).unwrap()
}

/// Test that the fixture lays out ids as expected.
#[test]
fn test_fixture_layout() {
    let tokenizer = create_fixture_tokenizer();
    assert_eq!(tokenizer.vocab_size(), 268 + 208);
    assert_eq!(tokenizer.special_token_id(ENDOFTEXT), Some(EOT));
    assert_eq!(tokenizer.special_token_id(IM_START), Some(IM_START_ID));
    assert_eq!(tokenizer.special_token_id(IM_END), Some(IM_END_ID));
    assert_eq!(tokenizer.special_token_id("<|extra_204|>"), Some(475));
}

/// Test empty input handling.
#[test]
fn test_empty_input() {
    let tokenizer = create_fixture_tokenizer();

    assert!(tokenizer.encode_ordinary("").unwrap().is_empty());
    for policy in [AllowedSpecial::All, AllowedSpecial::None] {
        assert!(tokenizer.encode("", policy).unwrap().is_empty());
    }
    assert_eq!(tokenizer.decode(&[]).unwrap(), "");
}

/// Test that a lone end-of-text literal maps to its reserved id and back.
#[test]
fn test_endoftext_alone() {
    let tokenizer = create_fixture_tokenizer();

    let tokens = tokenizer.encode(ENDOFTEXT, AllowedSpecial::All).unwrap();
    assert_eq!(tokens, vec![EOT]);
    assert_eq!(tokenizer.decode(&tokens).unwrap(), ENDOFTEXT);

    // Without special handling the literal is plain bytes.
    let tokens = tokenizer.encode(ENDOFTEXT, AllowedSpecial::None).unwrap();
    assert!(tokens.len() > 1);
    assert!(!tokens.contains(&EOT));
}

/// Test that `none_raise` fails when no special literal is present.
#[test]
fn test_none_raise_without_special() {
    let tokenizer = create_fixture_tokenizer();

    let err = tokenizer
        .encode("Hello World", AllowedSpecial::NoneRaise)
        .unwrap_err();
    assert!(matches!(err, TokenizerError::NoSpecialToken));

    // With one present, the text is encoded as ordinary text.
    let text = "Hello<|im_end|>";
    assert_eq!(
        tokenizer.encode(text, AllowedSpecial::NoneRaise).unwrap(),
        tokenizer.encode(text, AllowedSpecial::None).unwrap()
    );
}

/// Test that a known byte pair merges and an unknown one does not.
#[test]
fn test_pair_merge() {
    let tokenizer = create_fixture_tokenizer();

    assert_eq!(tokenizer.encode_ordinary("ab").unwrap(), vec![256]);
    assert_eq!(tokenizer.encode_ordinary("ba").unwrap(), vec![98, 97]);
}

/// Test that unknown policy strings are rejected.
#[test]
fn test_unsupported_policy() {
    for bad in ["", "All", "none-raise", "everything"] {
        match bad.parse::<AllowedSpecial>() {
            Err(TokenizerError::UnsupportedPolicy(value)) => assert_eq!(value, bad),
            other => panic!("expected UnsupportedPolicy for {:?}, got {:?}", bad, other),
        }
    }
}

/// Test multi-round merges across pieces.
#[test]
fn test_known_encodings() {
    let tokenizer = create_fixture_tokenizer();

    assert_eq!(tokenizer.encode_ordinary("Hello World").unwrap(), vec![260, 265]);
    // "你" merges through its first two bytes; "好" stays as raw bytes.
    assert_eq!(
        tokenizer.encode_ordinary("你好").unwrap(),
        vec![267, 0xe5, 0xa5, 0xbd]
    );
}

/// Test ChatML-style text with special tokens.
#[test]
fn test_chatml_format() {
    let tokenizer = create_fixture_tokenizer();

    let chat = "<|im_start|>user\nHello World<|im_end|>\n";
    let tokens = tokenizer.encode(chat, AllowedSpecial::All).unwrap();
    assert_eq!(
        tokens,
        vec![IM_START_ID, 117, 115, 101, 114, 10, 260, 265, IM_END_ID, 10]
    );
    assert_eq!(tokenizer.decode(&tokens).unwrap(), chat);
}

/// Test encoding and decoding roundtrip without special tokens.
#[test]
fn test_encode_decode_roundtrip() {
    let tokenizer = create_fixture_tokenizer();

    let test_cases = vec![
        "Hello, world!",
        "The quick brown fox jumps over the lazy dog.",
        "1234567890",
        "Special characters: !@#$%^&*()",
        "Multi-line\ntext\r\nwith\n\n\nnewlines   ",
        "Unicode: 你好，世界 🦀 naïve café",
        "it's they'll we'd I'M",
        "\t  \n ",
        "如果现在要你走十万八千里路，需要多长的时间才能到达？ ",
    ];

    for text in test_cases {
        let tokens = tokenizer.encode(text, AllowedSpecial::None).unwrap();
        assert!(tokens.len() <= text.len());
        let decoded = tokenizer.decode(&tokens).unwrap();
        assert_eq!(decoded, text, "Roundtrip failed for: {:?}", text);
    }
}

/// Test that multi-megabyte runs of whitespace or punctuation encode and
/// round-trip.
#[test]
fn test_long_runs_encode_and_roundtrip() {
    let tokenizer = create_fixture_tokenizer();
    const RUN: usize = 2_000_000;

    // The last space joins the word: RUN - 1 space tokens, then " World".
    let spaces = " ".repeat(RUN) + "World";
    let tokens = tokenizer.encode_ordinary(&spaces).unwrap();
    assert_eq!(tokens.len(), RUN);
    assert_eq!(tokens.last(), Some(&265));
    assert_eq!(tokenizer.decode(&tokens).unwrap(), spaces);

    let bangs = "!".repeat(RUN);
    let tokens = tokenizer.encode(&bangs, AllowedSpecial::All).unwrap();
    assert_eq!(tokens.len(), RUN);
    assert_eq!(tokenizer.decode(&tokens).unwrap(), bangs);

    let mixed = "a".to_string() + &"\t ".repeat(RUN / 2);
    let tokens = tokenizer.encode(&mixed, AllowedSpecial::None).unwrap();
    assert_eq!(tokens.len(), RUN + 1);
    assert_eq!(tokenizer.decode(&tokens).unwrap(), mixed);
}

/// Test roundtrip of text mixing ordinary spans and special literals.
#[test]
fn test_special_roundtrip() {
    let tokenizer = create_fixture_tokenizer();

    let test_cases = vec![
        "<|endoftext|>",
        "<|endoftext|><|endoftext|>",
        "before<|extra_0|>middle<|extra_204|>after",
        "<|im_start|>system\nYou are helpful.<|im_end|>\n<|im_start|>assistant\n",
        "<|not_special|> and <|extra_205|>",
    ];

    for text in test_cases {
        let tokens = tokenizer.encode(text, AllowedSpecial::All).unwrap();
        let decoded = tokenizer.decode(&tokens).unwrap();
        assert_eq!(decoded, text, "Roundtrip failed for: {:?}", text);
    }
}

/// Test that encoding is deterministic, including across threads.
#[test]
fn test_deterministic_encoding() {
    let tokenizer = Arc::new(create_fixture_tokenizer());
    let text = "Hello World, 你好 <|im_start|>again<|im_end|>";
    let expected = tokenizer.encode(text, AllowedSpecial::All).unwrap();
    assert_eq!(tokenizer.encode(text, AllowedSpecial::All).unwrap(), expected);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tokenizer = Arc::clone(&tokenizer);
            std::thread::spawn(move || tokenizer.encode(text, AllowedSpecial::All).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

/// Test batch encoding matches individual encoding.
#[test]
fn test_batch_encode() {
    let tokenizer = create_fixture_tokenizer();

    let texts = vec![
        "Hello, world!".to_string(),
        "<|endoftext|>".to_string(),
        "I'm doing great!".to_string(),
    ];

    let batch_tokens = tokenizer.encode_batch(&texts, AllowedSpecial::All).unwrap();
    assert_eq!(batch_tokens.len(), 3);

    for (i, text) in texts.iter().enumerate() {
        let individual = tokenizer.encode(text, AllowedSpecial::All).unwrap();
        assert_eq!(
            batch_tokens[i], individual,
            "Batch encoding should match individual encoding for text {}: {:?}",
            i, text
        );
    }

    assert_eq!(tokenizer.decode_batch(&batch_tokens).unwrap(), texts);
}

/// Test that ids past the vocabulary are rejected.
#[test]
fn test_decode_out_of_range() {
    let tokenizer = create_fixture_tokenizer();
    let err = tokenizer.decode(&[260, 476]).unwrap_err();
    assert!(matches!(err, TokenizerError::InvalidToken(476)));
    assert!(tokenizer.decode(&[u32::MAX]).is_err());
}

/// Test that malformed vocabulary data fails to load.
#[test]
fn test_malformed_vocabulary() {
    assert!(matches!(
        Vocabulary::from_tiktoken(b"YWI= 1 2\n"),
        Err(VocabError::ParseError(_))
    ));
    assert!(matches!(
        Vocabulary::from_tiktoken(b"YWI= one\n"),
        Err(VocabError::ParseError(_))
    ));
    // Well-formed but missing most single bytes.
    assert!(matches!(
        Vocabulary::from_tiktoken(b"YQ== 0\n"),
        Err(VocabError::MissingByte(_))
    ));
}

/// Test loading from a file, and that the Qwen constructor insists on its id layout.
#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!(
        "qwen-tokenizer-fixture-{}.tiktoken",
        std::process::id()
    ));
    std::fs::write(&path, fixture_tiktoken()).unwrap();
    let path_str = path.to_str().unwrap();

    let vocab = Vocabulary::from_tiktoken_file(path_str).unwrap();
    assert_eq!(vocab.mergeable_len(), 268);

    let err = Tokenizer::from_file(path_str).unwrap_err();
    assert!(matches!(
        err,
        TokenizerError::VocabError(VocabError::SpecialStartMismatch { expected: 268, .. })
    ));

    std::fs::remove_file(&path).unwrap();

    assert!(matches!(
        Tokenizer::from_file(path_str),
        Err(TokenizerError::VocabError(VocabError::IoError(_)))
    ));
}

/// Test that the counter reports full-encoding counts and learns a correction.
#[test]
fn test_token_counter() {
    let tokenizer = Arc::new(create_fixture_tokenizer());
    let counter = TokenCounter::with_initial_mean("fixture", Arc::clone(&tokenizer), 1.0);

    let text = "Hello World<|endoftext|>";
    let actual = counter.count(text).unwrap();
    assert_eq!(actual, 3);

    let estimated = text.chars().count();
    counter.update(actual, estimated);
    assert_eq!(counter.observations(), 2);
    assert!(counter.correct(estimated) <= estimated);
}
