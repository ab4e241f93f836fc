//! Rank-ordered byte-pair merging for a single pre-tokenized piece.
//!
//! Each round finds the adjacent pair whose concatenation has the lowest rank
//! in the vocabulary and merges every non-overlapping occurrence of that exact
//! byte string in one left-to-right pass. Rounds repeat until no adjacent pair
//! is a known token.

use rustc_hash::FxHashSet;

use super::vocab::Vocabulary;

/// A contiguous span of the piece and the rank of its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Part {
    start: usize,
    end: usize,
    rank: u32,
}

/// Encode one piece into token ids.
///
/// The output never has more ids than `piece` has bytes. Arbitrary bytes are
/// accepted since every byte value has a single-byte token.
pub fn byte_pair_encode(piece: &[u8], vocab: &Vocabulary) -> Vec<u32> {
    let mut parts: Vec<Part> = piece
        .iter()
        .enumerate()
        .map(|(i, &b)| Part {
            start: i,
            end: i + 1,
            rank: vocab.byte_rank(b),
        })
        .collect();

    let mut seen: FxHashSet<&[u8]> = FxHashSet::default();
    while parts.len() >= 2 {
        let Some((merged, rank)) = lowest_rank_pair(piece, &parts, vocab, &mut seen) else {
            break;
        };
        parts = merge_pair(piece, &parts, merged, rank);
    }

    parts.into_iter().map(|p| p.rank).collect()
}

/// Find the adjacent pair with the lowest merged rank.
///
/// Only a strictly lower rank replaces the current best, so the leftmost
/// occurrence wins. Byte strings already looked up in this scan are skipped.
fn lowest_rank_pair<'p>(
    piece: &'p [u8],
    parts: &[Part],
    vocab: &Vocabulary,
    seen: &mut FxHashSet<&'p [u8]>,
) -> Option<(&'p [u8], u32)> {
    seen.clear();
    let mut best: Option<(&'p [u8], u32)> = None;

    for pair in parts.windows(2) {
        let merged = &piece[pair[0].start..pair[1].end];
        if !seen.insert(merged) {
            continue;
        }
        if let Some(rank) = vocab.rank_of(merged) {
            if best.map_or(true, |(_, best_rank)| rank < best_rank) {
                best = Some((merged, rank));
            }
        }
    }

    best
}

/// Replace every non-overlapping adjacent pair spelling `merged`, scanning
/// left to right.
fn merge_pair(piece: &[u8], parts: &[Part], merged: &[u8], rank: u32) -> Vec<Part> {
    let mut out = Vec::with_capacity(parts.len() - 1);
    let mut i = 0;

    while i < parts.len() {
        if i + 1 < parts.len() && &piece[parts[i].start..parts[i + 1].end] == merged {
            out.push(Part {
                start: parts[i].start,
                end: parts[i + 1].end,
                rank,
            });
            i += 2;
        } else {
            out.push(parts[i]);
            i += 1;
        }
    }

    out
}
