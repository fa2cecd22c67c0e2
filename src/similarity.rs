//! Fuzzy string similarity on a 0-100 scale.
//!
//! The token-set ratio compares two strings by their whitespace-delimited
//! token sets: the shared tokens are joined (sorted) and compared against
//! each side's sorted leftover tokens, and the best normalized Indel
//! similarity wins. Token order and repetition never change the score.

use std::collections::BTreeSet;

/// Pairwise similarity used by the clusterer.
pub trait SimilarityScorer {
    /// Symmetric score in `0.0..=100.0`.
    fn score(&self, a: &str, b: &str) -> f64;
}

impl<F> SimilarityScorer for F
where
    F: Fn(&str, &str) -> f64,
{
    fn score(&self, a: &str, b: &str) -> f64 {
        self(a, b)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSetRatio;

impl SimilarityScorer for TokenSetRatio {
    fn score(&self, a: &str, b: &str) -> f64 {
        token_set_ratio(a, b)
    }
}

pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    // one side's tokens are contained in the other's
    if !intersection.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let diff_ab_joined = diff_ab.join(" ");
    let diff_ba_joined = diff_ba.join(" ");
    let ab_len = char_len(&diff_ab_joined);
    let ba_len = char_len(&diff_ba_joined);
    let sect_len = char_len(&intersection.join(" "));

    let separator = usize::from(sect_len != 0);
    let sect_ab_len = sect_len + separator + ab_len;
    let sect_ba_len = sect_len + separator + ba_len;

    let dist = indel_distance(&diff_ab_joined, &diff_ba_joined);
    let result = normalized_similarity(dist, sect_ab_len + sect_ba_len);

    if sect_len == 0 {
        return result;
    }

    // "sect" vs "sect + diff" only differs by the appended tokens
    let sect_ab_ratio = normalized_similarity(separator + ab_len, sect_len + sect_ab_len);
    let sect_ba_ratio = normalized_similarity(separator + ba_len, sect_len + sect_ba_len);

    result.max(sect_ab_ratio).max(sect_ba_ratio)
}

/// Indel similarity of the two whole strings.
pub fn ratio(a: &str, b: &str) -> f64 {
    let total = char_len(a) + char_len(b);
    normalized_similarity(indel_distance(a, b), total)
}

/// Insertions plus deletions needed to turn `a` into `b`.
pub fn indel_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    a.len() + b.len() - 2 * longest_common_subsequence(&a, &b)
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

fn normalized_similarity(distance: usize, total_len: usize) -> f64 {
    if total_len == 0 {
        return 100.0;
    }
    100.0 * total_len.saturating_sub(distance) as f64 / total_len as f64
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
