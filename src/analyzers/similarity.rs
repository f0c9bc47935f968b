//! Ratcliff/Obershelp string similarity.
//!
//! `ratio` matches the classic gestalt pattern-matching definition:
//! recursively take the longest common substring, then match the pieces
//! to its left and right; the ratio is `2*M / (len_a + len_b)` where `M`
//! is the total number of matched characters. For very long operands the
//! quadratic block search is replaced by a prefix+suffix approximation
//! (first and last 100 characters compared independently); callers
//! record when that happened so the deviation is auditable.

/// Two values count as "similar" at or above this ratio.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;

/// How many characters each end of the prefix+suffix approximation sees.
pub const AFFIX_LEN: usize = 100;

/// Ratcliff/Obershelp similarity in `[0, 1]`.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matches = matching_chars(&a, &b);
    2.0 * matches as f64 / total as f64
}

/// Prefix+suffix approximation for long values: similar when either the
/// first or the last [`AFFIX_LEN`] characters reach the threshold.
pub fn affix_similar(a: &str, b: &str) -> bool {
    let prefix_a: String = a.chars().take(AFFIX_LEN).collect();
    let prefix_b: String = b.chars().take(AFFIX_LEN).collect();
    if ratio(&prefix_a, &prefix_b) >= SIMILARITY_THRESHOLD {
        return true;
    }
    let suffix_a: String = tail(a, AFFIX_LEN);
    let suffix_b: String = tail(b, AFFIX_LEN);
    ratio(&suffix_a, &suffix_b) >= SIMILARITY_THRESHOLD
}

fn tail(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].iter().collect()
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (ai, bi, len) = longest_common_block(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..ai], &b[..bi])
        + matching_chars(&a[ai + len..], &b[bi + len..])
}

/// Longest common substring of `a` and `b` as `(start_a, start_b, len)`,
/// preferring the earliest block on ties.
fn longest_common_block(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0usize, 0usize, 0usize);
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                cur[j + 1] = prev[j] + 1;
                if cur[j + 1] > best.2 {
                    best = (i + 1 - cur[j + 1], j + 1 - cur[j + 1], cur[j + 1]);
                }
            } else {
                cur[j + 1] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    best
}
