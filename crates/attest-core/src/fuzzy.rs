//! Approximate string similarity used by citation matching.
//!
//! Scores are on a 0–100 scale. Both inputs are normalized first:
//! lowercased, punctuation replaced by spaces, whitespace collapsed.
//!
//! - [`ratio`]: indel similarity, `200 * LCS(a, b) / (|a| + |b|)`
//! - [`partial_ratio`]: best [`ratio`] of the shorter string against every
//!   same-length window of the longer one

use std::collections::HashMap;

/// Normalize text for comparison.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-string similarity of two texts.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();
    ratio_chars(&a, &b)
}

/// Best similarity of the shorter text against any window of the longer.
///
/// Returns 100 for two empty strings and 0 when exactly one side is empty.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();

    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 100.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let (shorter, longer) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    let width = shorter.len();
    let pattern = PatternMasks::new(shorter);
    let columns: Vec<Option<&[u64]>> = longer.iter().map(|c| pattern.get(*c)).collect();
    let total = (2 * width) as f64;

    let mut best = 0usize;
    for start in 0..=(longer.len() - width) {
        let common = pattern.lcs_len(&columns[start..start + width]);
        if common > best {
            best = common;
            if best == width {
                break;
            }
        }
    }
    (200.0 * best as f64) / total
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let pattern = PatternMasks::new(a);
    let columns: Vec<Option<&[u64]>> = b.iter().map(|c| pattern.get(*c)).collect();
    let common = pattern.lcs_len(&columns);
    (200.0 * common as f64) / total as f64
}

/// Per-character occurrence bitmasks of a pattern, one bit per position.
///
/// LCS against any text is then computed with the bit-parallel recurrence
/// `V' = (V + (V & M)) | (V & !M)`, where the LCS length is the number of
/// zero bits left in `V`. Cost is `|text| * ceil(|pattern| / 64)` word ops.
struct PatternMasks {
    len: usize,
    words: usize,
    masks: HashMap<char, Vec<u64>>,
}

impl PatternMasks {
    fn new(pattern: &[char]) -> Self {
        let words = pattern.len().div_ceil(64);
        let mut masks: HashMap<char, Vec<u64>> = HashMap::new();
        for (i, &c) in pattern.iter().enumerate() {
            masks.entry(c).or_insert_with(|| vec![0; words])[i / 64] |= 1 << (i % 64);
        }
        Self {
            len: pattern.len(),
            words,
            masks,
        }
    }

    fn get(&self, c: char) -> Option<&[u64]> {
        self.masks.get(&c).map(Vec::as_slice)
    }

    /// LCS length against a text given as its resolved column masks.
    fn lcs_len(&self, columns: &[Option<&[u64]>]) -> usize {
        let mut v = vec![u64::MAX; self.words];
        for mask in columns.iter().flatten() {
            let mut carry = 0u64;
            for (word, &m) in v.iter_mut().zip(mask.iter()) {
                let u = *word & m;
                let (sum, c1) = word.overflowing_add(u);
                let (sum, c2) = sum.overflowing_add(carry);
                carry = u64::from(c1 || c2);
                *word = sum | (*word & !m);
            }
        }

        let mut zeros = 0usize;
        for (i, word) in v.iter().enumerate() {
            let bits = (self.len - i * 64).min(64);
            let valid = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
            zeros += (!word & valid).count_ones() as usize;
        }
        zeros
    }
}
