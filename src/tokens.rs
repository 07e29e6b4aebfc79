//! Canonical token accounting.
//!
//! Every budgeting decision in the crate measures text with [`measure`].
//! The unit is an *approximation* of backend tokens: one unit per
//! [`CHARS_PER_TOKEN`] characters, rounded up. Providers bill with their
//! own tokenizer (`cl100k_base` for the default models), which splits
//! section marks, reporter abbreviations and pin cites more finely than
//! prose. Ceilings in the [`Budget`](crate::config::Budget) are therefore
//! set below the provider limits; the defaults scale them by 3/4.
//!
//! Because a unit is a fixed-width run of characters, unit boundaries are
//! positions in the text. The chunker cuts on those boundaries, which keeps
//! the measured size of each piece exact.

/// Characters per budgeting unit.
pub const CHARS_PER_TOKEN: usize = 4;

/// Measure `text` in budgeting units. Pure and deterministic.
pub fn measure(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Sum of [`measure`] over several independently measured parts.
pub fn measure_parts<'a, I>(parts: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    parts.into_iter().map(measure).sum()
}

/// Byte offsets at which each unit of `text` starts, followed by `text.len()`.
///
/// For a text measuring `n` units the result has `n + 1` entries, so unit
/// `i` spans `offsets[i]..offsets[i + 1]`.
pub(crate) fn unit_offsets(text: &str) -> Vec<usize> {
    let mut offsets: Vec<usize> = text
        .char_indices()
        .step_by(CHARS_PER_TOKEN)
        .map(|(byte, _)| byte)
        .collect();
    offsets.push(text.len());
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measure_rounds_up() {
        assert_eq!(measure(""), 0);
        assert_eq!(measure("a"), 1);
        assert_eq!(measure("abcd"), 1);
        assert_eq!(measure("abcde"), 2);
        assert_eq!(measure(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_measure_counts_chars_not_bytes() {
        // Four two-byte characters are one unit.
        assert_eq!(measure("§§§§"), 1);
        assert_eq!(measure("§§§§§"), 2);
    }

    #[test]
    fn test_measure_parts_is_sum() {
        assert_eq!(measure_parts(["abcde", "", "xyz"]), 3);
    }

    #[test]
    fn test_unit_offsets() {
        assert_eq!(unit_offsets(""), vec![0]);
        assert_eq!(unit_offsets("abcdefghij"), vec![0, 4, 8, 10]);
        let text = "§§§§ab";
        let offsets = unit_offsets(text);
        assert_eq!(offsets.len(), measure(text) + 1);
        assert_eq!(&text[offsets[1]..offsets[2]], "ab");
    }
}
