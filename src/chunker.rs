//! Splitting text into bounded, optionally overlapping chunks.
//!
//! [`split`] cuts on budgeting-unit boundaries (see [`crate::tokens`]), so
//! every chunk measures at most `max_size`. Consecutive chunks share
//! `overlap` units; [`reassemble`] drops the shared prefix again and
//! reproduces the input exactly.
//!
//! [`pack`] goes the other way, merging many short texts into as few
//! bounded batches as possible, and [`trim_to_fit`] shortens a text
//! locally, without any backend call.

use crate::error::Result;
use crate::tokens::{measure, unit_offsets};
use crate::PipelineError;
use serde::{Deserialize, Serialize};

/// Separator placed between items merged by [`pack`].
pub const PACK_SEPARATOR: &str = "\n\n";

/// A bounded segment of a larger text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the chunk sequence (0-based).
    pub index: usize,
    /// The segment text, including any overlap carried from the previous chunk.
    pub text: String,
    /// Units at the start of `text` repeated from the previous chunk.
    pub overlap_units: usize,
    /// Byte length of that repeated prefix.
    overlap_bytes: usize,
}

impl Chunk {
    fn whole(text: &str) -> Self {
        Self {
            index: 0,
            text: text.to_string(),
            overlap_units: 0,
            overlap_bytes: 0,
        }
    }

    /// Whether overlap material from the previous chunk precedes the new text.
    pub fn overlaps_previous(&self) -> bool {
        self.overlap_units > 0
    }

    /// The chunk text with the repeated prefix removed.
    pub fn without_overlap(&self) -> &str {
        &self.text[self.overlap_bytes..]
    }

    /// Measured size of the chunk.
    pub fn size(&self) -> usize {
        measure(&self.text)
    }
}

fn check_bounds(max_size: usize, overlap: usize) -> Result<()> {
    if max_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_size {
        return Err(PipelineError::InvalidConfig(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, max_size
        )));
    }
    Ok(())
}

/// Split `text` into chunks measuring at most `max_size` units each.
///
/// - An empty text yields no chunks.
/// - A text that already fits is returned unchanged as a single chunk.
/// - Otherwise chunk `i + 1` starts `max_size - overlap` units after chunk `i`.
///
/// Fails with [`PipelineError::InvalidConfig`] when `max_size` is zero or
/// `overlap >= max_size`.
pub fn split(text: &str, max_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    check_bounds(max_size, overlap)?;
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if measure(text) <= max_size {
        return Ok(vec![Chunk::whole(text)]);
    }

    let offsets = unit_offsets(text);
    let units = offsets.len() - 1;
    let step = max_size - overlap;

    let mut chunks = Vec::with_capacity(units.div_ceil(step));
    let mut start: usize = 0;
    let mut prev_end: usize = 0;
    loop {
        let end = (start + max_size).min(units);
        let overlap_units = prev_end.saturating_sub(start);
        chunks.push(Chunk {
            index: chunks.len(),
            text: text[offsets[start]..offsets[end]].to_string(),
            overlap_units,
            overlap_bytes: offsets[start + overlap_units] - offsets[start],
        });
        if end == units {
            break;
        }
        prev_end = end;
        start += step;
    }

    tracing::debug!(
        units,
        max_size,
        overlap,
        chunks = chunks.len(),
        "split text into chunks"
    );
    Ok(chunks)
}

/// Rebuild the original text from [`split`] output.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::without_overlap).collect()
}

/// Merge short texts into batches that each measure at most `max_size`.
///
/// Items are joined with [`PACK_SEPARATOR`] in order. An item that on its
/// own reaches `max_size` is split with [`split`] and its pieces are
/// emitted in its place, each as its own batch. Empty items are skipped.
pub fn pack<S: AsRef<str>>(items: &[S], max_size: usize, overlap: usize) -> Result<Vec<String>> {
    check_bounds(max_size, overlap)?;

    let mut batches = Vec::new();
    let mut current = String::new();

    for item in items {
        let item = item.as_ref();
        if item.is_empty() {
            continue;
        }

        if measure(item) >= max_size {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            for chunk in split(item, max_size, overlap)? {
                batches.push(chunk.text);
            }
            continue;
        }

        if current.is_empty() {
            current.push_str(item);
            continue;
        }

        let merged_size = measure(&current) + measure(PACK_SEPARATOR) + measure(item);
        if merged_size > max_size {
            batches.push(std::mem::replace(&mut current, item.to_string()));
        } else {
            current.push_str(PACK_SEPARATOR);
            current.push_str(item);
        }
    }

    if !current.is_empty() {
        batches.push(current);
    }
    Ok(batches)
}

/// Shorten `text` locally until it measures at most `max_size`.
///
/// Cuts back to the last blank line first, then to the last sentence end,
/// and as a last resort hard-cuts on a unit boundary. Each step strictly
/// shortens the text, so the loop always terminates.
pub fn trim_to_fit(text: &str, max_size: usize) -> String {
    let mut current = text;
    while measure(current) > max_size {
        if let Some(cut) = current.rfind("\n\n") {
            tracing::trace!(cut, "trim: cut back to last blank line");
            current = &current[..cut];
            continue;
        }
        let body = current.strip_suffix('.').unwrap_or(current);
        if let Some(period) = body.rfind('.') {
            tracing::trace!(period, "trim: cut back to last sentence");
            current = &current[..period + 1];
            continue;
        }
        let offsets = unit_offsets(current);
        current = &current[..offsets[max_size.min(offsets.len() - 1)]];
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of_units(units: usize) -> String {
        // Distinct characters so misplaced cuts show up in comparisons.
        (0..units * 4)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    #[test]
    fn test_split_empty_returns_nothing() {
        assert!(split("", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn test_split_short_text_is_identity() {
        let text = "A short opinion.";
        let chunks = split(text, 40, 5).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert!(!chunks[0].overlaps_previous());
    }

    #[test]
    fn test_split_exact_fit_is_identity() {
        let text = text_of_units(40);
        let chunks = split(&text, 40, 5).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
    }

    #[test]
    fn test_split_130_units_into_four_chunks() {
        let text = text_of_units(130);
        let chunks = split(&text, 40, 5).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.size() <= 40));
        assert_eq!(chunks[0].overlap_units, 0);
        assert_eq!(chunks[1].overlap_units, 5);
        assert_eq!(chunks[3].size(), 25);
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_split_without_overlap() {
        let text = text_of_units(100);
        let chunks = split(&text, 30, 0).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| !c.overlaps_previous()));
        assert_eq!(chunks.iter().map(|c| c.text.as_str()).collect::<String>(), text);
    }

    #[test]
    fn test_split_multibyte_reassembles() {
        let text = "§ 1. Le café était fermé — überall. ".repeat(20);
        let chunks = split(&text, 16, 3).unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.size() <= 16);
        }
        assert_eq!(reassemble(&chunks), text);
    }

    #[test]
    fn test_split_is_deterministic() {
        let text = text_of_units(77);
        assert_eq!(split(&text, 20, 4).unwrap(), split(&text, 20, 4).unwrap());
    }

    #[test]
    fn test_split_rejects_bad_bounds() {
        assert!(matches!(split("abc", 0, 0), Err(PipelineError::InvalidConfig(_))));
        assert!(matches!(split("abc", 10, 10), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_pack_merges_short_items() {
        let items = vec!["aaaa".to_string(), "bbbb".to_string(), "cccc".to_string()];
        // Each item is 1 unit, separator is 1 unit: two items fit in 3 units.
        let batches = pack(&items, 3, 0).unwrap();
        assert_eq!(batches, vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]);
        assert!(batches.iter().all(|b| measure(b) <= 3));
    }

    #[test]
    fn test_pack_splits_oversized_item_in_place() {
        let big = text_of_units(10);
        let items = vec!["head".to_string(), big.clone(), "tail".to_string()];
        let batches = pack(&items, 4, 0).unwrap();
        assert_eq!(batches.first().map(String::as_str), Some("head"));
        assert_eq!(batches.last().map(String::as_str), Some("tail"));
        assert_eq!(batches[1..batches.len() - 1].concat(), big);
        assert!(batches.iter().all(|b| measure(b) <= 4));
    }

    #[test]
    fn test_pack_skips_empty_items() {
        let batches = pack(&["", "abc", ""], 10, 0).unwrap();
        assert_eq!(batches, vec!["abc".to_string()]);
    }

    #[test]
    fn test_trim_prefers_blank_line() {
        let text = "First paragraph.\n\nSecond paragraph that is long enough to matter.";
        let trimmed = trim_to_fit(text, 5);
        assert_eq!(trimmed, "First paragraph.");
    }

    #[test]
    fn test_trim_falls_back_to_sentence() {
        let text = "One. Two two two. Three three three three three.";
        let trimmed = trim_to_fit(text, 5);
        assert_eq!(trimmed, "One. Two two two.");
        assert!(measure(&trimmed) <= 5);
    }

    #[test]
    fn test_trim_hard_cut() {
        let text = text_of_units(10);
        let trimmed = trim_to_fit(&text, 3);
        assert_eq!(measure(&trimmed), 3);
        assert!(text.starts_with(&trimmed));
    }

    #[test]
    fn test_trim_leaves_fitting_text_alone() {
        assert_eq!(trim_to_fit("short", 10), "short");
    }
}
