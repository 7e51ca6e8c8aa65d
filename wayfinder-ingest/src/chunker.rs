//! Overlapping fixed-width chunking.
//!
//! Widths are counted in `char`s so a window never splits a code point.

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into windows of `size` chars that advance by `size - overlap`.
///
/// Whitespace is normalized first. Empty input gives no chunks; input no longer
/// than `size` gives exactly one. When `overlap >= size` the window advances by
/// one char so the loop always terminates. The last window ends at the end of
/// the text, so no chunk is a pure suffix of the one before it.
pub fn chunk(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return Vec::new();
    }

    let size = size.max(1);
    let mut bounds: Vec<usize> = normalized.char_indices().map(|(i, _)| i).collect();
    let n = bounds.len();
    bounds.push(normalized.len());

    if n <= size {
        return vec![normalized];
    }

    let step = if overlap < size { size - overlap } else { 1 };
    let mut chunks = Vec::with_capacity(n / step + 1);
    let mut start = 0;

    loop {
        let end = (start + size).min(n);
        chunks.push(normalized[bounds[start]..bounds[end]].to_string());
        if end == n {
            break;
        }
        start += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_overlapping_windows() {
        assert_eq!(chunk("abcdefghij", 4, 1), vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn test_chunk_short_text_is_single_chunk() {
        assert_eq!(chunk("  hello   world ", 1000, 200), vec!["hello world"]);
    }

    #[test]
    fn test_chunk_empty_and_whitespace_only() {
        assert!(chunk("", 10, 2).is_empty());
        assert!(chunk(" \n\t ", 10, 2).is_empty());
    }

    #[test]
    fn test_chunk_overlap_not_smaller_than_size_still_terminates() {
        let chunks = chunk("abcdef", 3, 3);
        assert_eq!(chunks, vec!["abc", "bcd", "cde", "def"]);
        let chunks = chunk("abcdef", 3, 10);
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_chunk_zero_size_treated_as_one() {
        assert_eq!(chunk("abc", 0, 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_chunk_respects_char_boundaries() {
        let chunks = chunk("ñandú café", 4, 1);
        assert_eq!(chunks, vec!["ñand", "dú c", "café"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4));
    }

    #[test]
    fn test_chunk_no_overlap_partitions_text() {
        let chunks = chunk("abcdefg", 3, 0);
        assert_eq!(chunks, vec!["abc", "def", "g"]);
        assert_eq!(chunks.concat(), "abcdefg");
    }

    #[test]
    fn test_chunk_starts_strictly_increase_and_cover_text() {
        let text: String = (0..500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        for (size, overlap) in [(7, 2), (50, 49), (13, 0), (100, 99)] {
            let chunks = chunk(&text, size, overlap);
            assert!(chunks.iter().all(|c| !c.is_empty() && c.chars().count() <= size));
            let step = size - overlap;
            for (i, c) in chunks.iter().enumerate() {
                assert_eq!(c.as_str(), &text[i * step..(i * step + c.len())]);
            }
            assert!(text.ends_with(chunks.last().unwrap().as_str()));
        }
    }
}
