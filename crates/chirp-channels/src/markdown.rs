//! Outbound text helpers for platforms with a message length cap.

/// How far back from the cap to look for a newline to break at.
const NEWLINE_LOOKBACK: usize = 256;

/// Split `text` into chunks of at most `max_bytes` bytes, never inside a
/// UTF-8 code point, preferring to break just after a newline near the
/// boundary.
///
/// # Panics
///
/// Panics if `max_bytes` is zero.
#[must_use]
pub fn utf8_chunks(text: &str, max_bytes: usize) -> Vec<&str> {
    assert!(max_bytes > 0, "chunk size must be positive");

    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.len() > max_bytes {
        let mut split = max_bytes;
        while split > 0 && !rest.is_char_boundary(split) {
            split -= 1;
        }
        if split == 0 {
            // A single code point wider than the cap; emit it whole.
            split = rest.chars().next().map_or(rest.len(), char::len_utf8);
        } else {
            let lookback_start = split.saturating_sub(NEWLINE_LOOKBACK);
            if let Some(pos) = rest[lookback_start..split].rfind('\n') {
                split = lookback_start + pos + 1;
            }
        }
        let (head, tail) = rest.split_at(split);
        chunks.push(head);
        rest = tail;
    }

    chunks.push(rest);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(utf8_chunks("hello", 100), vec!["hello"]);
    }

    #[test]
    fn long_text_splits_at_cap() {
        let text = "a".repeat(25);
        let chunks = utf8_chunks(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn split_prefers_newline_near_boundary() {
        let text = "first line\nsecond line that keeps going";
        let chunks = utf8_chunks(text, 16);
        assert_eq!(chunks[0], "first line\n");
    }

    #[test]
    fn multibyte_text_never_splits_code_points() {
        // Slicing off a char boundary would panic inside utf8_chunks.
        let text = "日本語のテキストです".repeat(10);
        for chunk in utf8_chunks(&text, 16) {
            assert!(chunk.len() <= 16);
            assert!(!chunk.is_empty());
        }
    }

    #[test]
    fn empty_text_is_one_empty_chunk() {
        assert_eq!(utf8_chunks("", 10), vec![""]);
    }

    proptest! {
        #[test]
        fn chunks_reassemble_and_respect_cap(text in ".{0,400}", max in 4usize..64) {
            let chunks = utf8_chunks(&text, max);
            for chunk in &chunks {
                prop_assert!(chunk.len() <= max);
            }
            prop_assert_eq!(chunks.concat(), text);
        }
    }
}
