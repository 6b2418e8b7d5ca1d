//! Text navigation and offset helpers.
//!
//! Editor offsets are UTF-16 code units while Rust strings index by byte.
//! Everything here takes and returns UTF-16 offsets; out-of-range inputs are
//! clamped unless the function returns an `Option`.

use unicode_segmentation::GraphemeCursor;

/// Length in UTF-16 code units.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Byte index of a UTF-16 offset.
///
/// Returns `None` when the offset is past the end or lands inside a
/// surrogate pair.
pub fn utf16_to_byte(s: &str, offset: usize) -> Option<usize> {
    let mut units = 0;
    for (byte, ch) in s.char_indices() {
        if units == offset {
            return Some(byte);
        }
        units += ch.len_utf16();
        if units > offset {
            return None;
        }
    }
    (units == offset).then_some(s.len())
}

/// Byte index of the last char boundary at or before a UTF-16 offset.
pub fn floor_byte(s: &str, offset: usize) -> usize {
    let mut units = 0;
    for (byte, ch) in s.char_indices() {
        if units + ch.len_utf16() > offset {
            return byte;
        }
        units += ch.len_utf16();
    }
    s.len()
}

/// UTF-16 offset of a byte index (which must be a char boundary).
pub fn byte_to_utf16(s: &str, byte: usize) -> usize {
    utf16_len(&s[..byte.min(s.len())])
}

/// Whether `offset` is a valid position: inside the text and not between
/// the halves of a surrogate pair.
pub fn is_utf16_boundary(s: &str, offset: usize) -> bool {
    utf16_to_byte(s, offset).is_some()
}

/// Substring addressed by UTF-16 offsets.
pub fn slice_utf16(s: &str, range: std::ops::Range<usize>) -> Option<&str> {
    let start = utf16_to_byte(s, range.start)?;
    let end = utf16_to_byte(s, range.end)?;
    s.get(start..end)
}

/// Start of the grapheme cluster ending at `offset`.
pub fn prev_grapheme_boundary(s: &str, offset: usize) -> usize {
    let byte = floor_byte(s, offset);
    let mut cursor = GraphemeCursor::new(byte, s.len(), true);
    match cursor.prev_boundary(s, 0) {
        Ok(Some(prev)) => byte_to_utf16(s, prev),
        _ => 0,
    }
}

/// End of the grapheme cluster starting at `offset`.
pub fn next_grapheme_boundary(s: &str, offset: usize) -> usize {
    let byte = floor_byte(s, offset);
    let mut cursor = GraphemeCursor::new(byte, s.len(), true);
    match cursor.next_boundary(s, 0) {
        Ok(Some(next)) => byte_to_utf16(s, next),
        _ => utf16_len(s),
    }
}

/// Find start of line containing offset.
pub fn find_line_start(s: &str, offset: usize) -> usize {
    let byte = floor_byte(s, offset);
    match s[..byte].rfind('\n') {
        Some(pos) => byte_to_utf16(s, pos + 1),
        None => 0,
    }
}

/// Find end of line containing offset (position of newline or end of text).
pub fn find_line_end(s: &str, offset: usize) -> usize {
    let byte = floor_byte(s, offset);
    match s[byte..].find('\n') {
        Some(pos) => byte_to_utf16(s, byte + pos),
        None => utf16_len(s),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Find word boundary backward from cursor.
pub fn find_word_boundary_backward(s: &str, cursor: usize) -> usize {
    let byte = floor_byte(s, cursor);
    let mut chars = s[..byte].char_indices().rev().peekable();
    let mut pos = byte;

    // Skip any whitespace/punctuation immediately before cursor.
    while let Some(&(i, c)) = chars.peek() {
        if is_word_char(c) {
            break;
        }
        pos = i;
        chars.next();
    }

    // Skip the word characters.
    while let Some(&(i, c)) = chars.peek() {
        if !is_word_char(c) {
            break;
        }
        pos = i;
        chars.next();
    }

    byte_to_utf16(s, pos)
}

/// Find word boundary forward from cursor.
pub fn find_word_boundary_forward(s: &str, cursor: usize) -> usize {
    let byte = floor_byte(s, cursor);
    let mut chars = s[byte..].char_indices().peekable();
    let mut pos = s.len();

    // Skip word characters first.
    while let Some(&(_, c)) = chars.peek() {
        if !is_word_char(c) {
            break;
        }
        chars.next();
    }

    // Then skip whitespace/punctuation.
    for (i, c) in chars {
        if is_word_char(c) {
            pos = byte + i;
            break;
        }
    }

    byte_to_utf16(s, pos)
}
