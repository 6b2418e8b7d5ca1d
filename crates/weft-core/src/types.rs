//! Core editor types: inline ranges, text points and composition state.
//!
//! These types are framework-agnostic. All offsets are UTF-16 code units so
//! they line up with native DOM range offsets; an embed counts as one unit.

use serde::{Deserialize, Serialize};

/// A span of the logical character stream.
///
/// `length == 0` is a collapsed caret. Ranges are ephemeral view state and
/// are never persisted.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InlineRange {
    pub index: usize,
    pub length: usize,
}

impl InlineRange {
    pub fn new(index: usize, length: usize) -> Self {
        Self { index, length }
    }

    /// Create a collapsed range (caret).
    pub fn caret(index: usize) -> Self {
        Self { index, length: 0 }
    }

    /// Build a range from two boundaries given in either order.
    ///
    /// Selections dragged backwards have their focus before the anchor; the
    /// resulting range is the same as for a forward drag.
    pub fn from_points(a: usize, b: usize) -> Self {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        Self {
            index: start,
            length: end - start,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.length == 0
    }

    /// Exclusive end offset.
    pub fn end(&self) -> usize {
        self.index + self.length
    }

    /// Check if an offset is within the range (end exclusive).
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.index && offset < self.end()
    }

    pub fn to_range(&self) -> std::ops::Range<usize> {
        self.index..self.end()
    }

    /// Overlap of two ranges, `None` when they are disjoint.
    ///
    /// Touching ranges intersect in a collapsed range at the shared boundary.
    pub fn intersect(&self, other: &InlineRange) -> Option<InlineRange> {
        let start = self.index.max(other.index);
        let end = self.end().min(other.end());
        if start > end {
            return None;
        }
        Some(InlineRange::new(start, end - start))
    }
}

impl From<std::ops::Range<usize>> for InlineRange {
    fn from(r: std::ops::Range<usize>) -> Self {
        Self::from_points(r.start, r.end)
    }
}

/// A position inside the rendered line tree.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub struct TextPoint {
    /// Index of the rendered line.
    pub line: usize,
    /// UTF-16 offset from the start of that line.
    pub offset: usize,
}

/// Observable state of the range service.
#[derive(Clone, Debug, Copy, PartialEq, Eq)]
pub enum RangeState {
    Unmounted,
    MountedNoRange,
    MountedWithRange(InlineRange),
}

/// IME composition state.
///
/// While composing, the browser owns the DOM of the composed span. The
/// range captured at composition start is re-anchored before the commit.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CompositionState {
    /// Range the composition replaces, captured at composition start.
    pub range: Option<InlineRange>,
    /// Latest uncommitted text reported by `compositionupdate`.
    pub text: String,
}

impl CompositionState {
    pub fn new(range: Option<InlineRange>) -> Self {
        Self {
            range,
            text: String::new(),
        }
    }
}

/// Line-break sentinel used by the buffer and the line splitter.
pub const LINE_BREAK: char = '\n';

/// Rendered in empty lines so the browser has a caret target.
pub const ZERO_WIDTH_SPACE: &str = "\u{200B}";
