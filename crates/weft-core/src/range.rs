//! Mapping between logical ranges and native DOM ranges.
//!
//! Native to logical walks up from a boundary node to the rendered text it
//! belongs to and adds the line's start offset. Logical to native finds the
//! line containing the index, then the rendered text node holding it; on a
//! boundary between two text nodes the left one wins so that mapping back
//! reproduces the same index.
//!
//! The current range itself lives in an [`InlineRangeProvider`]. The service
//! also keeps buffer-relative anchors for both ends so the range can be
//! re-derived after the text changes underneath it.

use std::rc::Rc;

use crate::dom::{Dom, NativePoint, NativeRange};
use crate::render::RenderedLine;
use crate::shared::{Assoc, SharedText};
use crate::signal::Signal;
use crate::types::{InlineRange, RangeState, TextPoint};

/// Where the editor's current range lives.
///
/// The default keeps it in a private signal. Embedders that track selection
/// across several editors can supply their own.
pub trait InlineRangeProvider {
    fn inline_range(&self) -> Signal<Option<InlineRange>>;

    fn set_inline_range(&self, range: Option<InlineRange>);
}

/// Provider backed by a plain signal.
#[derive(Clone)]
pub struct SignalRangeProvider {
    signal: Signal<Option<InlineRange>>,
}

impl Default for SignalRangeProvider {
    fn default() -> Self {
        Self {
            signal: Signal::new(None),
        }
    }
}

impl InlineRangeProvider for SignalRangeProvider {
    fn inline_range(&self) -> Signal<Option<InlineRange>> {
        self.signal.clone()
    }

    fn set_inline_range(&self, range: Option<InlineRange>) {
        self.signal.set(range);
    }
}

/// Convert a native boundary point to a line and offset.
///
/// Returns `None` when the point is outside the rendered lines.
pub fn native_point_to_text_point<D: Dom>(
    dom: &D,
    root: &D::Node,
    lines: &[RenderedLine<D::Node>],
    point: &NativePoint<D::Node>,
) -> Option<TextPoint> {
    if dom.is_text(&point.node) {
        for (line, rendered) in lines.iter().enumerate() {
            if let Some(text) = rendered.texts.iter().find(|t| t.node == point.node) {
                let offset = if text.empty {
                    0
                } else {
                    text.start + point.offset.min(text.len)
                };
                tracing::trace!(line, offset, "native_point_to_text_point: direct text hit");
                return Some(TextPoint { line, offset });
            }
        }
    }

    if &point.node == root {
        // Offset counts child lines.
        let last = lines.len().checked_sub(1)?;
        return Some(if point.offset <= last {
            TextPoint {
                line: point.offset,
                offset: 0,
            }
        } else {
            TextPoint {
                line: last,
                offset: lines[last].vline.len(),
            }
        });
    }

    let line = lines
        .iter()
        .position(|l| dom.contains(&l.element, &point.node));
    let Some(line) = line else {
        tracing::trace!(node = ?point.node, "native_point_to_text_point: node outside rendered lines");
        return None;
    };
    let rendered = &lines[line];

    if dom.is_text(&point.node) {
        // A text node the renderer does not know about, e.g. one inserted by
        // the browser. Its position inside the line is unknown.
        let first = rendered.texts.iter().find(|t| {
            dom.parent_node(&t.node)
                .is_some_and(|p| dom.contains(&p, &point.node))
        });
        let offset = first.map_or(0, |t| t.start);
        return Some(TextPoint { line, offset });
    }

    let children = dom.child_nodes(&point.node);
    let boundary = point.offset.min(children.len());
    let before = &children[..boundary];
    let offset = rendered
        .texts
        .iter()
        .rev()
        .find(|t| before.iter().any(|c| dom.contains(c, &t.node)))
        .map(|t| t.end())
        .or_else(|| {
            rendered
                .texts
                .iter()
                .find(|t| dom.contains(&point.node, &t.node))
                .map(|t| t.start)
        })
        .unwrap_or(0);
    tracing::trace!(line, offset, "native_point_to_text_point: element boundary");
    Some(TextPoint { line, offset })
}

/// Absolute index of a text point.
pub fn text_point_to_index<N>(lines: &[RenderedLine<N>], point: TextPoint) -> Option<usize> {
    let line = lines.get(point.line)?;
    Some(line.vline.start + point.offset.min(line.vline.len()))
}

/// Line and offset of an absolute index. The first line whose span
/// (including its end) holds the index wins.
pub fn index_to_text_point<N>(lines: &[RenderedLine<N>], index: usize) -> Option<TextPoint> {
    lines.iter().enumerate().find_map(|(line, l)| {
        (l.vline.start <= index && index <= l.vline.end()).then(|| TextPoint {
            line,
            offset: index - l.vline.start,
        })
    })
}

/// Concrete DOM point for a text point.
pub fn text_point_to_dom_point<N: Clone>(
    lines: &[RenderedLine<N>],
    point: TextPoint,
) -> Option<NativePoint<N>> {
    let line = lines.get(point.line)?;
    let text = line
        .texts
        .iter()
        .find(|t| t.start <= point.offset && point.offset <= t.end())?;
    Some(NativePoint::new(
        text.node.clone(),
        if text.empty { 0 } else { point.offset - text.start },
    ))
}

/// Map a native range to a logical one.
///
/// A boundary that cannot be mapped is clamped to the start (for `start`)
/// or the end (for `end`) of the text. Returns `None` when neither can.
pub fn to_inline_range<D: Dom>(
    dom: &D,
    root: &D::Node,
    lines: &[RenderedLine<D::Node>],
    range: &NativeRange<D::Node>,
) -> Option<InlineRange> {
    let map = |point: &NativePoint<D::Node>| {
        native_point_to_text_point(dom, root, lines, point)
            .and_then(|tp| text_point_to_index(lines, tp))
    };
    let total = lines.last().map_or(0, |l| l.vline.end());
    match (map(&range.start), map(&range.end)) {
        (None, None) => None,
        (start, end) => Some(InlineRange::from_points(
            start.unwrap_or(0),
            end.unwrap_or(total),
        )),
    }
}

/// Map a logical range to a native one.
pub fn to_dom_range<N: Clone>(
    lines: &[RenderedLine<N>],
    range: InlineRange,
) -> Option<NativeRange<N>> {
    let start = index_to_text_point(lines, range.index)
        .and_then(|tp| text_point_to_dom_point(lines, tp))?;
    let end = index_to_text_point(lines, range.end())
        .and_then(|tp| text_point_to_dom_point(lines, tp))?;
    Some(NativeRange { start, end })
}

/// Current range plus its buffer-relative anchors.
pub struct RangeService<T: SharedText> {
    provider: Rc<dyn InlineRangeProvider>,
    provider_override: bool,
    mounted: bool,
    last_start_relative_position: Option<T::RelativePosition>,
    last_end_relative_position: Option<T::RelativePosition>,
}

impl<T: SharedText> RangeService<T> {
    pub fn new(provider: Option<Rc<dyn InlineRangeProvider>>) -> Self {
        let provider_override = provider.is_some();
        Self {
            provider: provider.unwrap_or_else(|| Rc::new(SignalRangeProvider::default())),
            provider_override,
            mounted: false,
            last_start_relative_position: None,
            last_end_relative_position: None,
        }
    }

    pub fn inline_range_provider_override(&self) -> bool {
        self.provider_override
    }

    pub fn inline_range(&self) -> Signal<Option<InlineRange>> {
        self.provider.inline_range()
    }

    pub fn get_inline_range(&self) -> Option<InlineRange> {
        self.provider.inline_range().peek()
    }

    pub fn state(&self) -> RangeState {
        match (self.mounted, self.get_inline_range()) {
            (false, _) => RangeState::Unmounted,
            (true, None) => RangeState::MountedNoRange,
            (true, Some(range)) => RangeState::MountedWithRange(range),
        }
    }

    pub fn set_mounted(&mut self, mounted: bool) {
        self.mounted = mounted;
        if !mounted {
            self.publish(None, None);
        }
    }

    pub fn is_valid_inline_range(&self, range: &InlineRange, len: usize) -> bool {
        range.index <= len && range.end() <= len
    }

    /// Store `range` and anchor both ends to `text`.
    pub fn publish(&mut self, range: Option<InlineRange>, text: Option<&T>) {
        match (range, text) {
            (Some(r), Some(text)) => {
                self.last_start_relative_position = text.relative_position(r.index, Assoc::After);
                self.last_end_relative_position = text.relative_position(r.end(), Assoc::After);
            }
            _ => {
                self.last_start_relative_position = None;
                self.last_end_relative_position = None;
            }
        }
        self.provider.set_inline_range(range);
    }

    pub fn last_start_relative_position(&self) -> Option<&T::RelativePosition> {
        self.last_start_relative_position.as_ref()
    }

    pub fn last_end_relative_position(&self) -> Option<&T::RelativePosition> {
        self.last_end_relative_position.as_ref()
    }

    /// The range implied by the stored anchors after `text` changed.
    pub fn rederive(&self, text: &T) -> Option<InlineRange> {
        let start = text.resolve_relative_position(self.last_start_relative_position.as_ref()?)?;
        let end = text.resolve_relative_position(self.last_end_relative_position.as_ref()?)?;
        Some(InlineRange::from_points(start, end))
    }
}
