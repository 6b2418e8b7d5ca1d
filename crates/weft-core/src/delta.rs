//! Run-length formatted text and read-only queries over it.
//!
//! A delta is an ordered list of insert runs. Offsets are absolute UTF-16
//! units; embeds are runs the editor's `is_embed` predicate classifies as
//! atoms and always occupy one unit each.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::attributes::AttributeMap;
use crate::shared::SharedText;
use crate::text_helpers::utf16_len;
use crate::types::{InlineRange, LINE_BREAK};

/// One insert run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaInsert {
    pub insert: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<AttributeMap>,
}

impl DeltaInsert {
    pub fn new(insert: impl Into<String>, attributes: Option<AttributeMap>) -> Self {
        Self {
            insert: insert.into(),
            attributes,
        }
    }

    pub fn plain(insert: impl Into<String>) -> Self {
        Self::new(insert, None)
    }

    /// Length in UTF-16 units.
    pub fn len(&self) -> usize {
        utf16_len(&self.insert)
    }

    pub fn is_empty(&self) -> bool {
        self.insert.is_empty()
    }
}

/// A run together with its absolute range in the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeltaEntry {
    pub delta: DeltaInsert,
    pub range: InlineRange,
}

/// Classifies runs as embeds.
pub type IsEmbed = Rc<dyn Fn(&DeltaInsert) -> bool>;

/// Total UTF-16 length of a delta.
pub fn delta_len(deltas: &[DeltaInsert]) -> usize {
    deltas.iter().map(DeltaInsert::len).sum()
}

/// See [`InlineRange::intersect`].
pub fn intersect_inline_range(a: &InlineRange, b: &InlineRange) -> Option<InlineRange> {
    a.intersect(b)
}

/// Split a delta into lines at the line-break sentinel.
///
/// The sentinel itself is dropped. There is always at least one line, and a
/// trailing break yields a trailing empty line. Empty runs are never emitted.
pub fn delta_to_lines(deltas: &[DeltaInsert]) -> Vec<Vec<DeltaInsert>> {
    let mut lines = vec![Vec::new()];
    for delta in deltas {
        for (i, part) in delta.insert.split(LINE_BREAK).enumerate() {
            if i > 0 {
                lines.push(Vec::new());
            }
            if part.is_empty() {
                continue;
            }
            if let Some(line) = lines.last_mut() {
                line.push(DeltaInsert::new(part, delta.attributes.clone()));
            }
        }
    }
    lines
}

/// Read side of the editor's content.
pub struct DeltaService<T: SharedText> {
    text: T,
    is_embed: IsEmbed,
}

impl<T: SharedText> DeltaService<T> {
    pub fn new(text: T, is_embed: IsEmbed) -> Self {
        Self { text, is_embed }
    }

    pub fn is_embed(&self, delta: &DeltaInsert) -> bool {
        (self.is_embed)(delta)
    }

    /// The buffer's delta with empty runs dropped and merged embed runs split
    /// into one run per atom.
    pub fn deltas(&self) -> Vec<DeltaInsert> {
        self.normalize(self.text.to_delta())
    }

    pub fn normalize(&self, raw: Vec<DeltaInsert>) -> Vec<DeltaInsert> {
        let mut out = Vec::with_capacity(raw.len());
        for delta in raw {
            if delta.is_empty() {
                continue;
            }
            if self.is_embed(&delta) && delta.insert.chars().nth(1).is_some() {
                out.extend(
                    delta
                        .insert
                        .chars()
                        .map(|c| DeltaInsert::new(c, delta.attributes.clone())),
                );
            } else {
                out.push(delta);
            }
        }
        out
    }

    /// Every run with its absolute range.
    pub fn entries(&self) -> Vec<DeltaEntry> {
        let mut index = 0;
        self.deltas()
            .into_iter()
            .map(|delta| {
                let len = delta.len();
                let entry = DeltaEntry {
                    delta,
                    range: InlineRange::new(index, len),
                };
                index += len;
                entry
            })
            .collect()
    }

    /// The run covering `index`: the first run whose end is at or past it.
    ///
    /// On a boundary this is the run to the left. Returns `None` for an
    /// index past the end or an empty document.
    pub fn get_delta_by_range_index(&self, index: usize) -> Option<DeltaEntry> {
        self.entries().into_iter().find(|e| e.range.end() >= index)
    }

    /// Runs touching `range`, in document order, with unclipped offsets.
    ///
    /// A run ending exactly at `range.index` is included, as is a run
    /// starting exactly at a collapsed range.
    pub fn get_deltas_by_inline_range(&self, range: InlineRange) -> Vec<DeltaEntry> {
        self.map_deltas_in_inline_range(range, |e| e.clone())
    }

    pub fn map_deltas_in_inline_range<R>(
        &self,
        range: InlineRange,
        mut f: impl FnMut(&DeltaEntry) -> R,
    ) -> Vec<R> {
        self.entries()
            .iter()
            .filter(|e| {
                e.range.end() >= range.index
                    && (e.range.index < range.end()
                        || (range.is_collapsed() && e.range.index == range.index))
            })
            .map(&mut f)
            .collect()
    }

    /// Every embed run in the document.
    pub fn embed_deltas(&self) -> Vec<DeltaEntry> {
        self.entries()
            .into_iter()
            .filter(|e| self.is_embed(&e.delta))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeValue, attributes};
    use crate::memory::MemoryDoc;

    fn embed_flag(delta: &DeltaInsert) -> bool {
        delta
            .attributes
            .as_ref()
            .is_some_and(|a| a.get("embed") == Some(&AttributeValue::Bool(true)))
    }

    fn service(content: &[DeltaInsert]) -> DeltaService<crate::memory::MemoryText> {
        let doc = MemoryDoc::new(1);
        let text = doc.text();
        text.apply_delta(content).unwrap();
        DeltaService::new(text, Rc::new(embed_flag))
    }

    fn bold(s: &str) -> DeltaInsert {
        DeltaInsert::new(s, Some(attributes([("bold", true)])))
    }

    #[test]
    fn test_delta_to_lines() {
        let deltas = vec![DeltaInsert::plain("ab\ncd"), bold("e\n")];
        let lines = delta_to_lines(&deltas);
        assert_eq!(
            lines,
            vec![
                vec![DeltaInsert::plain("ab")],
                vec![DeltaInsert::plain("cd"), bold("e")],
                vec![],
            ]
        );
        assert_eq!(delta_to_lines(&[]), vec![Vec::<DeltaInsert>::new()]);
    }

    #[test]
    fn test_get_delta_by_range_index() {
        let svc = service(&[bold("Hello"), DeltaInsert::plain(" World")]);
        let first = svc.get_delta_by_range_index(0).unwrap();
        assert_eq!(first.range, InlineRange::new(0, 5));
        // Boundary resolves to the left run.
        assert_eq!(svc.get_delta_by_range_index(5).unwrap().range.index, 0);
        assert_eq!(svc.get_delta_by_range_index(6).unwrap().range.index, 5);
        assert_eq!(svc.get_delta_by_range_index(11).unwrap().range.index, 5);
        assert!(svc.get_delta_by_range_index(12).is_none());

        let empty = service(&[]);
        assert!(empty.get_delta_by_range_index(0).is_none());
    }

    #[test]
    fn test_get_deltas_by_inline_range() {
        let svc = service(&[bold("ab"), DeltaInsert::plain("cd"), bold("ef")]);
        let starts = |r| {
            svc.get_deltas_by_inline_range(r)
                .iter()
                .map(|e| e.range.index)
                .collect::<Vec<_>>()
        };
        assert_eq!(starts(InlineRange::new(1, 2)), vec![0, 2]);
        assert_eq!(starts(InlineRange::new(2, 2)), vec![0, 2]);
        assert_eq!(starts(InlineRange::caret(2)), vec![0, 2]);
        assert_eq!(starts(InlineRange::caret(3)), vec![2]);
        assert_eq!(starts(InlineRange::new(0, 6)), vec![0, 2, 4]);
    }

    #[test]
    fn test_map_deltas_does_not_mutate() {
        let svc = service(&[bold("ab"), DeltaInsert::plain("cd")]);
        let upper = svc.map_deltas_in_inline_range(InlineRange::new(0, 4), |e| {
            e.delta.insert.to_uppercase()
        });
        assert_eq!(upper, vec!["AB".to_string(), "CD".to_string()]);
        assert_eq!(svc.deltas()[0].insert, "ab");
    }

    #[test]
    fn test_embeds_are_split_and_listed() {
        let embed = Some(attributes([("embed", true)]));
        let svc = service(&[
            DeltaInsert::plain("a"),
            DeltaInsert::new("\u{200B}\u{200B}", embed.clone()),
            DeltaInsert::plain("b"),
        ]);
        let deltas = svc.deltas();
        assert_eq!(deltas.len(), 4);
        let embeds = svc.embed_deltas();
        assert_eq!(
            embeds.iter().map(|e| e.range).collect::<Vec<_>>(),
            vec![InlineRange::new(1, 1), InlineRange::new(2, 1)]
        );
        assert!(embeds.iter().all(|e| e.delta.attributes == embed));
    }
}
