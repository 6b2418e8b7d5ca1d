//! Mutations of the shared text, each one a single transaction.
//!
//! Every operation validates its inputs before the first write, so a
//! rejected call leaves the buffer untouched. While read-only, every
//! operation is a successful no-op.

use std::cell::Cell;

use crate::attributes::{AttributeMap, AttributeService, AttributeValue, strip_nulls};
use crate::delta::{DeltaInsert, DeltaService};
use crate::error::EditorError;
use crate::shared::{SharedText, TransactOrigin};
use crate::text_helpers::is_utf16_boundary;
use crate::types::{InlineRange, LINE_BREAK};

/// How `format_text` combines the patch with existing attributes.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum FormatMode {
    /// Add or overwrite the patched keys, keep the rest.
    #[default]
    Merge,
    /// Clear every existing attribute first.
    Replace,
}

/// Options for [`TextService::format_text`].
#[derive(Clone, Default)]
pub struct FormatOptions {
    pub mode: FormatMode,
    /// On a collapsed range, set pending marks instead of doing nothing.
    pub mark_collapsed: bool,
    /// Only runs accepted by this predicate are formatted.
    pub match_delta: Option<std::rc::Rc<dyn Fn(&DeltaInsert, &InlineRange) -> bool>>,
}

impl FormatOptions {
    pub fn replace() -> Self {
        Self {
            mode: FormatMode::Replace,
            ..Self::default()
        }
    }

    pub fn mark_collapsed() -> Self {
        Self {
            mark_collapsed: true,
            ..Self::default()
        }
    }
}

/// Write side of the editor's content.
pub struct TextService<T: SharedText> {
    text: T,
    origin: TransactOrigin,
    readonly: Cell<bool>,
}

impl<T: SharedText> TextService<T> {
    pub fn new(text: T, client_id: u64) -> Self {
        Self {
            text,
            origin: TransactOrigin::Local { client_id },
            readonly: Cell::new(false),
        }
    }

    pub fn text(&self) -> &T {
        &self.text
    }

    pub fn origin(&self) -> TransactOrigin {
        self.origin
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.get()
    }

    pub fn set_readonly(&self, readonly: bool) {
        self.readonly.set(readonly);
    }

    /// Run `f` in one transaction. `isolated` keeps it out of undo history.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&T) -> Result<R, EditorError>,
        isolated: bool,
    ) -> Result<R, EditorError> {
        let origin = if isolated {
            TransactOrigin::Untracked
        } else {
            self.origin
        };
        self.text.transact(origin, f)
    }

    fn check_range(&self, range: InlineRange) -> Result<(), EditorError> {
        let content = self.text.to_string();
        let ok = is_utf16_boundary(&content, range.index) && is_utf16_boundary(&content, range.end());
        if ok {
            Ok(())
        } else {
            Err(EditorError::InvalidRange {
                range,
                len: self.text.len(),
            })
        }
    }

    /// Insert `text` at `range.index`, replacing the range.
    ///
    /// Pending marks are merged over `attributes` and the result is
    /// normalized against the schema.
    pub fn insert_text(
        &self,
        deltas: &DeltaService<T>,
        attribute_service: &AttributeService,
        range: InlineRange,
        text: &str,
        attributes: Option<&AttributeMap>,
    ) -> Result<(), EditorError> {
        if self.is_readonly() {
            return Ok(());
        }
        if text.is_empty() {
            return Err(EditorError::EmptyText);
        }
        if text.contains('\r') {
            return Err(EditorError::ForbiddenCharacter('\r'));
        }
        self.check_range(range)?;

        let mut merged = attributes.cloned().unwrap_or_default();
        if let Some(marks) = attribute_service.marks() {
            merged.extend(marks.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let normalized = attribute_service
            .normalize_attributes(&merged)
            .and_then(|a| strip_nulls(&a));

        check_embed(deltas, &DeltaInsert::new(text, normalized.clone()))?;

        self.transact(
            |t| {
                if range.length > 0 {
                    t.delete(range.index, range.length)?;
                }
                t.insert(range.index, text, normalized.as_ref())
            },
            false,
        )
    }

    /// Remove the range. A collapsed range is a no-op.
    pub fn delete_text(&self, range: InlineRange) -> Result<(), EditorError> {
        if self.is_readonly() || range.is_collapsed() {
            return Ok(());
        }
        self.check_range(range)?;
        self.transact(|t| t.delete(range.index, range.length), false)
    }

    /// Replace the range with the line-break sentinel.
    pub fn insert_line_break(&self, range: InlineRange) -> Result<(), EditorError> {
        if self.is_readonly() {
            return Ok(());
        }
        self.check_range(range)?;
        self.transact(
            |t| {
                if range.length > 0 {
                    t.delete(range.index, range.length)?;
                }
                t.insert(range.index, "\n", None)
            },
            false,
        )
    }

    /// Apply `attributes` to every run intersecting `range`.
    pub fn format_text(
        &self,
        deltas: &DeltaService<T>,
        attribute_service: &mut AttributeService,
        range: InlineRange,
        attributes: &AttributeMap,
        options: &FormatOptions,
    ) -> Result<(), EditorError> {
        if self.is_readonly() {
            return Ok(());
        }
        let Some(patch) = attribute_service.normalize_attributes(attributes) else {
            return Ok(());
        };

        if range.is_collapsed() {
            if options.mark_collapsed {
                let mut marks = attribute_service.marks().cloned().unwrap_or_default();
                marks.extend(patch);
                attribute_service.set_marks(marks);
            }
            return Ok(());
        }
        self.check_range(range)?;

        let targets: Vec<InlineRange> = deltas
            .get_deltas_by_inline_range(range)
            .into_iter()
            .filter(|e| {
                options
                    .match_delta
                    .as_ref()
                    .is_none_or(|m| m(&e.delta, &e.range))
            })
            .filter_map(|e| range.intersect(&e.range))
            .filter(|r| !r.is_collapsed())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let reset = match options.mode {
            FormatMode::Merge => None,
            FormatMode::Replace => Some(self.unset_patch(deltas, range)),
        };
        self.transact(
            |t| {
                for target in &targets {
                    if let Some(reset) = reset.as_ref().filter(|r| !r.is_empty()) {
                        t.format(target.index, target.length, reset)?;
                    }
                    t.format(target.index, target.length, &patch)?;
                }
                Ok(())
            },
            false,
        )
    }

    fn unset_patch(&self, deltas: &DeltaService<T>, range: InlineRange) -> AttributeMap {
        deltas
            .get_deltas_by_inline_range(range)
            .into_iter()
            .filter_map(|e| e.delta.attributes)
            .flat_map(|attrs| attrs.into_keys())
            .map(|key| (key, AttributeValue::Null))
            .collect()
    }

    /// Clear every attribute inside `range`.
    pub fn reset_format(&self, deltas: &DeltaService<T>, range: InlineRange) -> Result<(), EditorError> {
        if self.is_readonly() || range.is_collapsed() {
            return Ok(());
        }
        self.check_range(range)?;
        let unset = self.unset_patch(deltas, range);
        if unset.is_empty() {
            return Ok(());
        }
        self.transact(|t| t.format(range.index, range.length, &unset), false)
    }

    /// Replace the whole buffer with `delta`.
    pub fn set_text(&self, deltas: &DeltaService<T>, delta: &[DeltaInsert]) -> Result<(), EditorError> {
        if self.is_readonly() {
            return Ok(());
        }
        for run in delta {
            if run.insert.contains('\r') {
                return Err(EditorError::ForbiddenCharacter('\r'));
            }
            check_embed(deltas, run)?;
        }
        self.transact(
            |t| {
                t.delete(0, t.len())?;
                let mut index = 0;
                for run in delta.iter().filter(|r| !r.is_empty()) {
                    t.insert(index, &run.insert, run.attributes.as_ref())?;
                    index += run.len();
                }
                Ok(())
            },
            false,
        )
    }

    /// Replace the whole buffer with its own unformatted text.
    pub fn reset_text(&self) -> Result<(), EditorError> {
        if self.is_readonly() {
            return Ok(());
        }
        self.transact(
            |t| {
                let content = t.to_string();
                t.delete(0, t.len())?;
                if !content.is_empty() {
                    t.insert(0, &content, None)?;
                }
                Ok(())
            },
            false,
        )
    }
}

/// Embeds render as atoms of one unit per character.
fn check_embed<T: SharedText>(deltas: &DeltaService<T>, run: &DeltaInsert) -> Result<(), EditorError> {
    if !deltas.is_embed(run) {
        return Ok(());
    }
    if run.insert.contains(LINE_BREAK) {
        return Err(EditorError::EmbedContainsLineBreak);
    }
    match run.insert.chars().find(|c| c.len_utf16() > 1) {
        Some(c) => Err(EditorError::EmbedTooWide(c)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{AttributeSchema, attributes};
    use crate::memory::{MemoryDoc, MemoryText};
    use std::rc::Rc;

    struct Fixture {
        text: MemoryText,
        deltas: DeltaService<MemoryText>,
        attrs: AttributeService,
        service: TextService<MemoryText>,
    }

    fn embed_flag(delta: &DeltaInsert) -> bool {
        delta
            .attributes
            .as_ref()
            .is_some_and(|a| a.contains_key("mention"))
    }

    fn fixture(content: &str) -> Fixture {
        let text = MemoryDoc::new(1)
            .text_with(&[DeltaInsert::plain(content)])
            .unwrap();
        let schema = AttributeSchema::base().with("mention", crate::attributes::AttributeKind::Text);
        Fixture {
            deltas: DeltaService::new(text.clone(), Rc::new(embed_flag)),
            attrs: AttributeService::new(schema),
            service: TextService::new(text.clone(), 1),
            text,
        }
    }

    #[test]
    fn test_scenario_format_then_get_format() {
        let mut f = fixture("Hello World");
        let bold = attributes([("bold", true)]);
        f.service
            .format_text(&f.deltas, &mut f.attrs, InlineRange::new(0, 5), &bold, &FormatOptions::default())
            .unwrap();
        let entries = f.deltas.get_deltas_by_inline_range(InlineRange::new(0, 5));
        assert_eq!(f.attrs.get_format(&entries, InlineRange::new(0, 5), false), bold);
        let entries = f.deltas.get_deltas_by_inline_range(InlineRange::new(0, 11));
        assert!(f.attrs.get_format(&entries, InlineRange::new(0, 11), false).is_empty());
    }

    #[test]
    fn test_insert_replaces_range_in_one_transaction() {
        let f = fixture("Hello World");
        f.service
            .insert_text(&f.deltas, &f.attrs, InlineRange::new(6, 5), "Rust", None)
            .unwrap();
        assert_eq!(f.text.to_string(), "Hello Rust");
        assert_eq!(f.text.transactions().len(), 1);
        assert_eq!(f.text.transactions()[0].ops.len(), 2);
    }

    #[test]
    fn test_insert_errors_leave_buffer_untouched() {
        let f = fixture("a😀");
        let insert = |range, text: &str| {
            f.service
                .insert_text(&f.deltas, &f.attrs, range, text, None)
        };
        assert_eq!(insert(InlineRange::caret(0), ""), Err(EditorError::EmptyText));
        assert!(matches!(
            insert(InlineRange::caret(4), "x"),
            Err(EditorError::InvalidRange { .. })
        ));
        assert!(matches!(
            insert(InlineRange::caret(2), "x"),
            Err(EditorError::InvalidRange { .. })
        ));
        assert_eq!(
            insert(InlineRange::caret(0), "a\rb"),
            Err(EditorError::ForbiddenCharacter('\r'))
        );
        let mention = attributes([("mention", "@bob")]);
        assert_eq!(
            f.service.insert_text(
                &f.deltas,
                &f.attrs,
                InlineRange::caret(0),
                "x\ny",
                Some(&mention)
            ),
            Err(EditorError::EmbedContainsLineBreak)
        );
        assert_eq!(
            f.service.insert_text(
                &f.deltas,
                &f.attrs,
                InlineRange::caret(0),
                "@😀",
                Some(&mention)
            ),
            Err(EditorError::EmbedTooWide('😀'))
        );
        assert_eq!(f.text.to_string(), "a😀");
        assert!(f.text.transactions().is_empty());
    }

    #[test]
    fn test_marks_apply_to_next_insert() {
        let mut f = fixture("");
        f.service
            .format_text(
                &f.deltas,
                &mut f.attrs,
                InlineRange::caret(0),
                &attributes([("italic", true)]),
                &FormatOptions::mark_collapsed(),
            )
            .unwrap();
        assert_eq!(f.attrs.marks(), Some(&attributes([("italic", true)])));
        f.service
            .insert_text(&f.deltas, &f.attrs, InlineRange::caret(0), "Hi", None)
            .unwrap();
        assert_eq!(
            f.text.to_delta(),
            vec![DeltaInsert::new("Hi", Some(attributes([("italic", true)])))]
        );
    }

    #[test]
    fn test_delete_collapsed_is_noop() {
        let f = fixture("abc");
        f.service.delete_text(InlineRange::caret(1)).unwrap();
        assert_eq!(f.text.to_string(), "abc");
        assert!(f.text.transactions().is_empty());
    }

    #[test]
    fn test_line_breaks() {
        let f = fixture("");
        f.service
            .insert_text(&f.deltas, &f.attrs, InlineRange::caret(0), "Hi", None)
            .unwrap();
        f.service.insert_line_break(InlineRange::caret(2)).unwrap();
        f.service
            .insert_text(&f.deltas, &f.attrs, InlineRange::caret(3), "Bye", None)
            .unwrap();
        assert_eq!(f.text.to_string(), "Hi\nBye");
    }

    #[test]
    fn test_replace_mode_and_match() {
        let mut f = fixture("abcd");
        f.service
            .format_text(
                &f.deltas,
                &mut f.attrs,
                InlineRange::new(0, 4),
                &attributes([("bold", true)]),
                &FormatOptions::default(),
            )
            .unwrap();
        f.service
            .format_text(
                &f.deltas,
                &mut f.attrs,
                InlineRange::new(2, 2),
                &attributes([("italic", true)]),
                &FormatOptions::replace(),
            )
            .unwrap();
        assert_eq!(
            f.text.to_delta(),
            vec![
                DeltaInsert::new("ab", Some(attributes([("bold", true)]))),
                DeltaInsert::new("cd", Some(attributes([("italic", true)]))),
            ]
        );

        let only_bold = FormatOptions {
            match_delta: Some(Rc::new(|d: &DeltaInsert, _: &InlineRange| {
                d.attributes.as_ref().is_some_and(|a| a.contains_key("bold"))
            })),
            ..FormatOptions::default()
        };
        f.service
            .format_text(
                &f.deltas,
                &mut f.attrs,
                InlineRange::new(0, 4),
                &attributes([("underline", true)]),
                &only_bold,
            )
            .unwrap();
        assert_eq!(
            f.text.to_delta()[0].attributes,
            Some(attributes([("bold", true), ("underline", true)]))
        );
        assert_eq!(
            f.text.to_delta()[1].attributes,
            Some(attributes([("italic", true)]))
        );
    }

    #[test]
    fn test_set_reset_text_and_format() {
        let f = fixture("old");
        let content = vec![
            DeltaInsert::new("new", Some(attributes([("bold", true)]))),
            DeltaInsert::plain(" text"),
        ];
        f.service.set_text(&f.deltas, &content).unwrap();
        assert_eq!(f.text.to_delta(), content);

        f.service.reset_format(&f.deltas, InlineRange::new(0, 2)).unwrap();
        assert_eq!(f.text.to_delta()[0], DeltaInsert::plain("ne"));

        f.service.reset_text().unwrap();
        assert_eq!(f.text.to_delta(), vec![DeltaInsert::plain("new text")]);

        let bad = vec![DeltaInsert::new("a\nb", Some(attributes([("mention", "x")])))];
        assert_eq!(
            f.service.set_text(&f.deltas, &bad),
            Err(EditorError::EmbedContainsLineBreak)
        );
        let wide = vec![
            DeltaInsert::plain("ok"),
            DeltaInsert::new("😀", Some(attributes([("mention", "x")]))),
        ];
        assert_eq!(
            f.service.set_text(&f.deltas, &wide),
            Err(EditorError::EmbedTooWide('😀'))
        );
        assert_eq!(f.text.to_string(), "new text");
    }

    #[test]
    fn test_readonly_is_noop() {
        let mut f = fixture("abc");
        f.service.set_readonly(true);
        f.service
            .insert_text(&f.deltas, &f.attrs, InlineRange::caret(0), "x", None)
            .unwrap();
        f.service.delete_text(InlineRange::new(0, 1)).unwrap();
        f.service
            .format_text(
                &f.deltas,
                &mut f.attrs,
                InlineRange::new(0, 1),
                &attributes([("bold", true)]),
                &FormatOptions::default(),
            )
            .unwrap();
        f.service.reset_text().unwrap();
        assert_eq!(f.text.to_string(), "abc");
        assert!(f.text.transactions().is_empty());
    }
}
