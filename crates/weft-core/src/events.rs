//! Platform-neutral input events and their handling.
//!
//! Hosts translate native events into [`EditorEvent`] and feed them to
//! [`InlineEditor::handle_event`]. The returned [`EventOutcome`] says
//! whether the native default action must be suppressed.

use smol_str::SmolStr;

use crate::attributes::AttributeMap;
use crate::dom::Dom;
use crate::editor::InlineEditor;
use crate::error::EditorError;
use crate::hooks::{BeforeInputContext, CompositionEndContext, PasteContext};
use crate::shared::SharedText;
use crate::text_helpers::{
    find_line_end, find_line_start, find_word_boundary_backward, find_word_boundary_forward,
    next_grapheme_boundary, prev_grapheme_boundary, utf16_len,
};
use crate::types::{CompositionState, InlineRange};

/// Semantic intent of a `beforeinput` event, after the W3C Input Events
/// `inputType` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputType {
    // === Insertion ===
    /// Insert typed text.
    InsertText,
    /// Insert text from IME composition.
    InsertCompositionText,
    /// Insert replacement text (e.g., spell check correction).
    InsertReplacementText,
    /// Insert a line break (Shift+Enter).
    InsertLineBreak,
    /// Insert a paragraph break (Enter). Inline editors treat it as a line break.
    InsertParagraph,
    /// Insert from paste operation.
    InsertFromPaste,
    /// Insert from drop operation.
    InsertFromDrop,

    // === Deletion ===
    /// Delete content backward (Backspace).
    DeleteContentBackward,
    /// Delete content forward (Delete key).
    DeleteContentForward,
    /// Delete word backward (Ctrl/Alt+Backspace).
    DeleteWordBackward,
    /// Delete word forward (Ctrl/Alt+Delete).
    DeleteWordForward,
    /// Delete to soft line boundary backward.
    DeleteSoftLineBackward,
    /// Delete to soft line boundary forward.
    DeleteSoftLineForward,
    /// Delete to hard line boundary backward (Cmd+Backspace on Mac).
    DeleteHardLineBackward,
    /// Delete to hard line boundary forward (Cmd+Delete on Mac).
    DeleteHardLineForward,
    /// Delete by cut operation.
    DeleteByCut,
    /// Delete by drag operation.
    DeleteByDrag,
    /// Generic content deletion.
    DeleteContent,

    // === Unknown ===
    /// Unrecognized input type.
    Unknown(String),
}

impl InputType {
    /// Whether this input type is a deletion operation.
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            Self::DeleteContentBackward
                | Self::DeleteContentForward
                | Self::DeleteWordBackward
                | Self::DeleteWordForward
                | Self::DeleteSoftLineBackward
                | Self::DeleteSoftLineForward
                | Self::DeleteHardLineBackward
                | Self::DeleteHardLineForward
                | Self::DeleteByCut
                | Self::DeleteByDrag
                | Self::DeleteContent
        )
    }

    /// Whether this input type is an insertion operation.
    pub fn is_insertion(&self) -> bool {
        matches!(
            self,
            Self::InsertText
                | Self::InsertCompositionText
                | Self::InsertReplacementText
                | Self::InsertLineBreak
                | Self::InsertParagraph
                | Self::InsertFromPaste
                | Self::InsertFromDrop
        )
    }
}

/// A key press as seen by `keydown` listeners.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEvent {
    pub key: SmolStr,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
    pub is_composing: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<SmolStr>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }
}

/// Native events the editor reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    BeforeInput {
        input_type: InputType,
        data: Option<String>,
    },
    CompositionStart,
    CompositionUpdate {
        data: String,
    },
    CompositionEnd {
        data: String,
    },
    KeyDown(KeyEvent),
    SelectionChange,
}

/// What the host should do with the native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventOutcome {
    pub prevent_default: bool,
}

impl EventOutcome {
    /// The editor applied the event itself.
    pub fn handled() -> Self {
        Self {
            prevent_default: true,
        }
    }

    /// Let the browser run its default action.
    pub fn pass_through() -> Self {
        Self {
            prevent_default: false,
        }
    }
}

/// Normalize pasted line endings to the line-break sentinel.
fn normalize_line_breaks(data: &str) -> String {
    data.replace("\r\n", "\n").replace('\r', "\n")
}

impl<T: SharedText, D: Dom> InlineEditor<T, D> {
    /// Dispatch one native event.
    ///
    /// Events arriving while unmounted are ignored.
    pub fn handle_event(&mut self, event: EditorEvent) -> Result<EventOutcome, EditorError> {
        if !self.mounted() {
            return Ok(EventOutcome::pass_through());
        }
        match event {
            EditorEvent::BeforeInput { input_type, data } => self.on_before_input(input_type, data),
            EditorEvent::CompositionStart => self.on_composition_start(),
            EditorEvent::CompositionUpdate { data } => self.on_composition_update(data),
            EditorEvent::CompositionEnd { data } => self.on_composition_end(data),
            EditorEvent::KeyDown(key) => self.on_keydown(key),
            EditorEvent::SelectionChange => self.on_selection_change(),
        }
    }

    /// Attributes typed text picks up at `range`: those of the run to the
    /// left, unless that run is an embed.
    fn inherited_attributes(&self, range: InlineRange) -> AttributeMap {
        self.get_delta_by_range_index(range.index)
            .filter(|entry| !self.is_embed(&entry.delta))
            .and_then(|entry| entry.delta.attributes)
            .unwrap_or_default()
    }

    fn on_before_input(
        &mut self,
        input_type: InputType,
        data: Option<String>,
    ) -> Result<EventOutcome, EditorError> {
        if self.is_composing() || input_type == InputType::InsertCompositionText {
            return Ok(EventOutcome::pass_through());
        }
        if self.is_readonly() {
            return Ok(EventOutcome::handled());
        }
        // Remote changes the host has not flushed yet still move the range.
        self.flush()?;
        let Some(range) = self.get_inline_range() else {
            return Ok(EventOutcome::pass_through());
        };
        if !self.is_valid_inline_range(range) {
            tracing::warn!(?range, len = self.text().len(), "beforeinput with stale range, ignoring");
            return Ok(EventOutcome::handled());
        }

        let ctx = BeforeInputContext {
            attributes: self.inherited_attributes(range),
            input_type,
            data,
            range,
        };
        let Some(ctx) = self.hooks().before_input(ctx) else {
            tracing::debug!("beforeinput vetoed by hook");
            return Ok(EventOutcome::handled());
        };
        if !self.is_valid_inline_range(ctx.range) {
            tracing::warn!(range = ?ctx.range, "before_input hook returned an invalid range");
            return Ok(EventOutcome::handled());
        }

        let data = ctx.data.clone().unwrap_or_default();
        let caret = match &ctx.input_type {
            InputType::InsertText | InputType::InsertReplacementText | InputType::InsertFromDrop => {
                self.apply_insert(ctx.range, &normalize_line_breaks(&data), &ctx.attributes)?
            }
            InputType::InsertFromPaste => self.apply_paste(ctx.range, data.clone(), &ctx.attributes)?,
            InputType::InsertLineBreak | InputType::InsertParagraph => {
                self.insert_line_break(ctx.range)?;
                Some(ctx.range.index + 1)
            }
            InputType::DeleteContentBackward => self.apply_delete_backward(ctx.range, |s, i| {
                prev_grapheme_boundary(s, i)
            })?,
            InputType::DeleteContentForward => {
                self.apply_delete_forward(ctx.range, next_grapheme_boundary)?
            }
            InputType::DeleteWordBackward => {
                self.apply_delete_backward(ctx.range, find_word_boundary_backward)?
            }
            InputType::DeleteWordForward => {
                self.apply_delete_forward(ctx.range, find_word_boundary_forward)?
            }
            InputType::DeleteSoftLineBackward | InputType::DeleteHardLineBackward => {
                // At a line start this removes the preceding line break.
                self.apply_delete_backward(ctx.range, |s, i| match find_line_start(s, i) {
                    start if start == i => prev_grapheme_boundary(s, i),
                    start => start,
                })?
            }
            InputType::DeleteSoftLineForward | InputType::DeleteHardLineForward => {
                self.apply_delete_forward(ctx.range, |s, i| match find_line_end(s, i) {
                    end if end == i => next_grapheme_boundary(s, i),
                    end => end,
                })?
            }
            InputType::DeleteByCut | InputType::DeleteByDrag | InputType::DeleteContent => {
                self.delete_text(ctx.range)?;
                Some(ctx.range.index)
            }
            InputType::InsertCompositionText => None,
            InputType::Unknown(name) => {
                tracing::debug!(input_type = %name, "unhandled beforeinput type");
                None
            }
        };

        if let Some(caret) = caret {
            self.set_inline_range(Some(InlineRange::caret(caret)))?;
            self.slots().inputting.emit(data);
        }
        Ok(EventOutcome::handled())
    }

    fn apply_insert(
        &mut self,
        range: InlineRange,
        data: &str,
        attributes: &AttributeMap,
    ) -> Result<Option<usize>, EditorError> {
        if data.is_empty() {
            self.delete_text(range)?;
            return Ok(Some(range.index));
        }
        self.insert_text(range, data, Some(attributes))?;
        Ok(Some(range.index + utf16_len(data)))
    }

    fn apply_paste(
        &mut self,
        range: InlineRange,
        data: String,
        attributes: &AttributeMap,
    ) -> Result<Option<usize>, EditorError> {
        let Some(ctx) = self.hooks().paste(PasteContext { data, range }) else {
            tracing::debug!("paste vetoed by hook");
            return Ok(None);
        };
        if !self.is_valid_inline_range(ctx.range) {
            tracing::warn!(range = ?ctx.range, "paste hook returned an invalid range");
            return Ok(None);
        }
        self.apply_insert(ctx.range, &normalize_line_breaks(&ctx.data), attributes)
    }

    /// Delete the selection, or from `boundary(content, caret)` up to the caret.
    fn apply_delete_backward(
        &mut self,
        range: InlineRange,
        boundary: impl Fn(&str, usize) -> usize,
    ) -> Result<Option<usize>, EditorError> {
        if !range.is_collapsed() {
            self.delete_text(range)?;
            return Ok(Some(range.index));
        }
        if range.index == 0 {
            return Ok(None);
        }
        let start = boundary(&self.text().to_string(), range.index);
        self.delete_text(InlineRange::from_points(start, range.index))?;
        Ok(Some(start))
    }

    /// Delete the selection, or from the caret up to `boundary(content, caret)`.
    fn apply_delete_forward(
        &mut self,
        range: InlineRange,
        boundary: impl Fn(&str, usize) -> usize,
    ) -> Result<Option<usize>, EditorError> {
        if !range.is_collapsed() {
            self.delete_text(range)?;
            return Ok(Some(range.index));
        }
        let content = self.text().to_string();
        if range.index >= utf16_len(&content) {
            return Ok(None);
        }
        let end = boundary(&content, range.index);
        self.delete_text(InlineRange::from_points(range.index, end))?;
        Ok(Some(range.index))
    }

    fn on_composition_start(&mut self) -> Result<EventOutcome, EditorError> {
        if self.is_readonly() {
            return Ok(EventOutcome::pass_through());
        }
        // Embeds are not editable and break IME input, so unlock them until
        // the end-of-composition rerender restores them.
        if let Some((dom, root)) = self.dom().zip(self.root_element()) {
            for embed in dom.query_all(root, crate::render::V_EMBED_ATTR) {
                dom.remove_attribute(&embed, "contenteditable")?;
            }
        }
        let range = self.get_inline_range();
        tracing::debug!(?range, "composition started");
        self.set_composition(Some(CompositionState::new(range)));
        Ok(EventOutcome::pass_through())
    }

    fn on_composition_update(&mut self, data: String) -> Result<EventOutcome, EditorError> {
        let Some(composition) = self.composition_mut() else {
            return Ok(EventOutcome::pass_through());
        };
        composition.text.clone_from(&data);
        if composition.range.is_some() {
            self.slots().inputting.emit(data);
        }
        Ok(EventOutcome::pass_through())
    }

    fn on_composition_end(&mut self, data: String) -> Result<EventOutcome, EditorError> {
        let Some(composition) = self.take_composition() else {
            return Ok(EventOutcome::pass_through());
        };
        // The browser wrote into the DOM while composing. The rerender also
        // re-derives the range from its anchors, so edits that arrived during
        // the composition have moved it.
        self.rerender_whole_editor()?;

        if self.is_readonly() {
            return Ok(EventOutcome::pass_through());
        }
        let Some(started) = composition.range else {
            return Ok(EventOutcome::pass_through());
        };
        let range = self.get_inline_range().unwrap_or(started);
        if data.is_empty() {
            tracing::debug!("composition cancelled");
            self.set_inline_range(Some(range))?;
            return Ok(EventOutcome::pass_through());
        }
        if !self.is_valid_inline_range(range) {
            tracing::warn!(?range, "composition range went stale, dropping composed text");
            return Ok(EventOutcome::pass_through());
        }

        let ctx = CompositionEndContext {
            attributes: self.inherited_attributes(range),
            data,
            range,
        };
        let Some(ctx) = self.hooks().composition_end(ctx) else {
            tracing::debug!("composition commit vetoed by hook");
            return Ok(EventOutcome::pass_through());
        };
        if ctx.data.is_empty() || !self.is_valid_inline_range(ctx.range) {
            return Ok(EventOutcome::pass_through());
        }

        self.insert_text(ctx.range, &ctx.data, Some(&ctx.attributes))?;
        self.set_inline_range(Some(InlineRange::caret(
            ctx.range.index + utf16_len(&ctx.data),
        )))?;
        self.slots().inputting.emit(ctx.data);
        Ok(EventOutcome::pass_through())
    }

    fn on_keydown(&mut self, key: KeyEvent) -> Result<EventOutcome, EditorError> {
        if self.get_inline_range().is_some() {
            self.slots().keydown.emit(key);
        }
        Ok(EventOutcome::pass_through())
    }

    fn on_selection_change(&mut self) -> Result<EventOutcome, EditorError> {
        if self.is_composing() {
            return Ok(EventOutcome::pass_through());
        }
        let previous = self.get_inline_range();
        self.flush()?;
        let current = self.sync_inline_range()?;
        if current != previous {
            self.reset_marks();
        }
        Ok(EventOutcome::pass_through())
    }
}
