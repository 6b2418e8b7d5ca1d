//! Browser event translation and listener wiring.
//!
//! Native `beforeinput`, composition, `keydown` and `selectionchange`
//! events are translated into [`EditorEvent`]s and fed to a shared
//! [`InlineEditor`]. Listeners are `gloo_events::EventListener`s and are
//! removed when the owning [`EventBindings`] is dropped.

use std::cell::RefCell;
use std::rc::Rc;

use gloo_events::{EventListener, EventListenerOptions};
use wasm_bindgen::JsCast;
use weft_core::{
    EditorError, EditorEvent, EventOutcome, InlineEditor, InputType, KeyEvent, SharedText,
};

use crate::dom::BrowserDom;

/// Editor handle shared between the host and the listeners.
pub type SharedEditor<T> = Rc<RefCell<InlineEditor<T, BrowserDom>>>;

// === InputType browser parsing ===

/// Parse a browser inputType string to an InputType enum.
///
/// This handles the W3C Input Events inputType values as returned by
/// `InputEvent.inputType` in browsers.
pub fn parse_browser_input_type(s: &str) -> InputType {
    match s {
        // Insertion
        "insertText" => InputType::InsertText,
        "insertCompositionText" => InputType::InsertCompositionText,
        "insertLineBreak" => InputType::InsertLineBreak,
        "insertParagraph" => InputType::InsertParagraph,
        "insertFromPaste" | "insertFromPasteAsQuotation" => InputType::InsertFromPaste,
        "insertFromDrop" => InputType::InsertFromDrop,
        "insertReplacementText" => InputType::InsertReplacementText,

        // Deletion
        "deleteContentBackward" => InputType::DeleteContentBackward,
        "deleteContentForward" => InputType::DeleteContentForward,
        "deleteWordBackward" | "deleteEntireWordBackward" => InputType::DeleteWordBackward,
        "deleteWordForward" | "deleteEntireWordForward" => InputType::DeleteWordForward,
        "deleteSoftLineBackward" | "deleteEntireSoftLine" => InputType::DeleteSoftLineBackward,
        "deleteSoftLineForward" => InputType::DeleteSoftLineForward,
        "deleteHardLineBackward" => InputType::DeleteHardLineBackward,
        "deleteHardLineForward" => InputType::DeleteHardLineForward,
        "deleteByCut" => InputType::DeleteByCut,
        "deleteByDrag" => InputType::DeleteByDrag,
        "deleteContent" => InputType::DeleteContent,

        // Unknown
        other => InputType::Unknown(other.to_string()),
    }
}

/// Get data from a beforeinput event, handling different sources.
pub fn get_data_from_event(event: &web_sys::InputEvent) -> Option<String> {
    // First try the data property.
    if let Some(data) = event.data() {
        if !data.is_empty() {
            return Some(data);
        }
    }

    // For paste/drop, try dataTransfer.
    if let Some(data_transfer) = event.data_transfer() {
        if let Ok(text) = data_transfer.get_data("text/plain") {
            if !text.is_empty() {
                return Some(text);
            }
        }
    }

    None
}

pub fn before_input_event(event: &web_sys::InputEvent) -> EditorEvent {
    EditorEvent::BeforeInput {
        input_type: parse_browser_input_type(&event.input_type()),
        data: get_data_from_event(event),
    }
}

pub fn key_event(event: &web_sys::KeyboardEvent) -> KeyEvent {
    KeyEvent {
        key: event.key().into(),
        shift: event.shift_key(),
        ctrl: event.ctrl_key(),
        alt: event.alt_key(),
        meta: event.meta_key(),
        is_composing: event.is_composing(),
    }
}

/// Translate a DOM event by its type. `None` for events the editor ignores.
pub fn editor_event(event: &web_sys::Event) -> Option<EditorEvent> {
    let composition_data = || {
        event
            .dyn_ref::<web_sys::CompositionEvent>()
            .and_then(|e| e.data())
            .unwrap_or_default()
    };
    match event.type_().as_str() {
        "beforeinput" => event.dyn_ref::<web_sys::InputEvent>().map(before_input_event),
        "compositionstart" => Some(EditorEvent::CompositionStart),
        "compositionupdate" => Some(EditorEvent::CompositionUpdate {
            data: composition_data(),
        }),
        "compositionend" => Some(EditorEvent::CompositionEnd {
            data: composition_data(),
        }),
        "keydown" => event
            .dyn_ref::<web_sys::KeyboardEvent>()
            .map(|e| EditorEvent::KeyDown(key_event(e))),
        "selectionchange" => Some(EditorEvent::SelectionChange),
        _ => None,
    }
}

/// Feed one native event to the editor.
///
/// Returns `None` when the editor is busy with a re-entrant call. Errors are
/// logged; a failed event never leaves the default action suppressed.
pub fn dispatch<T: SharedText>(editor: &SharedEditor<T>, event: &web_sys::Event) -> Option<EventOutcome> {
    let editor_event = editor_event(event)?;
    let Ok(mut editor) = editor.try_borrow_mut() else {
        tracing::debug!(event = %event.type_(), "editor busy, dropping event");
        return None;
    };
    match editor.handle_event(editor_event) {
        Ok(outcome) => {
            if outcome.prevent_default {
                event.prevent_default();
            }
            Some(outcome)
        }
        Err(e) => {
            tracing::warn!(event = %event.type_(), "event handling failed: {}", e);
            None
        }
    }
}

const SOURCE_EVENTS: [&str; 5] = [
    "beforeinput",
    "compositionstart",
    "compositionupdate",
    "compositionend",
    "keydown",
];

/// Live listeners for a mounted editor.
///
/// The listeners hold the editor through the shared handle, so dropping the
/// bindings is what releases them. Use [`EventBindings::unmount`] to also
/// tear down the editor's DOM state.
pub struct EventBindings<T: SharedText> {
    editor: SharedEditor<T>,
    listeners: Vec<EventListener>,
}

impl<T: SharedText> EventBindings<T> {
    /// Listen on the editor's event source and the document selection.
    pub fn attach(editor: SharedEditor<T>) -> Result<Self, EditorError> {
        let (source, document) = {
            let borrowed = editor.borrow();
            let source = borrowed.event_source().cloned().ok_or(EditorError::NotMounted)?;
            let document = borrowed
                .dom()
                .map(|dom| dom.document().clone())
                .ok_or(EditorError::NotMounted)?;
            (source, document)
        };

        let mut listeners = Vec::with_capacity(SOURCE_EVENTS.len() + 1);
        for name in SOURCE_EVENTS {
            let editor = editor.clone();
            listeners.push(EventListener::new_with_options(
                &source,
                name,
                EventListenerOptions::enable_prevent_default(),
                move |event| {
                    dispatch(&editor, event);
                },
            ));
        }

        let selection_editor = editor.clone();
        listeners.push(EventListener::new(&document, "selectionchange", move |event| {
            dispatch(&selection_editor, event);
        }));

        tracing::debug!(listeners = listeners.len(), "attached editor listeners");
        Ok(Self { editor, listeners })
    }

    pub fn editor(&self) -> &SharedEditor<T> {
        &self.editor
    }

    /// Render pending buffer changes, e.g. after importing remote updates.
    pub fn flush(&self) -> Result<(), EditorError> {
        self.editor.borrow_mut().flush()
    }

    /// Remove the listeners and unmount the editor.
    pub fn unmount(self) {
        let Self { editor, listeners } = self;
        drop(listeners);
        editor.borrow_mut().unmount();
    }
}

/// Mount `editor` on `root` and start listening.
pub fn mount<T: SharedText>(
    editor: &SharedEditor<T>,
    root: &web_sys::HtmlElement,
    readonly: bool,
) -> Result<EventBindings<T>, EditorError> {
    let root: web_sys::Node = root.clone().into();
    editor
        .borrow_mut()
        .mount(BrowserDom::new(), root, None, readonly)?;
    EventBindings::attach(editor.clone())
}
