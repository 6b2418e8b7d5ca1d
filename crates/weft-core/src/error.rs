//! Error types for the inline editor.

use thiserror::Error;

use crate::types::InlineRange;

/// Errors raised by the inline editor and its services.
///
/// Construction and mount failures are fatal to the editing session.
/// `InvalidRange` and friends are routine and callers are expected to
/// re-derive a fresh range instead of tearing anything down.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EditorError {
    /// The shared text is not attached to a replication document.
    #[error("shared text must be attached to a document")]
    NotAttached,

    /// The content contains the carriage return, which breaks range sync.
    #[error("shared text must not contain {0:?} because it breaks range synchronization")]
    ForbiddenCharacter(char),

    /// The root element is already owned by another editor.
    #[error("root element is already mounted by editor {0}")]
    AlreadyMounted(String),

    /// An operation needed a mounted editor.
    #[error("editor is not mounted")]
    NotMounted,

    /// The range is out of bounds or would split a character.
    #[error("invalid range {range:?} for text of length {len}")]
    InvalidRange { range: InlineRange, len: usize },

    /// Inserting an empty string is meaningless.
    #[error("text must not be empty")]
    EmptyText,

    /// Embeds are atoms and may not span a rendered line boundary.
    #[error("embed content must not contain a line break")]
    EmbedContainsLineBreak,

    /// Each embed character must occupy exactly one UTF-16 unit.
    #[error("embed character {0:?} is wider than one utf-16 unit")]
    EmbedTooWide(char),

    /// The DOM host rejected an operation.
    #[error("dom error: {0}")]
    Dom(String),

    /// The shared-text backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<crate::dom::DomError> for EditorError {
    fn from(e: crate::dom::DomError) -> Self {
        EditorError::Dom(e.0)
    }
}
