//! Error types for CRDT operations.

use thiserror::Error;
use weft_core::EditorError;

/// Errors that can occur during CRDT operations.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CrdtError {
    /// Failed to import CRDT data.
    #[error("failed to import CRDT data: {0}")]
    Import(String),

    /// Failed to export CRDT data.
    #[error("failed to export CRDT data: {0}")]
    Export(String),

    /// A UTF-16 offset does not fall on a character of the text.
    #[error("offset {index} is not a character boundary of text with {len} UTF-16 units")]
    InvalidPosition { index: usize, len: usize },

    /// Loro CRDT error.
    #[error("loro error: {0}")]
    Loro(String),
}

impl From<loro::LoroError> for CrdtError {
    fn from(e: loro::LoroError) -> Self {
        CrdtError::Loro(e.to_string())
    }
}

impl From<CrdtError> for EditorError {
    fn from(e: CrdtError) -> Self {
        EditorError::Backend(e.to_string())
    }
}
