//! Loro-backed shared text for the weft inline editor.
//!
//! This crate provides:
//! - `LoroSharedText`: a `SharedText` over a `LoroText` container, with
//!   UTF-16 offsets, marks as attributes and cursors as relative positions
//! - Snapshot and incremental update exchange between replicas
//! - `CrdtError` for import/export failures

mod buffer;
mod error;

pub use buffer::{LoroOrigins, LoroSharedText, TEXT_CONTAINER};
pub use error::CrdtError;

// Re-export Loro types that consumers need
pub use loro::{ExportMode, LoroDoc, LoroText, UndoManager, VersionVector};
