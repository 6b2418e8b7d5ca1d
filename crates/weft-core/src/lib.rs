//! weft-core: inline rich-text editing engine without framework dependencies.
//!
//! This crate provides:
//! - `SharedText` trait abstracting a replicated, transactional text buffer
//! - `MemoryText` - in-process implementation with tombstones and a transaction log
//! - `Dom` trait over the host document, with `HeadlessDom` for tests
//! - Attribute, delta, text, range, render and hook services
//! - `InlineEditor<T, D>` - coordinator binding a shared text to a root element

pub mod attributes;
pub mod delta;
pub mod dom;
pub mod editor;
pub mod error;
pub mod events;
pub mod headless;
pub mod hooks;
pub mod memory;
pub mod range;
pub mod render;
pub mod shared;
pub mod signal;
pub mod text;
pub mod text_helpers;
pub mod types;

pub use attributes::{
    AttributeKind, AttributeMap, AttributeRenderer, AttributeSchema, AttributeService,
    AttributeValue, ElementSpec, attributes, default_attribute_renderer,
};
pub use delta::{DeltaEntry, DeltaInsert, DeltaService, IsEmbed, delta_len, delta_to_lines};
pub use dom::{Dom, DomError, NativePoint, NativeRange, NativeSelection};
pub use editor::{InlineEditor, InlineEditorOptions, Slots};
pub use error::EditorError;
pub use events::{EditorEvent, EventOutcome, InputType, KeyEvent};
pub use headless::{HeadlessDom, NodeId};
pub use hooks::{
    BeforeInputContext, CompositionEndContext, HookService, InlineHooks, PasteContext,
    RenderSummary,
};
pub use memory::{MemoryDoc, MemoryText, TextOp, TransactionRecord};
pub use range::{InlineRangeProvider, RangeService, SignalRangeProvider};
pub use render::{RenderService, VElement, VLine, VLineRenderer, WaitForUpdate};
pub use shared::{Assoc, SharedText, TextEvent, TextObserver, TransactOrigin};
pub use signal::{DisposableGroup, Signal, Slot, Subscription};
pub use smol_str::SmolStr;
pub use text::{FormatMode, FormatOptions, TextService};
pub use types::{CompositionState, InlineRange, RangeState, TextPoint};
