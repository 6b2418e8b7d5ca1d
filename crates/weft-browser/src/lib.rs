//! Browser host for the weft inline editor.
//!
//! This crate plugs `weft-core` into a live page. It assumes a
//! `wasm32-unknown-unknown` target environment.
//!
//! # Architecture
//!
//! - `dom`: `BrowserDom`, the `Dom` implementation over `web_sys::Node`
//! - `events`: native event translation and `gloo-events` listener wiring
//!
//! # Re-exports
//!
//! This crate re-exports `weft-core` for convenience, so consumers only
//! need to depend on `weft-browser`.

// Re-export core crate
pub use weft_core;
pub use weft_core::*;

pub mod dom;
pub mod events;

pub use dom::BrowserDom;
pub use events::{
    EventBindings, SharedEditor, before_input_event, dispatch, editor_event, key_event, mount,
    parse_browser_input_type,
};
