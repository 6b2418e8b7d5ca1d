//! Extension points invoked at fixed moments of input and rendering.
//!
//! Transform hooks receive a context by value and return it, possibly
//! modified, or `None` to veto the operation. A hook must not trigger
//! another hook synchronously; if it does, the nested invocation is logged
//! and passes its context through untouched.

use std::cell::{Cell, RefCell};

use crate::attributes::AttributeMap;
use crate::delta::DeltaInsert;
use crate::events::InputType;
use crate::types::InlineRange;

/// Context for a `beforeinput` about to be applied.
#[derive(Clone, Debug, PartialEq)]
pub struct BeforeInputContext {
    pub input_type: InputType,
    pub data: Option<String>,
    pub range: InlineRange,
    /// Attributes the inserted text will carry.
    pub attributes: AttributeMap,
}

/// Context for a composition about to be committed.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionEndContext {
    pub data: String,
    pub range: InlineRange,
    pub attributes: AttributeMap,
}

/// Context for pasted plain text.
#[derive(Clone, Debug, PartialEq)]
pub struct PasteContext {
    pub data: String,
    pub range: InlineRange,
}

/// What a render pass produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderSummary {
    pub line_count: usize,
    /// Lines whose DOM was rebuilt.
    pub rebuilt_lines: Vec<usize>,
}

pub type TransformHook<C> = Box<dyn FnMut(C) -> Option<C>>;

/// Hooks an embedder can install. All are optional.
#[derive(Default)]
pub struct InlineHooks {
    pub before_input: Option<TransformHook<BeforeInputContext>>,
    pub composition_end: Option<TransformHook<CompositionEndContext>>,
    pub paste: Option<TransformHook<PasteContext>>,
    pub before_render: Option<Box<dyn FnMut(&[DeltaInsert])>>,
    pub after_render: Option<Box<dyn FnMut(&RenderSummary)>>,
}

impl InlineHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_before_input(
        mut self,
        hook: impl FnMut(BeforeInputContext) -> Option<BeforeInputContext> + 'static,
    ) -> Self {
        self.before_input = Some(Box::new(hook));
        self
    }

    pub fn with_composition_end(
        mut self,
        hook: impl FnMut(CompositionEndContext) -> Option<CompositionEndContext> + 'static,
    ) -> Self {
        self.composition_end = Some(Box::new(hook));
        self
    }

    pub fn with_paste(
        mut self,
        hook: impl FnMut(PasteContext) -> Option<PasteContext> + 'static,
    ) -> Self {
        self.paste = Some(Box::new(hook));
        self
    }

    pub fn with_before_render(mut self, hook: impl FnMut(&[DeltaInsert]) + 'static) -> Self {
        self.before_render = Some(Box::new(hook));
        self
    }

    pub fn with_after_render(mut self, hook: impl FnMut(&RenderSummary) + 'static) -> Self {
        self.after_render = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for InlineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineHooks")
            .field("before_input", &self.before_input.is_some())
            .field("composition_end", &self.composition_end.is_some())
            .field("paste", &self.paste.is_some())
            .field("before_render", &self.before_render.is_some())
            .field("after_render", &self.after_render.is_some())
            .finish()
    }
}

/// Runs installed hooks behind a re-entrancy guard.
#[derive(Default)]
pub struct HookService {
    hooks: RefCell<InlineHooks>,
    active: Cell<bool>,
}

impl HookService {
    pub fn new(hooks: InlineHooks) -> Self {
        Self {
            hooks: RefCell::new(hooks),
            active: Cell::new(false),
        }
    }

    /// Replace every installed hook.
    pub fn set_hooks(&self, hooks: InlineHooks) {
        match self.hooks.try_borrow_mut() {
            Ok(mut current) => *current = hooks,
            Err(_) => tracing::warn!("set_hooks called from inside a hook, ignoring"),
        }
    }

    /// Whether a hook is currently running.
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    fn guarded<R>(&self, name: &'static str, f: impl FnOnce(&mut InlineHooks) -> R) -> Option<R> {
        if self.active.get() {
            tracing::warn!(hook = name, "hook invoked re-entrantly, skipping");
            return None;
        }
        let Ok(mut hooks) = self.hooks.try_borrow_mut() else {
            tracing::warn!(hook = name, "hooks busy, skipping");
            return None;
        };
        self.active.set(true);
        let out = f(&mut hooks);
        self.active.set(false);
        Some(out)
    }

    fn transform<C: Clone>(
        &self,
        name: &'static str,
        ctx: C,
        select: fn(&mut InlineHooks) -> Option<&mut TransformHook<C>>,
    ) -> Option<C> {
        let passthrough = ctx.clone();
        self.guarded(name, move |hooks| match select(hooks) {
            Some(hook) => hook(ctx),
            None => Some(ctx),
        })
        .unwrap_or(Some(passthrough))
    }

    pub fn before_input(&self, ctx: BeforeInputContext) -> Option<BeforeInputContext> {
        self.transform("before_input", ctx, |h| h.before_input.as_mut())
    }

    pub fn composition_end(&self, ctx: CompositionEndContext) -> Option<CompositionEndContext> {
        self.transform("composition_end", ctx, |h| h.composition_end.as_mut())
    }

    pub fn paste(&self, ctx: PasteContext) -> Option<PasteContext> {
        self.transform("paste", ctx, |h| h.paste.as_mut())
    }

    pub fn before_render(&self, deltas: &[DeltaInsert]) {
        self.guarded("before_render", |hooks| {
            if let Some(hook) = hooks.before_render.as_mut() {
                hook(deltas);
            }
        });
    }

    pub fn after_render(&self, summary: &RenderSummary) {
        self.guarded("after_render", |hooks| {
            if let Some(hook) = hooks.after_render.as_mut() {
                hook(summary);
            }
        });
    }
}
