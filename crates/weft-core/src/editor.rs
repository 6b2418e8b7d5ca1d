//! The inline editor coordinator.
//!
//! `InlineEditor` owns one instance of every service and forwards a stable
//! public surface to them. It binds a [`SharedText`] to a root element of a
//! [`Dom`] host: buffer changes raise a dirty flag and are rendered on
//! [`flush`](InlineEditor::flush), native selection changes are mapped back
//! into the logical range, and input events are applied as transactions.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smol_str::{SmolStr, format_smolstr};

use crate::attributes::{
    AttributeMap, AttributeRenderer, AttributeSchema, AttributeService,
};
use crate::delta::{DeltaEntry, DeltaInsert, DeltaService, IsEmbed};
use crate::dom::{Dom, NativePoint, NativeRange, NativeSelection};
use crate::error::EditorError;
use crate::hooks::{HookService, InlineHooks};
use crate::range::{
    InlineRangeProvider, RangeService, index_to_text_point, native_point_to_text_point,
    text_point_to_dom_point, text_point_to_index, to_dom_range, to_inline_range,
};
use crate::render::{
    RenderService, RenderedLine, V_ELEMENT_ATTR, VLineRenderer, WaitForUpdate, build_vlines,
};
use crate::shared::{SharedText, TextEvent};
use crate::signal::{DisposableGroup, Signal, Slot};
use crate::text::{FormatOptions, TextService};
use crate::text_helpers::slice_utf16;
use crate::types::{CompositionState, InlineRange, LINE_BREAK, RangeState, TextPoint};

/// Marks a root element as owned by an editor.
pub const V_ROOT_ATTR: &str = "data-v-root";
/// Id of the editor owning a root element.
pub const V_EDITOR_ID_ATTR: &str = "data-v-editor-id";

static NEXT_EDITOR_ID: AtomicU64 = AtomicU64::new(0);

/// Construction options. Everything has a default.
pub struct InlineEditorOptions {
    /// Classifies runs that render as non-text atoms.
    pub is_embed: IsEmbed,
    pub hooks: InlineHooks,
    /// Replaces the private range signal.
    pub range_provider: Option<Rc<dyn InlineRangeProvider>>,
    pub vline_renderer: Option<VLineRenderer>,
    pub attribute_schema: AttributeSchema,
    pub attribute_renderer: Option<AttributeRenderer>,
    /// Origin used for local transactions. Defaults to the text's client.
    pub client_id: Option<u64>,
}

impl Default for InlineEditorOptions {
    fn default() -> Self {
        Self {
            is_embed: Rc::new(|_: &DeltaInsert| false),
            hooks: InlineHooks::default(),
            range_provider: None,
            vline_renderer: None,
            attribute_schema: AttributeSchema::default(),
            attribute_renderer: None,
            client_id: None,
        }
    }
}

impl InlineEditorOptions {
    pub fn with_is_embed(mut self, is_embed: impl Fn(&DeltaInsert) -> bool + 'static) -> Self {
        self.is_embed = Rc::new(is_embed);
        self
    }

    pub fn with_hooks(mut self, hooks: InlineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_range_provider(mut self, provider: Rc<dyn InlineRangeProvider>) -> Self {
        self.range_provider = Some(provider);
        self
    }

    pub fn with_vline_renderer(mut self, renderer: VLineRenderer) -> Self {
        self.vline_renderer = Some(renderer);
        self
    }

    pub fn with_attribute_schema(mut self, schema: AttributeSchema) -> Self {
        self.attribute_schema = schema;
        self
    }

    pub fn with_attribute_renderer(mut self, renderer: AttributeRenderer) -> Self {
        self.attribute_renderer = Some(renderer);
        self
    }

    pub fn with_client_id(mut self, client_id: u64) -> Self {
        self.client_id = Some(client_id);
        self
    }
}

impl std::fmt::Debug for InlineEditorOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineEditorOptions")
            .field("hooks", &self.hooks)
            .field("range_provider", &self.range_provider.is_some())
            .field("vline_renderer", &self.vline_renderer.is_some())
            .field("attribute_schema", &self.attribute_schema)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Notifications emitted by the editor.
#[derive(Default)]
pub struct Slots {
    pub mounted: Slot<()>,
    pub unmounted: Slot<()>,
    pub render_complete: Slot<()>,
    /// The buffer changed and the change has been rendered.
    pub text_change: Slot<()>,
    /// The logical range was written to the native selection.
    pub inline_range_sync: Slot<Option<InlineRange>>,
    pub inputting: Slot<String>,
    pub keydown: Slot<crate::events::KeyEvent>,
}

struct Mount<D: Dom> {
    dom: D,
    root: D::Node,
    event_source: D::Node,
}

/// An inline rich-text editor bound to one shared text.
pub struct InlineEditor<T: SharedText, D: Dom> {
    id: SmolStr,
    text: T,
    attributes: AttributeService,
    deltas: DeltaService<T>,
    text_service: TextService<T>,
    range: RangeService<T>,
    render: RenderService<D>,
    hooks: Rc<HookService>,
    slots: Slots,
    disposables: DisposableGroup,
    mount: Option<Mount<D>>,
    composition: Option<CompositionState>,
}

impl<T: SharedText, D: Dom> InlineEditor<T, D> {
    /// Create an editor for `text`.
    ///
    /// Fails when the text is not attached to a document or contains a
    /// carriage return.
    pub fn new(text: T, options: InlineEditorOptions) -> Result<Self, EditorError> {
        if !text.is_attached() {
            return Err(EditorError::NotAttached);
        }
        if text.to_string().contains('\r') {
            return Err(EditorError::ForbiddenCharacter('\r'));
        }
        let client_id = options
            .client_id
            .or_else(|| text.client_id())
            .ok_or(EditorError::NotAttached)?;

        let mut attributes = AttributeService::new(options.attribute_schema);
        if let Some(renderer) = options.attribute_renderer {
            attributes.set_attribute_renderer(renderer);
        }
        let id = format_smolstr!("weft-inline-{}", NEXT_EDITOR_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(editor = %id, client_id, len = text.len(), "created inline editor");

        Ok(Self {
            id,
            deltas: DeltaService::new(text.clone(), options.is_embed),
            text_service: TextService::new(text.clone(), client_id),
            text,
            attributes,
            range: RangeService::new(options.range_provider),
            render: RenderService::new(options.vline_renderer),
            hooks: Rc::new(HookService::new(options.hooks)),
            slots: Slots::default(),
            disposables: DisposableGroup::new(),
            mount: None,
            composition: None,
        })
    }

    // === Accessors ===

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &T {
        &self.text
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    pub fn hooks(&self) -> &HookService {
        &self.hooks
    }

    /// Replace every installed hook.
    pub fn set_hooks(&self, hooks: InlineHooks) {
        self.hooks.set_hooks(hooks);
    }

    pub fn render_service(&self) -> &RenderService<D> {
        &self.render
    }

    pub fn dom(&self) -> Option<&D> {
        self.mount.as_ref().map(|m| &m.dom)
    }

    pub fn root_element(&self) -> Option<&D::Node> {
        self.mount.as_ref().map(|m| &m.root)
    }

    pub fn event_source(&self) -> Option<&D::Node> {
        self.mount.as_ref().map(|m| &m.event_source)
    }

    pub fn mounted(&self) -> bool {
        self.mount.is_some()
    }

    pub fn range_state(&self) -> RangeState {
        self.range.state()
    }

    pub fn is_embed(&self, delta: &DeltaInsert) -> bool {
        self.deltas.is_embed(delta)
    }

    /// Keep `disposable` alive until the editor unmounts.
    pub fn add_disposable<X: 'static>(&mut self, disposable: X) {
        self.disposables.add(disposable);
    }

    // === Composition ===

    pub fn is_composing(&self) -> bool {
        self.composition.is_some()
    }

    pub fn composition(&self) -> Option<&CompositionState> {
        self.composition.as_ref()
    }

    pub(crate) fn composition_mut(&mut self) -> Option<&mut CompositionState> {
        self.composition.as_mut()
    }

    pub(crate) fn set_composition(&mut self, composition: Option<CompositionState>) {
        self.composition = composition;
    }

    pub(crate) fn take_composition(&mut self) -> Option<CompositionState> {
        self.composition.take()
    }

    // === Lifecycle ===

    /// Take ownership of `root` and render into it.
    ///
    /// Events are expected from `event_source`, which defaults to the root.
    pub fn mount(
        &mut self,
        dom: D,
        root: D::Node,
        event_source: Option<D::Node>,
        readonly: bool,
    ) -> Result<(), EditorError> {
        if self.mount.is_some() {
            return Err(EditorError::AlreadyMounted(self.id.to_string()));
        }
        if dom.has_attribute(&root, V_ROOT_ATTR) {
            let owner = dom.get_attribute(&root, V_EDITOR_ID_ATTR).unwrap_or_default();
            tracing::warn!(editor = %self.id, %owner, "root element already mounted");
            return Err(EditorError::AlreadyMounted(owner));
        }

        dom.set_attribute(&root, V_ROOT_ATTR, "true")?;
        dom.set_attribute(&root, V_EDITOR_ID_ATTR, &self.id)?;
        dom.set_attribute(&root, "contenteditable", if readonly { "false" } else { "true" })?;
        dom.replace_children(&root, &[])?;
        self.text_service.set_readonly(readonly);

        let dirty = self.render.dirty_flag();
        let subscription = self.text.observe(Arc::new(move |event: &TextEvent| {
            tracing::trace!(origin = ?event.origin, "shared text changed");
            dirty.store(true, Ordering::Release);
        }));
        self.disposables.add(subscription);

        let event_source = event_source.unwrap_or_else(|| root.clone());
        self.mount = Some(Mount {
            dom,
            root,
            event_source,
        });
        self.range.set_mounted(true);
        tracing::debug!(editor = %self.id, readonly, "mounted");

        self.rerender_whole_editor()?;
        self.slots.mounted.emit(());
        Ok(())
    }

    /// Release the root element and every subscription. A no-op when not
    /// mounted.
    pub fn unmount(&mut self) {
        let Some(mount) = self.mount.take() else {
            return;
        };
        let cleanup = mount
            .dom
            .replace_children(&mount.root, &[])
            .and_then(|_| mount.dom.remove_attribute(&mount.root, V_ROOT_ATTR))
            .and_then(|_| mount.dom.remove_attribute(&mount.root, V_EDITOR_ID_ATTR))
            .and_then(|_| mount.dom.remove_attribute(&mount.root, "contenteditable"));
        if let Err(e) = cleanup {
            tracing::warn!(editor = %self.id, error = %e, "failed to clean up root element");
        }

        self.disposables.dispose();
        self.render.clear();
        self.render.take_dirty();
        self.composition = None;
        self.range.set_mounted(false);
        self.attributes.reset_marks();
        tracing::debug!(editor = %self.id, "unmounted");
        self.slots.unmounted.emit(());
    }

    pub fn is_readonly(&self) -> bool {
        self.text_service.is_readonly()
    }

    pub fn set_readonly(&mut self, readonly: bool) -> Result<(), EditorError> {
        self.text_service.set_readonly(readonly);
        if let Some(mount) = &self.mount {
            mount.dom.set_attribute(
                &mount.root,
                "contenteditable",
                if readonly { "false" } else { "true" },
            )?;
        }
        Ok(())
    }

    /// Run `f` as one transaction, then render.
    ///
    /// An `isolated` transaction is not captured by undo history.
    pub fn transact<R>(
        &mut self,
        f: impl FnOnce(&T) -> Result<R, EditorError>,
        isolated: bool,
    ) -> Result<R, EditorError> {
        let out = self.text_service.transact(f, isolated)?;
        self.flush()?;
        Ok(out)
    }

    /// Render pending buffer changes, local or remote.
    pub fn flush(&mut self) -> Result<(), EditorError> {
        if self.mount.is_none() || self.is_composing() || !self.render.take_dirty() {
            return Ok(());
        }
        self.render_pass()?;
        self.slots.text_change.emit(());
        Ok(())
    }

    // === Rendering ===

    /// Reconcile the DOM with the buffer. Skipped while composing.
    pub fn render(&mut self) -> Result<(), EditorError> {
        if self.is_composing() {
            tracing::debug!(editor = %self.id, "render deferred until composition ends");
            return Ok(());
        }
        self.render.take_dirty();
        self.render_pass()
    }

    /// Drop the rendered tree and rebuild every line.
    pub fn rerender_whole_editor(&mut self) -> Result<(), EditorError> {
        self.render.clear();
        self.render()
    }

    /// Resolves after the next completed render pass.
    pub fn wait_for_update(&self) -> WaitForUpdate {
        self.render.wait_for_update()
    }

    pub fn rendering(&self) -> bool {
        self.render.rendering()
    }

    /// The rendered DOM read back as a delta.
    pub fn rendered_delta(&self) -> Vec<DeltaInsert> {
        match &self.mount {
            Some(mount) => self.render.rendered_delta(&mount.dom, &mount.root),
            None => Vec::new(),
        }
    }

    pub fn set_vline_renderer(&mut self, renderer: Option<VLineRenderer>) -> Result<(), EditorError> {
        self.render.set_vline_renderer(renderer);
        if self.mounted() {
            self.rerender_whole_editor()?;
        }
        Ok(())
    }

    fn render_pass(&mut self) -> Result<(), EditorError> {
        let Some(mount) = self.mount.as_ref() else {
            return Ok(());
        };
        if self.text.to_string().contains('\r') {
            tracing::error!(editor = %self.id, "shared text contains a carriage return");
            return Err(EditorError::ForbiddenCharacter('\r'));
        }

        let deltas = self.deltas.deltas();
        self.hooks.before_render(&deltas);
        let is_embed = |delta: &DeltaInsert| self.deltas.is_embed(delta);
        let vlines = build_vlines(&deltas, &self.attributes, &is_embed);
        let summary = self.render.reconcile(&mount.dom, &mount.root, vlines)?;
        tracing::trace!(
            editor = %self.id,
            lines = summary.line_count,
            rebuilt = summary.rebuilt_lines.len(),
            "render complete"
        );
        self.hooks.after_render(&summary);

        if let Some(current) = self.range.get_inline_range() {
            let len = self.text.len();
            let next = self.range.rederive(&self.text).unwrap_or(current);
            let next = if self.range.is_valid_inline_range(&next, len) {
                next
            } else {
                tracing::warn!(range = ?next, len, "range out of bounds after render, clamping");
                InlineRange::caret(next.index.min(len))
            };
            self.range.publish(Some(next), Some(&self.text));
            self.apply_native_range(Some(next))?;
        }
        self.slots.render_complete.emit(());
        Ok(())
    }

    // === Range ===

    pub fn inline_range(&self) -> Signal<Option<InlineRange>> {
        self.range.inline_range()
    }

    pub fn get_inline_range(&self) -> Option<InlineRange> {
        self.range.get_inline_range()
    }

    pub fn inline_range_provider_override(&self) -> bool {
        self.range.inline_range_provider_override()
    }

    pub fn last_start_relative_position(&self) -> Option<&T::RelativePosition> {
        self.range.last_start_relative_position()
    }

    pub fn last_end_relative_position(&self) -> Option<&T::RelativePosition> {
        self.range.last_end_relative_position()
    }

    /// Whether `range` fits the current text. A `false` means the range is
    /// stale and must be recomputed.
    pub fn is_valid_inline_range(&self, range: InlineRange) -> bool {
        self.range.is_valid_inline_range(&range, self.text.len())
    }

    /// Read the native selection into the logical range.
    ///
    /// A selection reaching outside the root clears the range.
    pub fn sync_inline_range(&mut self) -> Result<Option<InlineRange>, EditorError> {
        let Some(mount) = self.mount.as_ref() else {
            return Err(EditorError::NotMounted);
        };
        let range = mount.dom.selection().and_then(|selection| {
            let inside = mount.dom.contains(&mount.root, &selection.anchor.node)
                && mount.dom.contains(&mount.root, &selection.focus.node);
            if !inside {
                tracing::trace!("native selection outside root");
                return None;
            }
            let native = NativeRange {
                start: selection.anchor,
                end: selection.focus,
            };
            to_inline_range(&mount.dom, &mount.root, self.render.lines(), &native)
        });
        tracing::trace!(?range, "synced inline range");
        self.range.publish(range, Some(&self.text));
        Ok(range)
    }

    /// Publish `range` and write it to the native selection. An invalid
    /// range is ignored.
    pub fn set_inline_range(&mut self, range: Option<InlineRange>) -> Result<(), EditorError> {
        if self.mount.is_none() {
            return Err(EditorError::NotMounted);
        }
        if let Some(r) = range {
            if !self.is_valid_inline_range(r) {
                tracing::warn!(range = ?r, len = self.text.len(), "ignoring invalid inline range");
                return Ok(());
            }
        }
        self.range.publish(range, Some(&self.text));
        self.apply_native_range(range)
    }

    fn apply_native_range(&self, range: Option<InlineRange>) -> Result<(), EditorError> {
        let Some(mount) = &self.mount else {
            return Ok(());
        };
        match range {
            Some(r) => {
                let Some(native) = to_dom_range(self.render.lines(), r) else {
                    tracing::trace!(range = ?r, "range not mappable to the rendered tree");
                    return Ok(());
                };
                mount.dom.set_selection(Some(&native))?;
            }
            None => mount.dom.set_selection(None)?,
        }
        self.slots.inline_range_sync.emit(range);
        Ok(())
    }

    pub fn to_dom_range(&self, range: InlineRange) -> Option<NativeRange<D::Node>> {
        to_dom_range(self.render.lines(), range)
    }

    pub fn to_inline_range(&self, range: &NativeRange<D::Node>) -> Option<InlineRange> {
        let mount = self.mount.as_ref()?;
        to_inline_range(&mount.dom, &mount.root, self.render.lines(), range)
    }

    pub fn get_text_point(&self, index: usize) -> Option<TextPoint> {
        index_to_text_point(self.render.lines(), index)
    }

    /// The rendered line holding `index`, with the index relative to it.
    pub fn get_line(&self, index: usize) -> Option<(&RenderedLine<D::Node>, usize)> {
        let point = self.get_text_point(index)?;
        Some((self.render.lines().get(point.line)?, point.offset))
    }

    pub fn text_point_to_dom_point(&self, point: TextPoint) -> Option<NativePoint<D::Node>> {
        text_point_to_dom_point(self.render.lines(), point)
    }

    /// The range covered by the rendered element holding `node`.
    ///
    /// `node` may be the element itself or anything inside it. The
    /// placeholder of an empty line covers a collapsed range.
    pub fn get_inline_range_from_element(&self, node: &D::Node) -> Option<InlineRange> {
        let mount = self.mount.as_ref()?;
        let element = mount
            .dom
            .closest_with_attribute(node, V_ELEMENT_ATTR, &mount.root)?;
        self.render.lines().iter().find_map(|line| {
            if !mount.dom.contains(&line.element, &element) {
                return None;
            }
            let text = line
                .texts
                .iter()
                .find(|t| mount.dom.contains(&element, &t.node))?;
            Some(InlineRange::new(line.vline.start + text.start, text.len))
        })
    }

    /// The native selection as the host reports it.
    pub fn get_native_selection(&self) -> Option<NativeSelection<D::Node>> {
        self.mount.as_ref()?.dom.selection()
    }

    /// The native selection with its points in document order.
    ///
    /// Points outside the rendered lines keep the anchor first.
    pub fn get_native_range(&self) -> Option<NativeRange<D::Node>> {
        let mount = self.mount.as_ref()?;
        let selection = mount.dom.selection()?;
        let lines = self.render.lines();
        let index = |point: &NativePoint<D::Node>| {
            native_point_to_text_point(&mount.dom, &mount.root, lines, point)
                .and_then(|p| text_point_to_index(lines, p))
        };
        let backward = match (index(&selection.anchor), index(&selection.focus)) {
            (Some(anchor), Some(focus)) => focus < anchor,
            _ => false,
        };
        Some(if backward {
            NativeRange {
                start: selection.focus,
                end: selection.anchor,
            }
        } else {
            NativeRange {
                start: selection.anchor,
                end: selection.focus,
            }
        })
    }

    /// Select the whole text. A no-op on empty text.
    pub fn select_all(&mut self) -> Result<(), EditorError> {
        let len = self.text.len();
        if len == 0 {
            return Ok(());
        }
        self.set_inline_range(Some(InlineRange::new(0, len)))
    }

    pub fn focus_start(&mut self) -> Result<(), EditorError> {
        self.focus_index(0)
    }

    pub fn focus_end(&mut self) -> Result<(), EditorError> {
        self.focus_index(self.text.len())
    }

    /// Focus the root and put the caret at `index`.
    pub fn focus_index(&mut self, index: usize) -> Result<(), EditorError> {
        let Some(mount) = &self.mount else {
            return Err(EditorError::NotMounted);
        };
        mount.dom.focus(&mount.root)?;
        self.set_inline_range(Some(InlineRange::caret(index)))
    }

    /// Whether a caret sits on the first logical line.
    pub fn is_first_line(&self, range: Option<InlineRange>) -> bool {
        let Some(range) = range.filter(InlineRange::is_collapsed) else {
            return false;
        };
        let content = self.text.to_string();
        slice_utf16(&content, 0..range.index).is_some_and(|before| !before.contains(LINE_BREAK))
    }

    /// Whether a caret sits on the last logical line.
    pub fn is_last_line(&self, range: Option<InlineRange>) -> bool {
        let Some(range) = range.filter(InlineRange::is_collapsed) else {
            return false;
        };
        let content = self.text.to_string();
        let len = self.text.len();
        range.index <= len
            && slice_utf16(&content, range.index..len).is_some_and(|after| !after.contains(LINE_BREAK))
    }

    // === Attributes ===

    pub fn attribute_service(&self) -> &AttributeService {
        &self.attributes
    }

    pub fn set_attribute_schema(&mut self, schema: AttributeSchema) {
        self.attributes.set_attribute_schema(schema);
    }

    pub fn set_attribute_renderer(&mut self, renderer: AttributeRenderer) -> Result<(), EditorError> {
        self.attributes.set_attribute_renderer(renderer);
        if self.mounted() {
            self.rerender_whole_editor()?;
        }
        Ok(())
    }

    pub fn marks(&self) -> Option<&AttributeMap> {
        self.attributes.marks()
    }

    pub fn set_marks(&mut self, marks: AttributeMap) {
        self.attributes.set_marks(marks);
    }

    pub fn reset_marks(&mut self) {
        self.attributes.reset_marks();
    }

    /// Attributes shared by the runs in `range`. With `loose`, the union.
    pub fn get_format(&self, range: InlineRange, loose: bool) -> AttributeMap {
        let entries = self.deltas.get_deltas_by_inline_range(range);
        self.attributes.get_format(&entries, range, loose)
    }

    // === Delta ===

    pub fn get_delta_by_range_index(&self, index: usize) -> Option<DeltaEntry> {
        self.deltas.get_delta_by_range_index(index)
    }

    pub fn get_deltas_by_inline_range(&self, range: InlineRange) -> Vec<DeltaEntry> {
        self.deltas.get_deltas_by_inline_range(range)
    }

    pub fn map_deltas_in_inline_range<R>(
        &self,
        range: InlineRange,
        f: impl FnMut(&DeltaEntry) -> R,
    ) -> Vec<R> {
        self.deltas.map_deltas_in_inline_range(range, f)
    }

    pub fn embed_deltas(&self) -> Vec<DeltaEntry> {
        self.deltas.embed_deltas()
    }

    // === Text ===

    pub fn insert_text(
        &mut self,
        range: InlineRange,
        text: &str,
        attributes: Option<&AttributeMap>,
    ) -> Result<(), EditorError> {
        self.text_service
            .insert_text(&self.deltas, &self.attributes, range, text, attributes)?;
        self.flush()
    }

    pub fn delete_text(&mut self, range: InlineRange) -> Result<(), EditorError> {
        self.text_service.delete_text(range)?;
        self.flush()
    }

    pub fn format_text(
        &mut self,
        range: InlineRange,
        attributes: &AttributeMap,
        options: &FormatOptions,
    ) -> Result<(), EditorError> {
        self.text_service
            .format_text(&self.deltas, &mut self.attributes, range, attributes, options)?;
        self.flush()
    }

    pub fn insert_line_break(&mut self, range: InlineRange) -> Result<(), EditorError> {
        self.text_service.insert_line_break(range)?;
        self.flush()
    }

    pub fn set_text(&mut self, delta: &[DeltaInsert]) -> Result<(), EditorError> {
        self.text_service.set_text(&self.deltas, delta)?;
        self.flush()
    }

    pub fn reset_text(&mut self) -> Result<(), EditorError> {
        self.text_service.reset_text()?;
        self.flush()
    }

    pub fn reset_format(&mut self, range: InlineRange) -> Result<(), EditorError> {
        self.text_service.reset_format(&self.deltas, range)?;
        self.flush()
    }
}

impl<T: SharedText, D: Dom> std::fmt::Debug for InlineEditor<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlineEditor")
            .field("id", &self.id)
            .field("mounted", &self.mounted())
            .field("readonly", &self.is_readonly())
            .field("composing", &self.is_composing())
            .field("range", &self.get_inline_range())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::attributes;
    use crate::headless::{HeadlessDom, NodeId};
    use crate::memory::{MemoryDoc, MemoryText};
    use std::cell::{Cell, RefCell};

    fn editor(content: &str) -> (InlineEditor<MemoryText, HeadlessDom>, HeadlessDom, NodeId) {
        let text = MemoryDoc::new(7)
            .text_with(&[DeltaInsert::plain(content)])
            .unwrap();
        let mut editor = InlineEditor::new(text, InlineEditorOptions::default()).unwrap();
        let dom = HeadlessDom::new();
        let root = dom.create_root().unwrap();
        editor.mount(dom.clone(), root, None, false).unwrap();
        (editor, dom, root)
    }

    #[test]
    fn test_construction_preconditions() {
        let detached = InlineEditor::<_, HeadlessDom>::new(
            MemoryText::detached(),
            InlineEditorOptions::default(),
        );
        assert_eq!(detached.unwrap_err(), EditorError::NotAttached);

        let text = MemoryDoc::new(1)
            .text_with(&[DeltaInsert::plain("a\r\nb")])
            .unwrap();
        let bad = InlineEditor::<_, HeadlessDom>::new(text, InlineEditorOptions::default());
        assert_eq!(bad.unwrap_err(), EditorError::ForbiddenCharacter('\r'));
    }

    #[test]
    fn test_mount_stamps_root_and_renders() {
        let (editor, dom, root) = editor("ab\ncd");
        assert_eq!(dom.get_attribute(&root, V_ROOT_ATTR).as_deref(), Some("true"));
        assert_eq!(dom.get_attribute(&root, V_EDITOR_ID_ATTR).as_deref(), Some(editor.id()));
        assert_eq!(dom.get_attribute(&root, "contenteditable").as_deref(), Some("true"));
        assert_eq!(dom.child_nodes(&root).len(), 2);
        assert_eq!(editor.range_state(), RangeState::MountedNoRange);
        assert_eq!(editor.rendered_delta(), vec![DeltaInsert::plain("ab\ncd")]);
    }

    #[test]
    fn test_unmount_releases_everything() {
        let (mut editor, dom, root) = editor("ab");
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        let _sub = editor.slots().unmounted.subscribe(move |_| c.set(c.get() + 1));
        editor.set_inline_range(Some(InlineRange::caret(1))).unwrap();

        editor.unmount();
        assert!(!editor.mounted());
        assert_eq!(editor.range_state(), RangeState::Unmounted);
        assert_eq!(editor.get_inline_range(), None);
        assert!(dom.child_nodes(&root).is_empty());
        assert!(!dom.has_attribute(&root, V_ROOT_ATTR));
        assert_eq!(count.get(), 1);

        // No observer left: remote edits do not mark the editor dirty.
        editor
            .text()
            .apply_remote(9, |t| t.insert(0, "x", None))
            .unwrap();
        assert!(!editor.render_service().is_dirty());

        editor.unmount();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_remount_after_unmount() {
        let (mut editor, dom, root) = editor("ab");
        editor.unmount();
        editor.mount(dom.clone(), root, None, true).unwrap();
        assert!(editor.is_readonly());
        assert_eq!(dom.get_attribute(&root, "contenteditable").as_deref(), Some("false"));
        editor.set_readonly(false).unwrap();
        assert_eq!(dom.get_attribute(&root, "contenteditable").as_deref(), Some("true"));
    }

    #[test]
    fn test_remote_change_renders_on_flush() {
        let (mut editor, dom, root) = editor("ab");
        let changes = Rc::new(Cell::new(0));
        let c = changes.clone();
        let _sub = editor.slots().text_change.subscribe(move |_| c.set(c.get() + 1));

        editor
            .text()
            .apply_remote(9, |t| t.insert(2, "c", None))
            .unwrap();
        assert!(editor.render_service().is_dirty());
        assert_eq!(dom.text_content(&root), "ab");

        editor.flush().unwrap();
        assert_eq!(dom.text_content(&root), "abc");
        assert_eq!(changes.get(), 1);
        editor.flush().unwrap();
        assert_eq!(changes.get(), 1);
    }

    #[test]
    fn test_forbidden_character_from_remote_is_fatal_on_render() {
        let (mut editor, _, _) = editor("ab");
        editor
            .text()
            .apply_remote(9, |t| t.insert(1, "\r", None))
            .unwrap();
        assert_eq!(editor.flush(), Err(EditorError::ForbiddenCharacter('\r')));
    }

    #[test]
    fn test_transact_groups_operations() {
        let (mut editor, dom, root) = editor("");
        editor
            .transact(
                |t| {
                    t.insert(0, "ab", None)?;
                    t.insert(2, "cd", None)
                },
                false,
            )
            .unwrap();
        assert_eq!(dom.text_content(&root), "abcd");
        assert_eq!(editor.text().transactions().len(), 1);

        editor.transact(|t| t.delete(0, 1), true).unwrap();
        let log = editor.text().transactions();
        assert_eq!(log[0].origin, crate::shared::TransactOrigin::Local { client_id: 7 });
        assert_eq!(log[1].origin, crate::shared::TransactOrigin::Untracked);
    }

    #[test]
    fn test_set_inline_range_validation_and_native_selection() {
        let (mut editor, dom, _) = editor("Hello");
        let synced = Rc::new(RefCell::new(Vec::new()));
        let sink = synced.clone();
        let _sub = editor
            .slots()
            .inline_range_sync
            .subscribe(move |r: &Option<InlineRange>| sink.borrow_mut().push(*r));

        editor.set_inline_range(Some(InlineRange::new(1, 2))).unwrap();
        let selection = dom.selection().unwrap();
        let text = editor.render_service().lines()[0].texts[0].node;
        assert_eq!(selection.anchor, NativePoint::new(text, 1));
        assert_eq!(selection.focus, NativePoint::new(text, 3));

        editor.set_inline_range(Some(InlineRange::new(4, 5))).unwrap();
        assert_eq!(editor.get_inline_range(), Some(InlineRange::new(1, 2)));
        assert!(!editor.is_valid_inline_range(InlineRange::new(4, 5)));

        editor.set_inline_range(None).unwrap();
        assert_eq!(dom.selection(), None);
        assert_eq!(*synced.borrow(), vec![Some(InlineRange::new(1, 2)), None]);
    }

    #[test]
    fn test_selection_outside_root_clears_range() {
        let (mut editor, dom, _) = editor("Hello");
        editor.set_inline_range(Some(InlineRange::caret(2))).unwrap();
        let elsewhere = dom.create_root().unwrap();
        dom.select(NativePoint::new(elsewhere, 0), NativePoint::new(elsewhere, 0));
        assert_eq!(editor.sync_inline_range().unwrap(), None);
        assert_eq!(editor.range_state(), RangeState::MountedNoRange);
    }

    #[test]
    fn test_backward_selection_is_ordered() {
        let (mut editor, dom, _) = editor("Hello");
        let text = editor.render_service().lines()[0].texts[0].node;
        dom.select(NativePoint::new(text, 4), NativePoint::new(text, 1));
        assert_eq!(editor.sync_inline_range().unwrap(), Some(InlineRange::new(1, 3)));
    }

    #[test]
    fn test_native_selection_and_range() {
        let (mut editor, dom, _) = editor("ab\ncd");
        assert_eq!(editor.get_native_selection(), None);
        assert_eq!(editor.get_native_range(), None);

        let first = editor.render_service().lines()[0].texts[0].node;
        let second = editor.render_service().lines()[1].texts[0].node;
        dom.select(NativePoint::new(second, 1), NativePoint::new(first, 1));
        let selection = editor.get_native_selection().unwrap();
        assert_eq!(selection.anchor, NativePoint::new(second, 1));
        assert_eq!(selection.focus, NativePoint::new(first, 1));

        let range = editor.get_native_range().unwrap();
        assert_eq!(range.start, NativePoint::new(first, 1));
        assert_eq!(range.end, NativePoint::new(second, 1));
        assert_eq!(editor.to_inline_range(&range), Some(InlineRange::new(1, 3)));

        editor.set_inline_range(Some(InlineRange::new(0, 2))).unwrap();
        let range = editor.get_native_range().unwrap();
        assert_eq!(range.start, NativePoint::new(first, 0));
        assert_eq!(range.end, NativePoint::new(first, 2));

        editor.unmount();
        assert_eq!(editor.get_native_range(), None);
    }

    #[test]
    fn test_inline_range_from_element() {
        let text = MemoryDoc::new(7)
            .text_with(&[
                DeltaInsert::plain("ab"),
                DeltaInsert::new("cd", Some(attributes([("bold", true)]))),
                DeltaInsert::plain("\n\nef"),
            ])
            .unwrap();
        let mut editor = InlineEditor::new(text, InlineEditorOptions::default()).unwrap();
        let dom = HeadlessDom::new();
        let root = dom.create_root().unwrap();
        editor.mount(dom.clone(), root, None, false).unwrap();

        let elements = dom.query_all(&root, V_ELEMENT_ATTR);
        assert_eq!(elements.len(), 4);
        assert_eq!(
            editor.get_inline_range_from_element(&elements[1]),
            Some(InlineRange::new(2, 2))
        );
        let bold_text = editor.render_service().lines()[0].texts[1].node;
        assert_eq!(
            editor.get_inline_range_from_element(&bold_text),
            Some(InlineRange::new(2, 2))
        );
        // The empty middle line.
        assert_eq!(
            editor.get_inline_range_from_element(&elements[2]),
            Some(InlineRange::new(5, 0))
        );
        assert_eq!(
            editor.get_inline_range_from_element(&elements[3]),
            Some(InlineRange::new(6, 2))
        );

        let line = editor.render_service().lines()[0].element;
        assert_eq!(editor.get_inline_range_from_element(&line), None);
        assert_eq!(editor.get_inline_range_from_element(&root), None);
    }

    #[test]
    fn test_focus_helpers_and_lines() {
        let (mut editor, _, _) = editor("ab\ncd");
        editor.focus_end().unwrap();
        assert_eq!(editor.get_inline_range(), Some(InlineRange::caret(5)));
        assert!(editor.is_last_line(editor.get_inline_range()));
        assert!(!editor.is_first_line(editor.get_inline_range()));

        editor.focus_start().unwrap();
        assert!(editor.is_first_line(editor.get_inline_range()));
        assert!(!editor.is_last_line(editor.get_inline_range()));
        assert!(!editor.is_first_line(Some(InlineRange::new(0, 1))));
        assert!(!editor.is_first_line(None));

        editor.select_all().unwrap();
        assert_eq!(editor.get_inline_range(), Some(InlineRange::new(0, 5)));

        let (line, offset) = editor.get_line(4).unwrap();
        assert_eq!((line.vline.index, offset), (1, 1));
        assert_eq!(editor.get_text_point(2), Some(TextPoint { line: 0, offset: 2 }));
    }

    #[test]
    fn test_select_all_on_empty_is_noop() {
        let (mut editor, _, _) = editor("");
        editor.select_all().unwrap();
        assert_eq!(editor.get_inline_range(), None);
    }

    #[test]
    fn test_format_delegation() {
        let (mut editor, dom, root) = editor("Hello World");
        editor
            .format_text(
                InlineRange::new(0, 5),
                &attributes([("bold", true)]),
                &FormatOptions::default(),
            )
            .unwrap();
        assert_eq!(
            editor.get_format(InlineRange::new(0, 5), false),
            attributes([("bold", true)])
        );
        assert_eq!(
            editor.get_format(InlineRange::new(0, 11), true),
            attributes([("bold", true)])
        );
        assert_eq!(dom.query_all(&root, crate::render::V_ATTRIBUTES_ATTR).len(), 1);
    }

    #[test]
    fn test_vline_renderer_swap_rerenders() {
        let (mut editor, dom, root) = editor("ab");
        let renderer: VLineRenderer =
            Rc::new(|_: &crate::render::VLine| crate::attributes::ElementSpec::new("p"));
        editor.set_vline_renderer(Some(renderer)).unwrap();
        let line = dom.child_nodes(&root)[0];
        assert_eq!(dom.tag_name(line).as_deref(), Some("p"));
    }
}
