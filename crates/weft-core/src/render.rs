//! Virtual line tree and its reconciliation with the DOM.
//!
//! Each render splits the normalized delta into lines at the line-break
//! sentinel, describes every line as a [`VLine`] and reconciles the new
//! tree against the previous one by line index: a line whose elements and
//! DOM are unchanged keeps its nodes, everything else is rebuilt.
//!
//! Layout of one line:
//!
//! ```text
//! div[data-v-line]
//!   span[data-v-element][data-v-attributes]   (or the renderer's tag)
//!     span[data-v-text]
//!       #text
//! ```
//!
//! An empty line holds a single zero-width-space text marked `data-v-empty`
//! that counts as zero units. Embed elements carry `data-v-embed` and are
//! not editable. A line opened by a formatted line break keeps the break's
//! attributes in `data-v-break-attributes`.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};

use crate::attributes::{AttributeMap, AttributeService, ElementSpec};
use crate::delta::{DeltaInsert, delta_to_lines};
use crate::dom::Dom;
use crate::error::EditorError;
use crate::hooks::RenderSummary;
use crate::types::{LINE_BREAK, ZERO_WIDTH_SPACE};

pub const V_LINE_ATTR: &str = "data-v-line";
pub const V_ELEMENT_ATTR: &str = "data-v-element";
pub const V_TEXT_ATTR: &str = "data-v-text";
pub const V_EMPTY_ATTR: &str = "data-v-empty";
pub const V_EMBED_ATTR: &str = "data-v-embed";
pub const V_ATTRIBUTES_ATTR: &str = "data-v-attributes";
pub const V_BREAK_ATTRIBUTES_ATTR: &str = "data-v-break-attributes";

/// One run as it will be rendered.
#[derive(Clone, Debug, PartialEq)]
pub struct VElement {
    pub delta: DeltaInsert,
    /// Offset from the start of the line.
    pub start: usize,
    pub embed: bool,
    pub spec: ElementSpec,
}

/// One logical line.
#[derive(Clone, Debug, PartialEq)]
pub struct VLine {
    pub index: usize,
    /// Absolute offset of the first unit of the line.
    pub start: usize,
    pub elements: Vec<VElement>,
    /// Attributes of the line break that opens this line. `None` for the
    /// first line.
    pub break_attributes: Option<AttributeMap>,
}

impl VLine {
    /// Length in UTF-16 units, excluding the line break.
    pub fn len(&self) -> usize {
        self.elements.iter().map(|e| e.delta.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn end(&self) -> usize {
        self.start + self.len()
    }
}

/// Presentation of a whole line.
pub type VLineRenderer = Rc<dyn Fn(&VLine) -> ElementSpec>;

/// Build the line tree for `deltas`.
pub fn build_vlines(
    deltas: &[DeltaInsert],
    attributes: &AttributeService,
    is_embed: &dyn Fn(&DeltaInsert) -> bool,
) -> Vec<VLine> {
    let breaks: Vec<Option<AttributeMap>> = deltas
        .iter()
        .flat_map(|d| d.insert.matches(LINE_BREAK).map(|_| d.attributes.clone()))
        .collect();
    let mut start = 0;
    delta_to_lines(deltas)
        .into_iter()
        .enumerate()
        .map(|(index, runs)| {
            let mut offset = 0;
            let elements: Vec<VElement> = runs
                .into_iter()
                .map(|delta| {
                    let element = VElement {
                        start: offset,
                        embed: is_embed(&delta),
                        spec: attributes.render_element(&delta),
                        delta,
                    };
                    offset += element.delta.len();
                    element
                })
                .collect();
            let break_attributes = index
                .checked_sub(1)
                .and_then(|i| breaks.get(i).cloned().flatten());
            let line = VLine {
                index,
                start,
                elements,
                break_attributes,
            };
            start = line.end() + 1;
            line
        })
        .collect()
}

/// A rendered text node.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedText<N> {
    pub node: N,
    /// Offset of the node's first unit from the start of the line.
    pub start: usize,
    pub len: usize,
    /// The zero-width placeholder of an empty line.
    pub empty: bool,
}

impl<N> RenderedText<N> {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// A rendered line with handles to its nodes.
#[derive(Clone, Debug)]
pub struct RenderedLine<N> {
    pub vline: VLine,
    pub element: N,
    pub spec: ElementSpec,
    pub texts: Vec<RenderedText<N>>,
}

#[derive(Default)]
struct UpdateState {
    completed: u64,
    wakers: Vec<Waker>,
}

/// Resolves once the render pass it was created for has completed.
pub struct WaitForUpdate {
    state: Rc<RefCell<UpdateState>>,
    target: u64,
}

impl Future for WaitForUpdate {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.completed >= self.target {
            Poll::Ready(())
        } else {
            state.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Owns the rendered tree and the pending-change flag.
pub struct RenderService<D: Dom> {
    lines: Vec<RenderedLine<D::Node>>,
    vline_renderer: Option<VLineRenderer>,
    dirty: Arc<AtomicBool>,
    rendering: bool,
    updates: Rc<RefCell<UpdateState>>,
}

impl<D: Dom> RenderService<D> {
    pub fn new(vline_renderer: Option<VLineRenderer>) -> Self {
        Self {
            lines: Vec::new(),
            vline_renderer,
            dirty: Arc::new(AtomicBool::new(false)),
            rendering: false,
            updates: Rc::new(RefCell::new(UpdateState::default())),
        }
    }

    pub fn lines(&self) -> &[RenderedLine<D::Node>] {
        &self.lines
    }

    /// Whether a reconciliation is in flight.
    pub fn rendering(&self) -> bool {
        self.rendering
    }

    /// Flag raised by buffer observers. Safe to set from any thread.
    pub fn dirty_flag(&self) -> Arc<AtomicBool> {
        self.dirty.clone()
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn set_vline_renderer(&mut self, renderer: Option<VLineRenderer>) {
        self.vline_renderer = renderer;
    }

    /// Forget the rendered tree so the next pass rebuilds every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// A future resolving after the next completed pass, or immediately
    /// when no change is pending.
    pub fn wait_for_update(&self) -> WaitForUpdate {
        let completed = self.updates.borrow().completed;
        let target = if self.is_dirty() || self.rendering {
            completed + 1
        } else {
            completed
        };
        WaitForUpdate {
            state: self.updates.clone(),
            target,
        }
    }

    fn complete_pass(&self) {
        let wakers = {
            let mut state = self.updates.borrow_mut();
            state.completed += 1;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn line_spec(&self, vline: &VLine) -> ElementSpec {
        match &self.vline_renderer {
            Some(renderer) => renderer(vline),
            None => ElementSpec::new("div"),
        }
    }

    /// Bring the DOM under `root` in line with `vlines`.
    pub fn reconcile(
        &mut self,
        dom: &D,
        root: &D::Node,
        vlines: Vec<VLine>,
    ) -> Result<RenderSummary, EditorError> {
        self.rendering = true;
        let result = self.reconcile_lines(dom, root, vlines);
        self.rendering = false;
        let summary = result?;
        self.complete_pass();
        Ok(summary)
    }

    fn reconcile_lines(
        &mut self,
        dom: &D,
        root: &D::Node,
        vlines: Vec<VLine>,
    ) -> Result<RenderSummary, EditorError> {
        let mut previous: Vec<Option<RenderedLine<D::Node>>> =
            std::mem::take(&mut self.lines).into_iter().map(Some).collect();
        let mut lines = Vec::with_capacity(vlines.len());
        let mut rebuilt_lines = Vec::new();

        for vline in vlines {
            let spec = self.line_spec(&vline);
            let reusable = previous
                .get(vline.index)
                .and_then(|old| old.as_ref())
                .is_some_and(|old| {
                    old.spec == spec
                        && old.vline.elements == vline.elements
                        && old.vline.break_attributes == vline.break_attributes
                        && dom.parent_node(&old.element).as_ref() == Some(root)
                        && dom_matches(dom, old)
                });
            let reused = if reusable {
                previous.get_mut(vline.index).and_then(Option::take)
            } else {
                None
            };
            match reused {
                Some(mut line) => {
                    line.vline = vline;
                    lines.push(line);
                }
                None => {
                    tracing::trace!(line = vline.index, "reconcile: rebuilding line");
                    rebuilt_lines.push(vline.index);
                    lines.push(build_line(dom, vline, spec)?);
                }
            }
        }

        let elements: Vec<D::Node> = lines.iter().map(|l| l.element.clone()).collect();
        dom.replace_children(root, &elements)?;
        self.lines = lines;

        Ok(RenderSummary {
            line_count: self.lines.len(),
            rebuilt_lines,
        })
    }

    /// Read the rendered DOM back into a delta.
    ///
    /// Adjacent runs with equal attributes are merged, so this equals the
    /// buffer's own delta.
    pub fn rendered_delta(&self, dom: &D, root: &D::Node) -> Vec<DeltaInsert> {
        let mut out: Vec<DeltaInsert> = Vec::new();
        let mut push = |insert: String, attributes: Option<AttributeMap>| match out.last_mut() {
            Some(last) if last.attributes == attributes => last.insert.push_str(&insert),
            _ => out.push(DeltaInsert::new(insert, attributes)),
        };

        let lines = dom
            .child_nodes(root)
            .into_iter()
            .filter(|n| !dom.is_text(n) && dom.has_attribute(n, V_LINE_ATTR));
        for (i, line) in lines.enumerate() {
            if i > 0 {
                let attributes = dom
                    .get_attribute(&line, V_BREAK_ATTRIBUTES_ATTR)
                    .and_then(|json| serde_json::from_str::<AttributeMap>(&json).ok());
                push("\n".to_string(), attributes);
            }
            for element in dom.query_all(&line, V_ELEMENT_ATTR) {
                if !dom.query_all(&element, V_EMPTY_ATTR).is_empty() {
                    continue;
                }
                let attributes = dom
                    .get_attribute(&element, V_ATTRIBUTES_ATTR)
                    .and_then(|json| serde_json::from_str::<AttributeMap>(&json).ok());
                push(dom.text_content(&element), attributes);
            }
        }
        out
    }
}

/// Whether the browser left a reused line's text nodes alone.
fn dom_matches<D: Dom>(dom: &D, line: &RenderedLine<D::Node>) -> bool {
    let expected = line.vline.elements.iter().map(|e| e.delta.insert.as_str());
    if line.vline.is_empty() {
        return line
            .texts
            .first()
            .is_some_and(|t| dom.text_content(&t.node) == ZERO_WIDTH_SPACE);
    }
    line.texts.len() == line.vline.elements.len()
        && line
            .texts
            .iter()
            .zip(expected)
            .all(|(t, text)| dom.text_content(&t.node) == text)
}

fn apply_spec<D: Dom>(dom: &D, node: &D::Node, spec: &ElementSpec) -> Result<(), EditorError> {
    for (name, value) in &spec.attributes {
        dom.set_attribute(node, name, value)?;
    }
    Ok(())
}

fn attributes_json(attributes: &AttributeMap) -> Result<String, EditorError> {
    serde_json::to_string(attributes)
        .map_err(|e| EditorError::Dom(format!("serializing attributes: {e}")))
}

fn build_text<D: Dom>(dom: &D, data: &str, empty: bool) -> Result<(D::Node, D::Node), EditorError> {
    let span = dom.create_element("span")?;
    dom.set_attribute(&span, V_TEXT_ATTR, "true")?;
    if empty {
        dom.set_attribute(&span, V_EMPTY_ATTR, "true")?;
    }
    let text = dom.create_text_node(data)?;
    dom.append_child(&span, &text)?;
    Ok((span, text))
}

fn build_line<D: Dom>(
    dom: &D,
    vline: VLine,
    spec: ElementSpec,
) -> Result<RenderedLine<D::Node>, EditorError> {
    let line = dom.create_element(&spec.tag)?;
    dom.set_attribute(&line, V_LINE_ATTR, "true")?;
    apply_spec(dom, &line, &spec)?;
    if let Some(attributes) = &vline.break_attributes {
        dom.set_attribute(&line, V_BREAK_ATTRIBUTES_ATTR, &attributes_json(attributes)?)?;
    }

    let mut texts = Vec::with_capacity(vline.elements.len().max(1));
    if vline.is_empty() {
        let element = dom.create_element("span")?;
        dom.set_attribute(&element, V_ELEMENT_ATTR, "true")?;
        let (span, text) = build_text(dom, ZERO_WIDTH_SPACE, true)?;
        dom.append_child(&element, &span)?;
        dom.append_child(&line, &element)?;
        texts.push(RenderedText {
            node: text,
            start: 0,
            len: 0,
            empty: true,
        });
    }

    for velement in &vline.elements {
        let element = dom.create_element(&velement.spec.tag)?;
        dom.set_attribute(&element, V_ELEMENT_ATTR, "true")?;
        apply_spec(dom, &element, &velement.spec)?;
        if let Some(attributes) = &velement.delta.attributes {
            dom.set_attribute(&element, V_ATTRIBUTES_ATTR, &attributes_json(attributes)?)?;
        }
        if velement.embed {
            dom.set_attribute(&element, V_EMBED_ATTR, "true")?;
            dom.set_attribute(&element, "contenteditable", "false")?;
        }
        let (span, text) = build_text(dom, &velement.delta.insert, false)?;
        dom.append_child(&element, &span)?;
        dom.append_child(&line, &element)?;
        texts.push(RenderedText {
            node: text,
            start: velement.start,
            len: velement.delta.len(),
            empty: false,
        });
    }

    Ok(RenderedLine {
        vline,
        element: line,
        spec,
        texts,
    })
}
