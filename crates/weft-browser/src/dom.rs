//! `Dom` over the live browser document.

use wasm_bindgen::{JsCast, JsValue};
use weft_core::{Dom, DomError, NativePoint, NativeRange, NativeSelection};

fn js_err(op: &str) -> impl Fn(JsValue) -> DomError + '_ {
    move |e| DomError(format!("{op} failed: {e:?}"))
}

fn as_element<'a>(node: &'a web_sys::Node, op: &str) -> Result<&'a web_sys::Element, DomError> {
    node.dyn_ref::<web_sys::Element>()
        .ok_or_else(|| DomError(format!("{op}: node is not an element")))
}

/// Browser document handle. Nodes are plain `web_sys::Node`s.
#[derive(Clone, Debug)]
pub struct BrowserDom {
    window: web_sys::Window,
    document: web_sys::Document,
}

impl BrowserDom {
    /// Bind to the global window and document.
    pub fn new() -> Self {
        Self {
            window: gloo_utils::window(),
            document: gloo_utils::document(),
        }
    }

    pub fn with_document(window: web_sys::Window, document: web_sys::Document) -> Self {
        Self { window, document }
    }

    pub fn document(&self) -> &web_sys::Document {
        &self.document
    }

    fn native_selection(&self) -> Option<web_sys::Selection> {
        self.window.get_selection().ok().flatten()
    }
}

impl Default for BrowserDom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom for BrowserDom {
    type Node = web_sys::Node;

    fn create_element(&self, tag: &str) -> Result<web_sys::Node, DomError> {
        self.document
            .create_element(tag)
            .map(Into::into)
            .map_err(js_err("create_element"))
    }

    fn create_text_node(&self, data: &str) -> Result<web_sys::Node, DomError> {
        Ok(self.document.create_text_node(data).into())
    }

    fn parent_node(&self, node: &web_sys::Node) -> Option<web_sys::Node> {
        node.parent_node()
    }

    fn child_nodes(&self, node: &web_sys::Node) -> Vec<web_sys::Node> {
        let list = node.child_nodes();
        (0..list.length()).filter_map(|i| list.get(i)).collect()
    }

    fn is_text(&self, node: &web_sys::Node) -> bool {
        node.node_type() == web_sys::Node::TEXT_NODE
    }

    fn text_content(&self, node: &web_sys::Node) -> String {
        node.text_content().unwrap_or_default()
    }

    fn get_attribute(&self, node: &web_sys::Node, name: &str) -> Option<String> {
        node.dyn_ref::<web_sys::Element>()?.get_attribute(name)
    }

    fn has_attribute(&self, node: &web_sys::Node, name: &str) -> bool {
        node.dyn_ref::<web_sys::Element>()
            .is_some_and(|el| el.has_attribute(name))
    }

    fn set_attribute(&self, node: &web_sys::Node, name: &str, value: &str) -> Result<(), DomError> {
        as_element(node, "set_attribute")?
            .set_attribute(name, value)
            .map_err(js_err("set_attribute"))
    }

    fn remove_attribute(&self, node: &web_sys::Node, name: &str) -> Result<(), DomError> {
        as_element(node, "remove_attribute")?
            .remove_attribute(name)
            .map_err(js_err("remove_attribute"))
    }

    fn append_child(&self, parent: &web_sys::Node, child: &web_sys::Node) -> Result<(), DomError> {
        parent
            .append_child(child)
            .map(|_| ())
            .map_err(js_err("append_child"))
    }

    fn replace_children(
        &self,
        parent: &web_sys::Node,
        children: &[web_sys::Node],
    ) -> Result<(), DomError> {
        for existing in self.child_nodes(parent) {
            if !children.contains(&existing) {
                parent
                    .remove_child(&existing)
                    .map_err(js_err("remove_child"))?;
            }
        }
        // Appending an attached node moves it, so this also reorders.
        for child in children {
            parent.append_child(child).map_err(js_err("append_child"))?;
        }
        Ok(())
    }

    fn is_connected(&self, node: &web_sys::Node) -> bool {
        node.is_connected()
    }

    fn selection(&self) -> Option<NativeSelection<web_sys::Node>> {
        let selection = self.native_selection()?;
        if selection.range_count() == 0 {
            return None;
        }
        Some(NativeSelection {
            anchor: NativePoint::new(selection.anchor_node()?, selection.anchor_offset() as usize),
            focus: NativePoint::new(selection.focus_node()?, selection.focus_offset() as usize),
        })
    }

    fn set_selection(&self, range: Option<&NativeRange<web_sys::Node>>) -> Result<(), DomError> {
        let selection = self
            .native_selection()
            .ok_or_else(|| DomError::from("no selection object"))?;
        let Some(range) = range else {
            return selection
                .remove_all_ranges()
                .map_err(js_err("remove_all_ranges"));
        };

        let native = self.document.create_range().map_err(js_err("create_range"))?;
        native
            .set_start(&range.start.node, range.start.offset as u32)
            .map_err(js_err("set_start"))?;
        native
            .set_end(&range.end.node, range.end.offset as u32)
            .map_err(js_err("set_end"))?;

        selection
            .remove_all_ranges()
            .map_err(js_err("remove_all_ranges"))?;
        selection.add_range(&native).map_err(js_err("add_range"))
    }

    fn focus(&self, node: &web_sys::Node) -> Result<(), DomError> {
        match node.dyn_ref::<web_sys::HtmlElement>() {
            Some(el) => el.focus().map_err(js_err("focus")),
            None => Ok(()),
        }
    }

    fn contains(&self, ancestor: &web_sys::Node, node: &web_sys::Node) -> bool {
        ancestor.contains(Some(node))
    }

    fn query_all(&self, root: &web_sys::Node, attribute: &str) -> Vec<web_sys::Node> {
        let Some(root) = root.dyn_ref::<web_sys::Element>() else {
            return Vec::new();
        };
        match root.query_selector_all(&format!("[{attribute}]")) {
            Ok(list) => (0..list.length()).filter_map(|i| list.get(i)).collect(),
            Err(e) => {
                tracing::warn!("query_selector_all failed: {:?}", e);
                Vec::new()
            }
        }
    }
}
