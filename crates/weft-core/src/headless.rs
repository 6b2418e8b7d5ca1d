//! Headless node tree implementing [`Dom`].
//!
//! An arena of elements and text nodes plus a single selection. It is enough
//! for the editor to render, map ranges and read selections without a
//! browser, and it can simulate what the browser does behind the editor's
//! back (user selections, IME mutating text nodes).

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use smol_str::SmolStr;

use crate::dom::{Dom, DomError, NativePoint, NativeRange, NativeSelection};

/// Handle to a node in a [`HeadlessDom`].
#[derive(Clone, Debug, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug)]
enum NodeKind {
    Element {
        tag: SmolStr,
        attributes: Vec<(SmolStr, String)>,
    },
    Text(String),
}

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct Arena {
    nodes: Vec<NodeData>,
    selection: Option<NativeSelection<NodeId>>,
}

impl Arena {
    fn node(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| DomError(format!("unknown node {id:?}")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| DomError(format!("unknown node {id:?}")))
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    fn detach(&mut self, id: NodeId) -> Result<(), DomError> {
        if let Some(parent) = self.node(id)?.parent {
            self.node_mut(parent)?.children.retain(|c| *c != id);
            self.node_mut(id)?.parent = None;
        }
        Ok(())
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id.0).and_then(|n| n.parent);
        }
        false
    }
}

/// In-memory DOM. Clones share the same tree.
#[derive(Clone, Debug)]
pub struct HeadlessDom {
    arena: Rc<RefCell<Arena>>,
}

impl Default for HeadlessDom {
    fn default() -> Self {
        Self::new()
    }
}

const DOCUMENT: NodeId = NodeId(0);

impl HeadlessDom {
    pub fn new() -> Self {
        let mut arena = Arena {
            nodes: Vec::new(),
            selection: None,
        };
        arena.push(NodeKind::Element {
            tag: SmolStr::new_static("#document"),
            attributes: Vec::new(),
        });
        Self {
            arena: Rc::new(RefCell::new(arena)),
        }
    }

    /// The document node. Nodes are connected when it is an ancestor.
    pub fn document(&self) -> NodeId {
        DOCUMENT
    }

    /// Create a connected `div` to mount an editor on.
    pub fn create_root(&self) -> Result<NodeId, DomError> {
        let root = self.create_element("div")?;
        self.append_child(&DOCUMENT, &root)?;
        Ok(root)
    }

    /// Set the native selection as a user gesture would.
    pub fn select(&self, anchor: NativePoint<NodeId>, focus: NativePoint<NodeId>) {
        self.arena.borrow_mut().selection = Some(NativeSelection { anchor, focus });
    }

    /// Overwrite a text node's data, as the browser does during composition.
    pub fn set_text_data(&self, node: NodeId, data: &str) -> Result<(), DomError> {
        let mut arena = self.arena.borrow_mut();
        match &mut arena.node_mut(node)?.kind {
            NodeKind::Text(text) => {
                *text = data.to_string();
                Ok(())
            }
            NodeKind::Element { .. } => Err(DomError(format!("{node:?} is not a text node"))),
        }
    }

    pub fn tag_name(&self, node: NodeId) -> Option<SmolStr> {
        let arena = self.arena.borrow();
        match &arena.node(node).ok()?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    /// Serialize the children of `node` as markup.
    pub fn inner_html(&self, node: NodeId) -> String {
        let arena = self.arena.borrow();
        let mut out = String::new();
        if let Ok(data) = arena.node(node) {
            for child in &data.children {
                write_node(&arena, *child, &mut out);
            }
        }
        out
    }
}

fn escape(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

fn write_node(arena: &Arena, id: NodeId, out: &mut String) {
    let Ok(data) = arena.node(id) else {
        return;
    };
    match &data.kind {
        NodeKind::Text(text) => escape(text, out),
        NodeKind::Element { tag, attributes } => {
            let _ = write!(out, "<{tag}");
            for (name, value) in attributes {
                let _ = write!(out, " {name}=\"");
                escape(value, out);
                out.push('"');
            }
            out.push('>');
            for child in &data.children {
                write_node(arena, *child, out);
            }
            let _ = write!(out, "</{tag}>");
        }
    }
}

impl Dom for HeadlessDom {
    type Node = NodeId;

    fn create_element(&self, tag: &str) -> Result<NodeId, DomError> {
        Ok(self.arena.borrow_mut().push(NodeKind::Element {
            tag: SmolStr::new(tag),
            attributes: Vec::new(),
        }))
    }

    fn create_text_node(&self, data: &str) -> Result<NodeId, DomError> {
        Ok(self
            .arena
            .borrow_mut()
            .push(NodeKind::Text(data.to_string())))
    }

    fn parent_node(&self, node: &NodeId) -> Option<NodeId> {
        self.arena.borrow().node(*node).ok()?.parent
    }

    fn child_nodes(&self, node: &NodeId) -> Vec<NodeId> {
        self.arena
            .borrow()
            .node(*node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn is_text(&self, node: &NodeId) -> bool {
        matches!(
            self.arena.borrow().node(*node).map(|n| &n.kind),
            Ok(NodeKind::Text(_))
        )
    }

    fn text_content(&self, node: &NodeId) -> String {
        fn collect(arena: &Arena, id: NodeId, out: &mut String) {
            let Ok(data) = arena.node(id) else {
                return;
            };
            match &data.kind {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element { .. } => {
                    for child in &data.children {
                        collect(arena, *child, out);
                    }
                }
            }
        }
        let mut out = String::new();
        collect(&self.arena.borrow(), *node, &mut out);
        out
    }

    fn get_attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        let arena = self.arena.borrow();
        match &arena.node(*node).ok()?.kind {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            NodeKind::Text(_) => None,
        }
    }

    fn set_attribute(&self, node: &NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let mut arena = self.arena.borrow_mut();
        match &mut arena.node_mut(*node)?.kind {
            NodeKind::Element { attributes, .. } => {
                match attributes.iter_mut().find(|(n, _)| n == name) {
                    Some((_, v)) => *v = value.to_string(),
                    None => attributes.push((SmolStr::new(name), value.to_string())),
                }
                Ok(())
            }
            NodeKind::Text(_) => Err(DomError("text nodes have no attributes".into())),
        }
    }

    fn remove_attribute(&self, node: &NodeId, name: &str) -> Result<(), DomError> {
        let mut arena = self.arena.borrow_mut();
        if let NodeKind::Element { attributes, .. } = &mut arena.node_mut(*node)?.kind {
            attributes.retain(|(n, _)| n != name);
        }
        Ok(())
    }

    fn append_child(&self, parent: &NodeId, child: &NodeId) -> Result<(), DomError> {
        let mut arena = self.arena.borrow_mut();
        if arena.is_ancestor(*child, *parent) {
            return Err(DomError("cannot append a node to its own descendant".into()));
        }
        arena.detach(*child)?;
        arena.node_mut(*parent)?.children.push(*child);
        arena.node_mut(*child)?.parent = Some(*parent);
        Ok(())
    }

    fn replace_children(&self, parent: &NodeId, children: &[NodeId]) -> Result<(), DomError> {
        let mut arena = self.arena.borrow_mut();
        let old = std::mem::take(&mut arena.node_mut(*parent)?.children);
        for child in old {
            arena.node_mut(child)?.parent = None;
        }
        for child in children {
            if arena.is_ancestor(*child, *parent) {
                return Err(DomError("cannot append a node to its own descendant".into()));
            }
            arena.detach(*child)?;
            arena.node_mut(*parent)?.children.push(*child);
            arena.node_mut(*child)?.parent = Some(*parent);
        }
        Ok(())
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        self.arena.borrow().is_ancestor(DOCUMENT, *node)
    }

    fn selection(&self) -> Option<NativeSelection<NodeId>> {
        self.arena.borrow().selection.clone()
    }

    fn set_selection(&self, range: Option<&NativeRange<NodeId>>) -> Result<(), DomError> {
        self.arena.borrow_mut().selection = range.map(|r| NativeSelection {
            anchor: r.start.clone(),
            focus: r.end.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_building_and_html() {
        let dom = HeadlessDom::new();
        let root = dom.create_root().unwrap();
        let span = dom.create_element("span").unwrap();
        dom.set_attribute(&span, "data-x", "a\"b").unwrap();
        let text = dom.create_text_node("1 < 2").unwrap();
        dom.append_child(&span, &text).unwrap();
        dom.append_child(&root, &span).unwrap();

        assert_eq!(
            dom.inner_html(root),
            "<span data-x=\"a&quot;b\">1 &lt; 2</span>"
        );
        assert_eq!(dom.text_content(&root), "1 < 2");
        assert!(dom.is_connected(&text));
        assert!(dom.contains(&root, &text));
        assert_eq!(
            dom.closest_with_attribute(&text, "data-x", &root),
            Some(span)
        );
    }

    #[test]
    fn test_replace_children_keeps_identity() {
        let dom = HeadlessDom::new();
        let root = dom.create_root().unwrap();
        let a = dom.create_element("a").unwrap();
        let b = dom.create_element("b").unwrap();
        dom.append_child(&root, &a).unwrap();
        dom.append_child(&root, &b).unwrap();

        dom.replace_children(&root, &[b]).unwrap();
        assert_eq!(dom.child_nodes(&root), vec![b]);
        assert_eq!(dom.parent_node(&a), None);
        assert!(!dom.is_connected(&a));
    }

    #[test]
    fn test_cycles_rejected() {
        let dom = HeadlessDom::new();
        let root = dom.create_root().unwrap();
        let child = dom.create_element("span").unwrap();
        dom.append_child(&root, &child).unwrap();
        assert!(dom.append_child(&child, &root).is_err());
    }

    #[test]
    fn test_selection() {
        let dom = HeadlessDom::new();
        let root = dom.create_root().unwrap();
        assert!(dom.selection().is_none());
        dom.select(NativePoint::new(root, 1), NativePoint::new(root, 0));
        let sel = dom.selection().unwrap();
        assert_eq!(sel.anchor.offset, 1);
        assert_eq!(sel.focus.offset, 0);
        dom.set_selection(None).unwrap();
        assert!(dom.selection().is_none());
    }
}
