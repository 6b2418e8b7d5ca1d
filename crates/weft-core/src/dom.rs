//! DOM abstraction for rendering and selection.
//!
//! The `Dom` trait is the interface between the editor logic and whatever
//! owns the actual node tree: the browser (`weft-browser`) or the headless
//! tree in [`crate::headless`] used by tests and server-side hosts. Range
//! mapping and rendering only ever touch nodes through it.

use std::fmt;

/// Error type for DOM operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomError(pub String);

impl fmt::Display for DomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DomError {}

impl From<&str> for DomError {
    fn from(s: &str) -> Self {
        DomError(s.to_string())
    }
}

impl From<String> for DomError {
    fn from(s: String) -> Self {
        DomError(s)
    }
}

/// A boundary point: a node and an offset inside it.
///
/// For text nodes the offset counts UTF-16 units; for elements it counts
/// child nodes, as in the DOM Range API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativePoint<N> {
    pub node: N,
    pub offset: usize,
}

impl<N> NativePoint<N> {
    pub fn new(node: N, offset: usize) -> Self {
        Self { node, offset }
    }
}

/// A document-ordered native range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeRange<N> {
    pub start: NativePoint<N>,
    pub end: NativePoint<N>,
}

/// The native selection as the user made it. The focus may precede the
/// anchor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeSelection<N> {
    pub anchor: NativePoint<N>,
    pub focus: NativePoint<N>,
}

/// Node tree and selection operations the editor needs.
pub trait Dom {
    type Node: Clone + PartialEq + fmt::Debug;

    fn create_element(&self, tag: &str) -> Result<Self::Node, DomError>;

    fn create_text_node(&self, data: &str) -> Result<Self::Node, DomError>;

    fn parent_node(&self, node: &Self::Node) -> Option<Self::Node>;

    fn child_nodes(&self, node: &Self::Node) -> Vec<Self::Node>;

    fn is_text(&self, node: &Self::Node) -> bool;

    /// Text data of a text node, or the concatenated text of an element.
    fn text_content(&self, node: &Self::Node) -> String;

    fn get_attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    fn has_attribute(&self, node: &Self::Node, name: &str) -> bool {
        self.get_attribute(node, name).is_some()
    }

    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str) -> Result<(), DomError>;

    fn remove_attribute(&self, node: &Self::Node, name: &str) -> Result<(), DomError>;

    fn append_child(&self, parent: &Self::Node, child: &Self::Node) -> Result<(), DomError>;

    /// Replace every child of `parent` with `children`, in order. Nodes
    /// already in `children` keep their identity.
    fn replace_children(&self, parent: &Self::Node, children: &[Self::Node])
    -> Result<(), DomError>;

    fn is_connected(&self, node: &Self::Node) -> bool;

    fn selection(&self) -> Option<NativeSelection<Self::Node>>;

    /// Apply a range to the native selection, or clear it.
    fn set_selection(&self, range: Option<&NativeRange<Self::Node>>) -> Result<(), DomError>;

    /// Move keyboard focus to `node`. Hosts without focus ignore it.
    fn focus(&self, _node: &Self::Node) -> Result<(), DomError> {
        Ok(())
    }

    /// Whether `node` is `ancestor` or one of its descendants.
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if &n == ancestor {
                return true;
            }
            current = self.parent_node(&n);
        }
        false
    }

    /// Nearest ancestor-or-self carrying `attribute`, stopping at `boundary`.
    fn closest_with_attribute(
        &self,
        node: &Self::Node,
        attribute: &str,
        boundary: &Self::Node,
    ) -> Option<Self::Node> {
        let mut current = Some(node.clone());
        while let Some(n) = current {
            if !self.is_text(&n) && self.has_attribute(&n, attribute) {
                return Some(n);
            }
            if &n == boundary {
                return None;
            }
            current = self.parent_node(&n);
        }
        None
    }

    /// Descendant elements carrying `attribute`, in document order.
    fn query_all(&self, root: &Self::Node, attribute: &str) -> Vec<Self::Node> {
        let mut out = Vec::new();
        let mut stack: Vec<Self::Node> = self.child_nodes(root).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if self.is_text(&node) {
                continue;
            }
            if self.has_attribute(&node, attribute) {
                out.push(node.clone());
            }
            stack.extend(self.child_nodes(&node).into_iter().rev());
        }
        out
    }
}
