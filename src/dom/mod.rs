//! The document interface the element builder renders into.

mod simple;

use std::cell::RefCell;
use std::rc::Rc;

pub use crate::dom::simple::SimpleDocument;

/// A node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a node id from an index chosen by the document.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// A tree of elements, text and comments.
///
/// The element builder only creates, inserts, moves and removes nodes through
/// this trait, so the same program can target any document implementation.
pub trait Document {
    fn create_element(&mut self, tag: &str) -> NodeId;

    fn create_text(&mut self, text: &str) -> NodeId;

    fn create_comment(&mut self, text: &str) -> NodeId;

    /// Replaces the content of a text or comment node.
    fn set_text(&mut self, node: NodeId, text: &str);

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str);

    fn remove_attribute(&mut self, node: NodeId, name: &str);

    /// Inserts `node` into `parent` before `next`, or at the end if `next` is
    /// `None`. The node is first detached from its current parent.
    fn insert_before(&mut self, parent: NodeId, node: NodeId, next: Option<NodeId>);

    fn remove_child(&mut self, parent: NodeId, node: NodeId);

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn next_sibling(&self, node: NodeId) -> Option<NodeId>;

    fn first_child(&self, node: NodeId) -> Option<NodeId>;

    fn last_child(&self, node: NodeId) -> Option<NodeId>;
}

/// A document shared between the environment and the host.
pub type SharedDocument = Rc<RefCell<dyn Document>>;
