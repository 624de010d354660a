//! Logical regions of the document.
//!
//! A block owns a contiguous run of sibling nodes under one parent. Its
//! bounds are stored as edges that point either at a node or at a nested
//! block, so a nested block can re-render without its ancestors having to
//! patch their bounds.

use std::fmt;

use crate::dom::{Document, NodeId};
use crate::env::Destroyable;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(u32);

#[cfg(test)]
impl BlockId {
    pub fn dangling() -> Self {
        BlockId(u32::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    /// An ordinary region, bounded by what was appended to it.
    Simple,
    /// The content of an element. Only used for teardown.
    Element,
    /// Content appended into a node outside of the current tree. Only used
    /// for teardown, and its nodes are removed from the remote parent.
    Remote,
    /// The items of a list followed by an end marker. Bounds are derived
    /// from the current item order.
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Node(NodeId),
    Block(BlockId),
}

struct Block {
    kind: BlockKind,
    parent: NodeId,
    owner: Option<BlockId>,
    first: Option<Edge>,
    last: Option<Edge>,
    marker: Option<NodeId>,
    children: Vec<BlockId>,
    destructors: Vec<Destroyable>,
}

/// An arena of blocks.
#[derive(Default)]
pub(crate) struct Tree {
    blocks: Vec<Option<Block>>,
    free: Vec<u32>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a block whose nodes live under `parent`. The block is torn down
    /// together with its owner.
    pub fn open(&mut self, kind: BlockKind, parent: NodeId, owner: Option<BlockId>) -> BlockId {
        let block = Block {
            kind,
            parent,
            owner,
            first: None,
            last: None,
            marker: None,
            children: Vec::new(),
            destructors: Vec::new(),
        };
        let id = match self.free.pop() {
            Some(i) => {
                self.blocks[i as usize] = Some(block);
                BlockId(i)
            }
            None => {
                self.blocks.push(Some(block));
                BlockId(self.blocks.len() as u32 - 1)
            }
        };
        if let Some(owner) = owner {
            self.block_mut(owner).children.push(id);
        }
        id
    }

    /// The number of live blocks.
    pub fn len(&self) -> usize {
        self.blocks.len() - self.free.len()
    }

    pub fn kind(&self, id: BlockId) -> BlockKind {
        self.block(id).kind
    }

    pub fn parent(&self, id: BlockId) -> NodeId {
        self.block(id).parent
    }

    pub fn children(&self, id: BlockId) -> &[BlockId] {
        &self.block(id).children
    }

    /// Replaces the child order of a list block after reconciliation.
    pub fn set_children(&mut self, id: BlockId, children: Vec<BlockId>) {
        self.block_mut(id).children = children;
    }

    pub fn is_empty(&self, id: BlockId) -> bool {
        let block = self.block(id);
        match block.kind {
            BlockKind::List => block.marker.is_none() && block.children.is_empty(),
            _ => block.first.is_none(),
        }
    }

    pub fn did_append_node(&mut self, id: BlockId, node: NodeId) {
        let block = self.block_mut(id);
        match block.kind {
            BlockKind::List => block.marker = Some(node),
            _ => {
                block.first.get_or_insert(Edge::Node(node));
                block.last = Some(Edge::Node(node));
            }
        }
    }

    pub fn did_append_block(&mut self, id: BlockId, child: BlockId) {
        if matches!(self.kind(child), BlockKind::Element | BlockKind::Remote) {
            return;
        }
        let block = self.block_mut(id);
        if block.kind == BlockKind::List {
            return;
        }
        block.first.get_or_insert(Edge::Block(child));
        block.last = Some(Edge::Block(child));
    }

    pub fn add_destructor(&mut self, id: BlockId, destructor: Destroyable) {
        self.block_mut(id).destructors.push(destructor);
    }

    pub fn first_node(&self, id: BlockId) -> Option<NodeId> {
        let block = self.get(id)?;
        match block.kind {
            BlockKind::List => block
                .children
                .first()
                .and_then(|child| self.first_node(*child))
                .or(block.marker),
            _ => match block.first? {
                Edge::Node(node) => Some(node),
                Edge::Block(child) => self.first_node(child),
            },
        }
    }

    pub fn last_node(&self, id: BlockId) -> Option<NodeId> {
        let block = self.get(id)?;
        match block.kind {
            BlockKind::List => block
                .marker
                .or_else(|| block.children.last().and_then(|c| self.last_node(*c))),
            _ => match block.last? {
                Edge::Node(node) => Some(node),
                Edge::Block(child) => self.last_node(child),
            },
        }
    }

    /// Returns the nodes between the bounds of the block, in order.
    pub fn nodes(&self, doc: &dyn Document, id: BlockId) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let (Some(first), Some(last)) = (self.first_node(id), self.last_node(id)) else {
            return nodes;
        };
        let mut node = Some(first);
        while let Some(n) = node {
            nodes.push(n);
            if n == last {
                break;
            }
            node = doc.next_sibling(n);
        }
        nodes
    }

    /// Destroys nested blocks, runs destructors and removes the nodes of the
    /// block, keeping the block itself open for re-rendering.
    ///
    /// Returns the node that followed the block.
    pub fn clear(&mut self, doc: &mut dyn Document, id: BlockId) -> Option<NodeId> {
        let nodes = self.nodes(doc, id);
        let next = nodes.last().and_then(|last| doc.next_sibling(*last));
        let block = self.block_mut(id);
        let children = std::mem::take(&mut block.children);
        let destructors = std::mem::take(&mut block.destructors);
        block.first = None;
        block.last = None;
        block.marker = None;
        let parent = block.parent;

        for child in children {
            self.destroy(doc, child);
        }
        for destructor in destructors {
            destructor();
        }
        for node in nodes {
            doc.remove_child(parent, node);
        }
        next
    }

    /// Clears the block and frees it.
    pub fn remove(&mut self, doc: &mut dyn Document, id: BlockId) -> Option<NodeId> {
        let next = self.clear(doc, id);
        if let Some(block) = self.blocks[id.0 as usize].take() {
            self.free.push(id.0);
            if let Some(owner) = block.owner.and_then(|o| self.blocks[o.0 as usize].as_mut()) {
                owner.children.retain(|c| *c != id);
            }
        }
        next
    }

    /// Moves the nodes of the block before `next`.
    pub fn move_before(&self, doc: &mut dyn Document, id: BlockId, next: Option<NodeId>) {
        let parent = self.parent(id);
        for node in self.nodes(doc, id) {
            doc.insert_before(parent, node, next);
        }
    }

    /// Verifies that the bounds of the block are children of its parent and
    /// that the last node is reachable from the first.
    pub fn check(&self, doc: &dyn Document, id: BlockId) -> Result<()> {
        if matches!(self.kind(id), BlockKind::Element | BlockKind::Remote) {
            return Ok(());
        }
        let parent = Some(self.parent(id));
        let ok = match (self.first_node(id), self.last_node(id)) {
            (Some(first), Some(last)) => {
                doc.parent(first) == parent
                    && doc.parent(last) == parent
                    && self.nodes(doc, id).last() == Some(&last)
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::program("block bounds do not match the document"))
        }
    }

    // Nested blocks are torn down without touching the document, their nodes
    // go away with the enclosing range. Remote blocks are the exception.
    fn destroy(&mut self, doc: &mut dyn Document, id: BlockId) {
        let nodes = match self.get(id) {
            Some(block) if block.kind == BlockKind::Remote => self.nodes(doc, id),
            Some(_) => Vec::new(),
            None => return,
        };
        let Some(block) = self.blocks[id.0 as usize].take() else {
            return;
        };
        self.free.push(id.0);
        for child in block.children {
            self.destroy(doc, child);
        }
        for destructor in block.destructors {
            destructor();
        }
        for node in nodes {
            doc.remove_child(block.parent, node);
        }
    }

    fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn block(&self, id: BlockId) -> &Block {
        match self.get(id) {
            Some(block) => block,
            None => panic!("block {} was already freed", id.0),
        }
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        match self.blocks.get_mut(id.0 as usize).and_then(Option::as_mut) {
            Some(block) => block,
            None => panic!("block {} was already freed", id.0),
        }
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree").field("blocks", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::dom::SimpleDocument;

    fn append(doc: &mut SimpleDocument, tree: &mut Tree, block: BlockId, text: &str) -> NodeId {
        let node = doc.create_text(text);
        doc.insert_before(tree.parent(block), node, None);
        tree.did_append_node(block, node);
        node
    }

    #[test]
    fn nested_bounds_follow_child() {
        let mut doc = SimpleDocument::new();
        let root = doc.create_root();
        let mut tree = Tree::new();
        let outer = tree.open(BlockKind::Simple, root, None);
        let inner = tree.open(BlockKind::Simple, root, Some(outer));
        let a = append(&mut doc, &mut tree, inner, "a");
        tree.did_append_block(outer, inner);
        let b = append(&mut doc, &mut tree, outer, "b");

        assert_eq!(tree.first_node(outer), Some(a));
        assert_eq!(tree.last_node(outer), Some(b));

        let next = tree.clear(&mut doc, inner);
        assert_eq!(next, Some(b));
        let c = doc.create_text("c");
        doc.insert_before(root, c, next);
        tree.did_append_node(inner, c);
        assert_eq!(tree.first_node(outer), Some(c));
        assert!(tree.check(&doc, outer).is_ok());
        assert_eq!(doc.inner_html(root), "cb");
    }

    #[test]
    fn clear_runs_destructors_depth_first() {
        let mut doc = SimpleDocument::new();
        let root = doc.create_root();
        let mut tree = Tree::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let outer = tree.open(BlockKind::Simple, root, None);
        let inner = tree.open(BlockKind::Simple, root, Some(outer));
        append(&mut doc, &mut tree, inner, "x");
        tree.did_append_block(outer, inner);
        for (block, name) in [(outer, "outer"), (inner, "inner")] {
            let log = log.clone();
            tree.add_destructor(block, Box::new(move || log.borrow_mut().push(name)));
        }

        tree.clear(&mut doc, outer);
        assert_eq!(*log.borrow(), ["inner", "outer"]);
        assert_eq!(doc.inner_html(root), "");
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn remote_blocks_remove_their_own_nodes() {
        let mut doc = SimpleDocument::new();
        let root = doc.create_root();
        let remote = doc.create_element("aside");
        let existing = doc.create_text("keep");
        doc.insert_before(remote, existing, None);
        let mut tree = Tree::new();

        let outer = tree.open(BlockKind::Simple, root, None);
        append(&mut doc, &mut tree, outer, "a");
        let r = tree.open(BlockKind::Remote, remote, Some(outer));
        append(&mut doc, &mut tree, r, "moved");
        tree.did_append_block(outer, r);
        assert_eq!(tree.last_node(outer), tree.first_node(outer));

        tree.clear(&mut doc, outer);
        assert_eq!(doc.inner_html(remote), "keep");
    }

    #[test]
    fn check_detects_detached_bounds() {
        let mut doc = SimpleDocument::new();
        let root = doc.create_root();
        let mut tree = Tree::new();
        let block = tree.open(BlockKind::Simple, root, None);
        let a = append(&mut doc, &mut tree, block, "a");
        doc.remove_child(root, a);
        let err = tree.check(&doc, block).unwrap_err();
        assert_eq!(err.to_string(), "block bounds do not match the document");
    }
}
