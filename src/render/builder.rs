use crate::dom::{Document, NodeId};
use crate::fmt::{self, FormatFn};
use crate::render::block::{BlockId, BlockKind, Tree};
use crate::{Error, Result, Value};

/// A position in the document: new nodes are inserted into `element` before
/// `next_sibling`, or at the end if it is `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub element: NodeId,
    pub next_sibling: Option<NodeId>,
}

impl Cursor {
    /// A cursor that appends to the end of the element.
    pub fn new(element: NodeId) -> Self {
        Self {
            element,
            next_sibling: None,
        }
    }

    /// A cursor that inserts before the given child.
    pub fn before(element: NodeId, next_sibling: Option<NodeId>) -> Self {
        Self {
            element,
            next_sibling,
        }
    }
}

/// Appends nodes at a stack of cursors and records what was appended in a
/// stack of open blocks.
#[derive(Debug)]
pub(crate) struct ElementBuilder {
    cursors: Vec<Cursor>,
    blocks: Vec<BlockId>,
    constructing: Option<NodeId>,
    debug_checks: bool,
}

impl ElementBuilder {
    pub fn new(cursor: Cursor, debug_checks: bool) -> Self {
        Self {
            cursors: vec![cursor],
            blocks: Vec::new(),
            constructing: None,
            debug_checks,
        }
    }

    /// A builder that renders into an existing, cleared block.
    pub fn resume(block: BlockId, cursor: Cursor, debug_checks: bool) -> Self {
        Self {
            cursors: vec![cursor],
            blocks: vec![block],
            constructing: None,
            debug_checks,
        }
    }

    pub fn cursor(&self) -> Cursor {
        // The bottom cursor is never popped.
        self.cursors[self.cursors.len() - 1]
    }

    pub fn block(&self) -> Result<BlockId> {
        self.blocks
            .last()
            .copied()
            .ok_or_else(|| Error::program("no block is open"))
    }

    pub fn constructing(&self) -> Option<NodeId> {
        self.constructing
    }

    pub fn depths(&self) -> (usize, usize) {
        (self.cursors.len(), self.blocks.len())
    }

    /// Drops cursors and blocks above the given depths. The dropped blocks
    /// stay in the tree and are expected to be cleared by an ancestor.
    pub fn truncate(&mut self, cursors: usize, blocks: usize) {
        self.cursors.truncate(cursors.max(1));
        self.blocks.truncate(blocks);
        self.constructing = None;
    }

    pub fn open_element(&mut self, doc: &mut dyn Document, tag: &str) -> Result<()> {
        if self.constructing.is_some() {
            return Err(Error::program("an element is already under construction"));
        }
        self.constructing = Some(doc.create_element(tag));
        Ok(())
    }

    /// Inserts the element under construction and makes it the current
    /// cursor.
    pub fn flush_element(&mut self, tree: &mut Tree, doc: &mut dyn Document) -> Result<NodeId> {
        let element = self
            .constructing
            .take()
            .ok_or_else(|| Error::program("no element is under construction"))?;
        self.append_node(tree, doc, element)?;
        self.cursors.push(Cursor::new(element));
        self.push_block(tree, BlockKind::Element)?;
        Ok(element)
    }

    pub fn close_element(&mut self, tree: &mut Tree, doc: &mut dyn Document) -> Result<()> {
        match self.blocks.last() {
            Some(block) if tree.kind(*block) == BlockKind::Element && self.cursors.len() > 1 => {}
            _ => return Err(Error::program("`CloseElement` without an open element")),
        }
        let block = self.pop_block(tree, doc)?;
        if self.debug_checks {
            self.check_closing(tree, doc, block)?;
            let element = self.cursor().element;
            let outer = self.cursors[self.cursors.len() - 2];
            if doc.parent(element) != Some(outer.element)
                || doc.next_sibling(element) != outer.next_sibling
            {
                return Err(Error::program("element is not at the cursor it was opened at"));
            }
        }
        self.cursors.pop();
        Ok(())
    }

    pub fn set_static_attribute(
        &mut self,
        doc: &mut dyn Document,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let element = self.expect_constructing()?;
        doc.set_attribute(element, name, value);
        Ok(())
    }

    /// Sets or removes an attribute of the element under construction.
    pub fn set_attribute(
        &mut self,
        doc: &mut dyn Document,
        name: &str,
        value: Option<&str>,
    ) -> Result<NodeId> {
        let element = self.expect_constructing()?;
        set_attribute(doc, element, name, value);
        Ok(element)
    }

    pub fn append_text(
        &mut self,
        tree: &mut Tree,
        doc: &mut dyn Document,
        text: &str,
    ) -> Result<NodeId> {
        let node = doc.create_text(text);
        self.append_node(tree, doc, node)?;
        Ok(node)
    }

    pub fn append_comment(
        &mut self,
        tree: &mut Tree,
        doc: &mut dyn Document,
        text: &str,
    ) -> Result<NodeId> {
        let node = doc.create_comment(text);
        self.append_node(tree, doc, node)?;
        Ok(node)
    }

    fn append_node(&mut self, tree: &mut Tree, doc: &mut dyn Document, node: NodeId) -> Result<()> {
        let block = self.block()?;
        let Cursor {
            element,
            next_sibling,
        } = self.cursor();
        doc.insert_before(element, node, next_sibling);
        tree.did_append_node(block, node);
        Ok(())
    }

    /// Opens a block at the current cursor, owned by the current block.
    pub fn push_block(&mut self, tree: &mut Tree, kind: BlockKind) -> Result<BlockId> {
        let owner = self.blocks.last().copied();
        let block = tree.open(kind, self.cursor().element, owner);
        self.blocks.push(block);
        Ok(block)
    }

    /// Closes the current block.
    ///
    /// An empty block receives a comment so that it always has bounds.
    pub fn pop_block(&mut self, tree: &mut Tree, doc: &mut dyn Document) -> Result<BlockId> {
        let block = self.block()?;
        let kind = tree.kind(block);
        if kind == BlockKind::Simple && tree.is_empty(block) {
            self.append_comment(tree, doc, "")?;
        }
        if self.debug_checks && matches!(kind, BlockKind::Simple | BlockKind::List) {
            tree.check(doc, block)?;
        }
        self.blocks.pop();
        if let Some(owner) = self.blocks.last() {
            tree.did_append_block(*owner, block);
        }
        Ok(block)
    }

    pub fn push_block_list(&mut self, tree: &mut Tree) -> Result<BlockId> {
        self.push_block(tree, BlockKind::List)
    }

    /// Appends into a node outside of the current tree until
    /// [`pop_remote_element`][Self::pop_remote_element]. Existing content of
    /// the node is left alone.
    pub fn push_remote_element(&mut self, tree: &mut Tree, element: NodeId) -> Result<BlockId> {
        self.cursors.push(Cursor::new(element));
        self.push_block(tree, BlockKind::Remote)
    }

    pub fn pop_remote_element(&mut self, tree: &mut Tree, doc: &mut dyn Document) -> Result<()> {
        match self.blocks.last() {
            Some(block) if tree.kind(*block) == BlockKind::Remote && self.cursors.len() > 1 => {}
            _ => return Err(Error::program("`PopRemoteElement` without a remote element")),
        }
        let block = self.pop_block(tree, doc)?;
        if self.debug_checks {
            self.check_closing(tree, doc, block)?;
        }
        self.cursors.pop();
        Ok(())
    }

    /// Checks that the nodes of a just closed element or remote block end
    /// at the current cursor.
    fn check_closing(&self, tree: &Tree, doc: &dyn Document, block: BlockId) -> Result<()> {
        let Cursor {
            element,
            next_sibling,
        } = self.cursor();
        let ok = match (tree.first_node(block), tree.last_node(block)) {
            (Some(first), Some(last)) => {
                doc.parent(first) == Some(element)
                    && doc.parent(last) == Some(element)
                    && doc.next_sibling(last) == next_sibling
            }
            (None, None) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::program("block bounds do not match the cursor"))
        }
    }

    fn expect_constructing(&self) -> Result<NodeId> {
        self.constructing
            .ok_or_else(|| Error::program("no element is under construction"))
    }
}

pub(crate) fn set_attribute(
    doc: &mut dyn Document,
    element: NodeId,
    name: &str,
    value: Option<&str>,
) {
    match value {
        Some(value) => doc.set_attribute(element, name, value),
        None => doc.remove_attribute(element, name),
    }
}

/// Formats a value for an attribute: `None` and `false` remove the attribute
/// and `true` sets it to the empty string.
pub(crate) fn attribute_text(formatter: &FormatFn, value: &Value) -> Result<Option<String>> {
    match value.resolve() {
        Value::None | Value::Bool(false) => Ok(None),
        Value::Bool(true) => Ok(Some(String::new())),
        value => fmt::to_text(formatter, &value).map(Some),
    }
}
