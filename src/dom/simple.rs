use std::fmt;
use std::io;

use crate::dom::{Document, NodeId};
use crate::fmt::Writer;

/// An in-memory document that serializes to HTML.
///
/// # Examples
///
/// ```
/// use tessera::dom::{Document, SimpleDocument};
///
/// let mut doc = SimpleDocument::new();
/// let root = doc.create_root();
/// let p = doc.create_element("p");
/// let text = doc.create_text("1 < 2");
/// doc.insert_before(root, p, None);
/// doc.insert_before(p, text, None);
/// assert_eq!(doc.inner_html(root), "<p>1 &lt; 2</p>");
/// ```
#[derive(Debug, Default)]
pub struct SimpleDocument {
    nodes: Vec<Node>,
}

#[derive(Debug)]
struct Node {
    data: Data,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
enum Data {
    Fragment,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

impl SimpleDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a parentless container node that serializes as its children.
    pub fn create_root(&mut self) -> NodeId {
        self.alloc(Data::Fragment)
    }

    pub fn child_nodes(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    /// Returns the text of a text or comment node.
    pub fn text(&self, node: NodeId) -> Option<&str> {
        match &self.node(node).data {
            Data::Text(s) | Data::Comment(s) => Some(s),
            _ => None,
        }
    }

    /// Serializes the node and its descendants.
    pub fn to_html(&self, node: NodeId) -> String {
        let mut s = String::new();
        let _ = self.write_node(&mut s, node);
        s
    }

    /// Serializes the descendants of the node.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut s = String::new();
        for child in &self.node(node).children {
            let _ = self.write_node(&mut s, *child);
        }
        s
    }

    /// Serializes the node and its descendants to the writer.
    pub fn write_html<W>(&self, node: NodeId, writer: W) -> io::Result<()>
    where
        W: io::Write,
    {
        let mut w = Writer::new(writer);
        self.write_node(&mut w, node).map_err(|_| {
            w.take_err()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "format error"))
        })
    }

    fn write_node(&self, f: &mut dyn fmt::Write, node: NodeId) -> fmt::Result {
        let n = self.node(node);
        match &n.data {
            Data::Fragment => {
                for child in &n.children {
                    self.write_node(f, *child)?;
                }
            }
            Data::Element { tag, attrs } => {
                write!(f, "<{tag}")?;
                for (name, value) in attrs {
                    write!(f, " {name}=\"")?;
                    escape(f, value, true)?;
                    f.write_char('"')?;
                }
                f.write_char('>')?;
                if VOID_ELEMENTS.contains(&tag.as_str()) && n.children.is_empty() {
                    return Ok(());
                }
                for child in &n.children {
                    self.write_node(f, *child)?;
                }
                write!(f, "</{tag}>")?;
            }
            Data::Text(text) => escape(f, text, false)?,
            Data::Comment(text) => write!(f, "<!--{text}-->")?,
        }
        Ok(())
    }

    fn alloc(&mut self, data: Data) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, node: NodeId) -> &Node {
        &self.nodes[node.index() as usize]
    }

    fn node_mut(&mut self, node: NodeId) -> &mut Node {
        &mut self.nodes[node.index() as usize]
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.node_mut(node).parent.take() {
            self.node_mut(parent).children.retain(|c| *c != node);
        }
    }

    fn sibling(&self, node: NodeId, delta: isize) -> Option<NodeId> {
        let parent = self.node(node).parent?;
        let siblings = &self.node(parent).children;
        let i = siblings.iter().position(|c| *c == node)? as isize + delta;
        usize::try_from(i).ok().and_then(|i| siblings.get(i)).copied()
    }
}

fn escape(f: &mut dyn fmt::Write, s: &str, attr: bool) -> fmt::Result {
    for c in s.chars() {
        match c {
            '&' => f.write_str("&amp;")?,
            '<' if !attr => f.write_str("&lt;")?,
            '>' if !attr => f.write_str("&gt;")?,
            '"' if attr => f.write_str("&quot;")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

impl Document for SimpleDocument {
    fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Data::Element {
            tag: tag.to_owned(),
            attrs: Vec::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(Data::Text(text.to_owned()))
    }

    fn create_comment(&mut self, text: &str) -> NodeId {
        self.alloc(Data::Comment(text.to_owned()))
    }

    fn set_text(&mut self, node: NodeId, text: &str) {
        if let Data::Text(s) | Data::Comment(s) = &mut self.node_mut(node).data {
            s.clear();
            s.push_str(text);
        }
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.node(node).data {
            Data::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        if let Data::Element { attrs, .. } = &mut self.node_mut(node).data {
            match attrs.iter_mut().find(|(n, _)| n == name) {
                Some((_, v)) => *v = value.to_owned(),
                None => attrs.push((name.to_owned(), value.to_owned())),
            }
        }
    }

    fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Data::Element { attrs, .. } = &mut self.node_mut(node).data {
            attrs.retain(|(n, _)| n != name);
        }
    }

    fn insert_before(&mut self, parent: NodeId, node: NodeId, next: Option<NodeId>) {
        self.detach(node);
        let children = &mut self.node_mut(parent).children;
        let at = next
            .and_then(|next| children.iter().position(|c| *c == next))
            .unwrap_or(children.len());
        children.insert(at, node);
        self.node_mut(node).parent = Some(parent);
    }

    fn remove_child(&mut self, parent: NodeId, node: NodeId) {
        if self.node(node).parent == Some(parent) {
            self.detach(node);
        }
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.sibling(node, 1)
    }

    fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).children.first().copied()
    }

    fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).children.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_moves_existing_node() {
        let mut doc = SimpleDocument::new();
        let root = doc.create_root();
        let a = doc.create_text("a");
        let b = doc.create_text("b");
        doc.insert_before(root, a, None);
        doc.insert_before(root, b, None);
        doc.insert_before(root, b, Some(a));
        assert_eq!(doc.inner_html(root), "ba");
        assert_eq!(doc.next_sibling(b), Some(a));
        assert_eq!(doc.next_sibling(a), None);
    }

    #[test]
    fn serializes_attributes_and_void_elements() {
        let mut doc = SimpleDocument::new();
        let root = doc.create_root();
        let img = doc.create_element("img");
        doc.set_attribute(img, "alt", "\"quoted\" & more");
        doc.insert_before(root, img, None);
        let comment = doc.create_comment("");
        doc.insert_before(root, comment, None);
        assert_eq!(
            doc.inner_html(root),
            "<img alt=\"&quot;quoted&quot; &amp; more\"><!---->"
        );
    }

    #[test]
    fn write_html_to_writer() {
        let mut doc = SimpleDocument::new();
        let div = doc.create_element("div");
        let text = doc.create_text("hi");
        doc.insert_before(div, text, None);
        let mut buf = Vec::new();
        doc.write_html(div, &mut buf).unwrap();
        assert_eq!(buf, b"<div>hi</div>");
    }
}
