#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use tessera::dom::{NodeId, SimpleDocument};
use tessera::program::{Handle, Program};
use tessera::{render_main, Cursor, Env, RenderResult, Value};

/// A document with a root element to render into.
pub struct Page {
    pub doc: Rc<RefCell<SimpleDocument>>,
    pub root: NodeId,
}

impl Page {
    pub fn new() -> Self {
        let doc = Rc::new(RefCell::new(SimpleDocument::new()));
        let root = doc.borrow_mut().create_root();
        Self { doc, root }
    }

    pub fn env(&self) -> Env {
        Env::builder(self.doc.clone()).debug_checks(true).build()
    }

    pub fn render(
        &self,
        env: Env,
        program: Program,
        main: Handle,
        this: impl Into<Value>,
    ) -> tessera::Result<RenderResult> {
        render_main(env, Rc::new(program), main, this, Cursor::new(self.root))?.sync()
    }

    pub fn html(&self) -> String {
        self.doc.borrow().inner_html(self.root)
    }

    pub fn child_count(&self) -> usize {
        self.doc.borrow().child_nodes(self.root).len()
    }
}
