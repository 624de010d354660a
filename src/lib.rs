//! A register-based template VM with fine-grained, tag-based revalidation.
//!
//! # Features
//!
//! ### Runtime
//!
//! - Revision clock and tags: every reactive read is recorded, and any
//!   computation can be validated against the revision it last ran at.
//! - Tracked caches and [`Reference`]s that recompute only when something
//!   they read changed.
//! - Reactive [`Cell`][tag::Cell]s as the storage host code mutates.
//!
//! ### Rendering
//!
//! - A register VM that renders compiled programs into any [`Document`][dom::Document]
//!   implementation, with an in-memory [`SimpleDocument`][dom::SimpleDocument]
//!   that serializes to HTML.
//! - Updating opcodes recorded during the initial render, so a rerender only
//!   touches what changed.
//! - Keyed lists, modifiers and components through a single [`Manager`]
//!   capability interface.
//! - Error boundaries that recover from render errors both during the initial
//!   render and on rerender.
//!
//! # Getting started
//!
//! Programs are produced by a template compiler, which is not part of this
//! crate. The [`Assembler`][program::Assembler] writes regions by hand.
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tessera::dom::SimpleDocument;
//! use tessera::program::{Op, Program};
//! use tessera::tag::Cell;
//! use tessera::{render_main, Cursor, Env};
//!
//! // <p>Hello {{this.name}}!</p>
//! let mut program = Program::new();
//! let mut asm = program.assembler()?;
//! asm.root_scope(&[])
//!     .open_element("p")
//!     .op(Op::FlushElement, &[])
//!     .text("Hello ")
//!     .op(Op::GetSelf, &[])
//!     .get_property("name")
//!     .op(Op::AppendText, &[])
//!     .text("!")
//!     .op(Op::CloseElement, &[])
//!     .op(Op::Return, &[]);
//! let main = asm.finish()?;
//!
//! let doc = Rc::new(RefCell::new(SimpleDocument::new()));
//! let root = doc.borrow_mut().create_root();
//! let env = Env::new(doc.clone());
//! let name = Cell::new(env.runtime(), "John");
//! let this = tessera::value! { name: name.clone() };
//!
//! let mut result = render_main(env, Rc::new(program), main, this, Cursor::new(root))?.sync()?;
//! assert_eq!(doc.borrow().inner_html(root), "<p>Hello John!</p>");
//!
//! name.set("Jane");
//! result.rerender()?;
//! assert_eq!(doc.borrow().inner_html(root), "<p>Hello Jane!</p>");
//! # Ok::<(), tessera::Error>(())
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: `debug` at render, rerender and commit
//! boundaries, `trace` for every step of the machine and every evaluated
//! updating opcode. No subscriber is installed.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod macros;

pub mod dom;
mod env;
mod error;
pub mod fmt;
pub mod program;
mod reference;
mod render;
mod span;
pub mod tag;
mod update;
pub mod value;

pub use crate::env::{Args, Destroyable, Env, EnvBuilder, Manager};
pub use crate::error::{Error, ErrorKind, Location, Result};
pub use crate::reference::Reference;
pub use crate::render::{
    render_main, Cursor, RenderResult, Revalidation, Snapshot, TemplateIterator,
};
pub use crate::value::{Func, Object, Value};
