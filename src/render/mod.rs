//! Rendering entry points.
//!
//! [`render_main`] performs the initial render of a template and returns a
//! [`TemplateIterator`] that can be driven one opcode at a time or run to
//! completion with [`sync`][TemplateIterator::sync]. The resulting
//! [`RenderResult`] keeps the updating opcodes recorded during the render
//! and revalidates the document with [`rerender`][RenderResult::rerender].

mod block;
mod builder;
mod core;
mod stack;
mod unwind;

use std::fmt;
use std::rc::Rc;

use tracing::{debug, instrument};

pub use crate::render::builder::Cursor;

pub(crate) use crate::render::block::{BlockId, BlockKind, Tree};
pub(crate) use crate::render::builder::{attribute_text, set_attribute};
pub(crate) use crate::render::core::{attribute_value, text_value, Vm};
pub(crate) use crate::render::stack::{ResumableState, Scope};

use crate::program::{Handle, Program};
use crate::update::{ListId, UpdatingVm};
use crate::{Env, Error, Reference, Result, Value};

/// Renders the template with the given handle into the cursor.
///
/// `self_value` becomes `this` of the template. A transaction is opened on
/// the environment and committed by [`TemplateIterator::sync`].
///
/// # Examples
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use tessera::dom::SimpleDocument;
/// use tessera::program::{Op, Program};
/// use tessera::{render_main, Cursor, Env};
///
/// let mut program = Program::new();
/// let mut asm = program.assembler()?;
/// asm.root_scope(&[])
///     .open_element("p")
///     .op(Op::FlushElement, &[])
///     .text("hello")
///     .op(Op::CloseElement, &[])
///     .op(Op::Return, &[]);
/// let handle = asm.finish()?;
///
/// let doc = Rc::new(RefCell::new(SimpleDocument::new()));
/// let root = doc.borrow_mut().create_root();
/// let env = Env::new(doc.clone());
/// let _result = render_main(env, Rc::new(program), handle, (), Cursor::new(root))?.sync()?;
/// assert_eq!(doc.borrow().inner_html(root), "<p>hello</p>");
/// # Ok::<(), tessera::Error>(())
/// ```
#[instrument(skip_all, fields(handle = handle.index()))]
pub fn render_main(
    mut env: Env,
    program: Rc<Program>,
    handle: Handle,
    self_value: impl Into<Value>,
    cursor: Cursor,
) -> Result<TemplateIterator> {
    let address = program.heap().address(handle)?;
    env.begin()?;
    debug!("starting render");
    let root_list = env.updates.new_list();
    let this = Reference::constant(self_value);
    let (vm, root_block) = match Vm::main(&mut env, program.clone(), address, this, cursor, root_list)
    {
        Ok(started) => started,
        Err(err) => {
            env.abort();
            return Err(err);
        }
    };
    Ok(TemplateIterator {
        env,
        vm,
        program,
        root_list,
        root_block,
        done: false,
    })
}

/// An initial render in progress.
///
/// Dropping the iterator abandons the render.
#[must_use = "must call `.sync()` or drive the iterator to render"]
pub struct TemplateIterator {
    env: Env,
    vm: Vm,
    program: Rc<Program>,
    root_list: ListId,
    root_block: BlockId,
    done: bool,
}

/// The outcome of a finished initial render.
pub struct RenderResult {
    env: Env,
    program: Rc<Program>,
    root_list: ListId,
    root_block: BlockId,
}

/// Counters of one [`rerender`][RenderResult::rerender] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revalidation {
    /// Updating opcodes whose tag was checked.
    pub visited: usize,
    /// Updating opcodes whose tag was stale and that were evaluated.
    pub evaluated: usize,
}

/// A read-only view of the machine state, for debugging.
///
/// Registers holding stack values are described as strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Snapshot {
    pub pc: isize,
    pub ra: isize,
    pub fp: isize,
    pub sp: isize,
    pub s0: String,
    pub s1: String,
    pub t0: String,
    pub t1: String,
    pub v0: String,
    pub stack: Vec<String>,
    /// The number of open scopes.
    pub scopes: usize,
    /// The number of open blocks.
    pub blocks: usize,
    pub cursors: usize,
    /// The length of the unwind chain.
    pub unwind: usize,
}

impl TemplateIterator {
    /// Executes one opcode and returns whether the render is complete.
    ///
    /// After an error the render is abandoned and every further call
    /// returns `Ok(true)`.
    pub fn step(&mut self) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        let result = self.vm.step(&mut self.env).and_then(|()| {
            if self.vm.halted() {
                self.vm.finish(&mut self.env)?;
                self.done = true;
            }
            Ok(self.done)
        });
        result.map_err(|err| {
            self.done = true;
            self.env.abort();
            self.program.annotate(err)
        })
    }

    /// Runs the render to completion and commits the transaction.
    #[instrument(skip_all)]
    pub fn sync(mut self) -> Result<RenderResult> {
        while !self.step()? {}
        if !self.env.in_transaction() {
            return Err(Error::transaction("render was abandoned"));
        }
        self.env.commit()?;
        debug!(ops = self.env.updates.len(), blocks = self.env.tree.len(), "render complete");
        Ok(RenderResult {
            env: self.env,
            program: self.program,
            root_list: self.root_list,
            root_block: self.root_block,
        })
    }

    /// Returns a snapshot of the machine state.
    pub fn snapshot(&self) -> Snapshot {
        self.vm.snapshot()
    }

    pub fn env(&self) -> &Env {
        &self.env
    }
}

impl fmt::Debug for TemplateIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateIterator")
            .field("snapshot", &self.vm.snapshot())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl Iterator for TemplateIterator {
    type Item = Result<()>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        Some(self.step().map(drop))
    }
}

impl fmt::Debug for RenderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderResult")
            .field("env", &self.env)
            .field("root_block", &self.root_block)
            .finish_non_exhaustive()
    }
}

impl RenderResult {
    /// Revalidates the document against the current revision.
    ///
    /// Opcodes whose tag is unchanged are skipped, so a pass over an
    /// unchanged tree only compares revisions.
    #[instrument(skip_all)]
    pub fn rerender(&mut self) -> Result<Revalidation> {
        self.env.begin()?;
        let mut vm = UpdatingVm::new(self.program.clone());
        if let Err(err) = vm.execute(&mut self.env, self.root_list) {
            self.env.abort();
            return Err(self.program.annotate(err));
        }
        self.env.commit()?;
        debug!(visited = vm.visited, evaluated = vm.evaluated, "rerender complete");
        Ok(Revalidation {
            visited: vm.visited,
            evaluated: vm.evaluated,
        })
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Returns the environment, e.g. to open a transaction around host
    /// mutations.
    pub fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    /// Tears down everything that was rendered, running destructors, and
    /// returns the environment.
    pub fn destroy(mut self) -> Env {
        self.env.updates.clear_list(self.root_list);
        let doc = self.env.document.clone();
        self.env.tree.remove(&mut *doc.borrow_mut(), self.root_block);
        debug!("render destroyed");
        self.env
    }
}
