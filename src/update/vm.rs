use std::rc::Rc;

use tracing::{debug, trace};

use crate::env::{Env, Scheduled};
use crate::program::Program;
use crate::render::{self, BlockId, Cursor, Vm};
use crate::update::{list, BoundaryOp, ListBlockOp, ListId, TryOp, UpdatingOp};
use crate::{Error, Result, Value};

/// What the enclosing region should do after one of its lists ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    /// A branch condition flipped, the region must render again.
    Reset,
}

/// Replays updating opcodes against the current revision.
pub(crate) struct UpdatingVm {
    program: Rc<Program>,
    pub visited: usize,
    pub evaluated: usize,
}

impl UpdatingVm {
    pub fn new(program: Rc<Program>) -> Self {
        Self {
            program,
            visited: 0,
            evaluated: 0,
        }
    }

    /// Walks the list in document order, evaluating every opcode whose tag
    /// changed since its snapshot.
    ///
    /// The snapshot is the revision before the evaluation, so a change made
    /// while evaluating, such as a retry requested by an error handler, is
    /// seen by the next pass.
    pub fn execute(&mut self, env: &mut Env, list: ListId) -> Result<Flow> {
        let mut cursor = env.updates.head(list);
        while let Some(id) = cursor {
            self.visited += 1;
            let valid = match env.updates.get(id) {
                Some(op) => env.rt.validate(op.tag(), op.snapshot()),
                None => return Err(Error::program("updating opcode is already being evaluated")),
            };
            if !valid {
                let mut op = env
                    .updates
                    .take(id)
                    .ok_or_else(|| Error::program("updating opcode is already being evaluated"))?;
                self.evaluated += 1;
                trace!(op = op.name(), "evaluating");
                let snapshot = env.rt.now();
                let result = self.evaluate(env, &mut op);
                if result.is_ok() {
                    op.set_snapshot(snapshot);
                }
                env.updates.put(id, op);
                if result? == Flow::Reset {
                    return Ok(Flow::Reset);
                }
            }
            cursor = env.updates.next(id);
        }
        Ok(Flow::Continue)
    }

    fn evaluate(&mut self, env: &mut Env, op: &mut UpdatingOp) -> Result<Flow> {
        match op {
            UpdatingOp::Text(op) => {
                let text = render::text_value(op.reference.value()?);
                if text != op.last {
                    env.document.borrow_mut().set_text(op.node, &text);
                    op.last = text;
                }
            }

            UpdatingOp::Attribute(op) => {
                let value = render::attribute_value(op.reference.value()?);
                if value != op.last {
                    render::set_attribute(
                        &mut *env.document.borrow_mut(),
                        op.element,
                        &op.name,
                        value.as_deref(),
                    );
                    op.last = value;
                }
            }

            UpdatingOp::Assert(op) => {
                if op.reference.value()?.truthy() != op.last {
                    return Ok(Flow::Reset);
                }
            }

            UpdatingOp::Try(region) => self.region(env, region)?,

            UpdatingOp::ListItem(item) => self.region(env, &item.region)?,

            UpdatingOp::Boundary(boundary) => self.boundary(env, boundary)?,

            UpdatingOp::ListBlock(list) => self.list(env, list)?,

            UpdatingOp::UpdateModifier(op) | UpdatingOp::UpdateComponent(op) => {
                env.schedule(Scheduled::Update(op.manager.clone(), op.state.clone()));
            }
        }
        Ok(Flow::Continue)
    }

    fn region(&mut self, env: &mut Env, region: &TryOp) -> Result<()> {
        match self.execute(env, region.children)? {
            Flow::Continue => Ok(()),
            Flow::Reset => self.reset(env, region, None),
        }
    }

    /// Clears the region and renders it again from its resumable state.
    fn reset(&mut self, env: &mut Env, region: &TryOp, boundary: Option<&BoundaryOp>) -> Result<()> {
        trace!(kind = ?region.kind, "resetting region");
        env.updates.clear_list(region.children);
        let cursor = clear_block(env, region.block);
        let mut vm = Vm::resume(env, self.program.clone(), region, cursor, boundary);
        vm.execute(env)
    }

    /// Errors raised below a boundary are handled here. A boundary that is
    /// reset renders through a machine that handles its own errors, so what
    /// escapes from it belongs to the next boundary out.
    fn boundary(&mut self, env: &mut Env, op: &BoundaryOp) -> Result<()> {
        let frames = env.rt.frame_depth();
        let flow = if env.rt.validate(op.retry, op.region.snapshot) {
            match self.execute(env, op.region.children) {
                Ok(flow) => flow,
                Err(err) if !err.is_fatal() => return self.recover(env, op, frames, err),
                Err(err) => return Err(err),
            }
        } else {
            debug!("retrying error boundary");
            Flow::Reset
        };
        match flow {
            Flow::Continue => Ok(()),
            Flow::Reset => self.reset(env, &op.region, Some(op)),
        }
    }

    fn recover(&mut self, env: &mut Env, op: &BoundaryOp, frames: usize, err: Error) -> Result<()> {
        trace!(error = %err, "recovering at error boundary");
        env.rt.reset_frames(frames);
        env.updates.clear_list(op.region.children);
        let cursor = clear_block(env, op.region.block);
        {
            let doc = env.document.clone();
            let mut doc = doc.borrow_mut();
            let placeholder = doc.create_comment("");
            doc.insert_before(cursor.element, placeholder, cursor.next_sibling);
            env.tree.did_append_node(op.region.block, placeholder);
        }
        env.rt.update(op.region.tag, op.retry);
        let args = [
            Value::String(err.message().to_owned()),
            Value::Func(op.retry_fn.clone()),
        ];
        env.rt.untrack(|| op.handler.call(&args)).map(drop)
    }

    fn list(&mut self, env: &mut Env, op: &mut ListBlockOp) -> Result<()> {
        if !env.rt.validate(op.iterable.tag(), op.iterated) {
            list::reconcile(env, &self.program, op)?;
            op.iterated = env.rt.now();
        }
        self.execute(env, op.items)?;

        let mut tags = vec![op.iterable.tag()];
        tags.extend(
            env.updates
                .ids(op.items)
                .into_iter()
                .filter_map(|id| env.updates.get(id).map(UpdatingOp::tag)),
        );
        env.rt.update_with(op.tag, &tags);
        Ok(())
    }
}

/// Clears the block and returns a cursor at the position it occupied.
fn clear_block(env: &mut Env, block: BlockId) -> Cursor {
    let doc = env.document.clone();
    let next = env.tree.clear(&mut *doc.borrow_mut(), block);
    Cursor::before(env.tree.parent(block), next)
}
