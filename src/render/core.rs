use std::any::Any;
use std::mem;
use std::rc::Rc;

use tracing::trace;

use crate::env::{Args, Env, Manager, Scheduled};
use crate::fmt;
use crate::program::{Handle, Op, Opcode, Program, Register};
use crate::render::block::{BlockId, BlockKind};
use crate::render::builder::{self, Cursor, ElementBuilder};
use crate::render::stack::{ComponentInstance, ResumableState, Scope, Stack, StackValue};
use crate::render::unwind::{Depths, Handler, Target, UnwindTargets};
use crate::render::Snapshot;
use crate::tag::{Cell, Tag};
use crate::update::{
    self, AssertOp, AttributeOp, BoundaryOp, ListBlockOp, ListId, ListItemOp, ManagerOp, OpId,
    RegionKind, TextOp, TryOp, UpdatingOp,
};
use crate::{Error, Func, Location, Reference, Result, Value};

/// The register machine that renders a program and records updating
/// opcodes along the way.
///
/// `$pc`, `$ra` and `$fp` hold heap addresses and stack indices, `-1` being
/// the null value. Returning to a null `$ra` halts the machine, which is how
/// resumed regions stop once their `Exit` has run.
pub(crate) struct Vm {
    program: Rc<Program>,
    pc: isize,
    ra: isize,
    fp: isize,
    s0: StackValue,
    s1: StackValue,
    t0: StackValue,
    t1: StackValue,
    v0: StackValue,
    stack: Stack,
    scopes: Vec<Scope>,
    builder: ElementBuilder,
    /// The updating lists that new opcodes are appended to.
    updating: Vec<ListId>,
    targets: UnwindTargets,
    lists: Vec<ListState>,
    /// Modifiers created for the element under construction.
    modifiers: Vec<(Rc<dyn Manager>, Rc<dyn Any>)>,
    calls: usize,
    base_frames: usize,
}

/// The iteration state of an open list.
struct ListState {
    items: Vec<Value>,
    keys: Vec<String>,
    next: usize,
}

/// The per-item state of a list item region.
struct Item {
    key: String,
    value: Cell,
    index: Cell,
}

impl Vm {
    fn new(
        program: Rc<Program>,
        env: &Env,
        pc: isize,
        stack: Stack,
        scopes: Vec<Scope>,
        builder: ElementBuilder,
        updating: Vec<ListId>,
    ) -> Self {
        Self {
            program,
            pc,
            ra: -1,
            fp: -1,
            s0: StackValue::Empty,
            s1: StackValue::Empty,
            t0: StackValue::Empty,
            t1: StackValue::Empty,
            v0: StackValue::Empty,
            stack,
            scopes,
            builder,
            updating,
            targets: UnwindTargets::default(),
            lists: Vec::new(),
            modifiers: Vec::new(),
            calls: 0,
            base_frames: env.rt.frame_depth(),
        }
    }

    /// A machine for the initial render of a template. The root region is
    /// entered right away with `this` as its only captured value.
    pub fn main(
        env: &mut Env,
        program: Rc<Program>,
        address: usize,
        this: Reference,
        cursor: Cursor,
        root_list: ListId,
    ) -> Result<(Self, BlockId)> {
        let stack = Stack::new(vec![StackValue::Ref(this)]);
        let builder = ElementBuilder::new(cursor, env.debug_checks);
        let mut vm = Self::new(
            program,
            env,
            address as isize,
            stack,
            Vec::new(),
            builder,
            vec![root_list],
        );
        vm.enter(env, RegionKind::Root, 1, None)?;
        let block = vm.builder.block()?;
        Ok((vm, block))
    }

    /// A machine that renders a cleared region again from its resumable
    /// state.
    ///
    /// The region's opcode, block and child list are reused, so nothing is
    /// appended to the parent list.
    pub fn resume(
        env: &Env,
        program: Rc<Program>,
        region: &TryOp,
        cursor: Cursor,
        boundary: Option<&BoundaryOp>,
    ) -> Self {
        let ResumableState { pc, scope, stack } = region.state.clone();
        let scopes = match region.kind {
            RegionKind::Root => Vec::new(),
            _ => vec![scope],
        };
        let builder = ElementBuilder::resume(region.block, cursor, env.debug_checks);
        let mut vm = Self::new(program, env, pc, Stack::new(stack), scopes, builder, Vec::new());
        let handler = boundary.map(|b| Handler {
            func: b.handler.clone(),
            retry: b.retry,
            retry_fn: b.retry_fn.clone(),
        });
        let catch_pc = boundary.map_or(-1, |b| b.catch_pc);
        vm.open_target(
            env,
            region.kind,
            region.tag,
            region.block,
            region.children,
            handler,
            catch_pc,
        );
        vm
    }

    /// A machine that renders one new item of a list at the cursor.
    pub fn item(env: &Env, program: Rc<Program>, list: &ListBlockOp, cursor: Cursor) -> Self {
        let builder = ElementBuilder::resume(list.block, cursor, env.debug_checks);
        Self::new(
            program,
            env,
            list.state.pc,
            Stack::default(),
            vec![list.state.scope.clone()],
            builder,
            vec![list.items],
        )
    }

    pub fn halted(&self) -> bool {
        self.pc == -1
    }

    /// Runs until the machine halts.
    pub fn execute(&mut self, env: &mut Env) -> Result<()> {
        while !self.halted() {
            self.step(env)?;
        }
        self.finish(env)
    }

    /// Executes one opcode.
    ///
    /// Errors are handed to the unwind chain first and only returned when
    /// nothing handled them.
    pub fn step(&mut self, env: &mut Env) -> Result<()> {
        let start = self.pc;
        let opcode = match self.decode(start) {
            Ok(opcode) => opcode,
            Err(err) => {
                let err = self.locate(err, start);
                return self.unwind(env, err);
            }
        };
        trace!(pc = start, op = opcode.op.name(), "step");
        self.pc = start + opcode.size as isize;
        match self.dispatch(env, start, &opcode) {
            Ok(()) => Ok(()),
            Err(err) => {
                let err = self.locate(err, start);
                self.unwind(env, err)
            }
        }
    }

    /// Closes the root region after the machine halted and checks that
    /// every other region was closed.
    pub fn finish(&mut self, env: &mut Env) -> Result<()> {
        let root_open = matches!(self.targets.last(), Some(t) if t.kind == RegionKind::Root);
        let mut result = if root_open {
            self.close_region(env, &[RegionKind::Root], "Return")
                .map(drop)
        } else {
            Ok(())
        };
        if result.is_ok() && self.targets.len() > 0 {
            result = Err(Error::program(format!(
                "{} regions were left open",
                self.targets.len()
            )));
        }
        if result.is_err() {
            env.rt.reset_frames(self.base_frames);
        }
        result
    }

    pub fn snapshot(&self) -> Snapshot {
        let (cursors, blocks) = self.builder.depths();
        Snapshot {
            pc: self.pc,
            ra: self.ra,
            fp: self.fp,
            sp: self.stack.sp(),
            s0: self.s0.describe(),
            s1: self.s1.describe(),
            t0: self.t0.describe(),
            t1: self.t1.describe(),
            v0: self.v0.describe(),
            stack: self.stack.iter().map(StackValue::describe).collect(),
            scopes: self.scopes.len(),
            blocks,
            cursors,
            unwind: self.targets.len(),
        }
    }

    fn decode(&self, pc: isize) -> Result<Opcode> {
        let address = usize::try_from(pc)
            .map_err(|_| Error::program(format!("address {pc} is out of bounds")))?;
        self.program.heap.decode(address)
    }

    fn locate(&self, err: Error, pc: isize) -> Error {
        let found = usize::try_from(pc)
            .ok()
            .and_then(|address| self.program.heap.locate(address));
        match found {
            Some((handle, offset)) => err.at(Location { handle, offset }),
            None => err,
        }
    }

    fn dispatch(&mut self, env: &mut Env, start: isize, opcode: &Opcode) -> Result<()> {
        match opcode.op {
            Op::PushFrame => {
                if self.calls >= env.max_frame_depth {
                    return Err(Error::program(format!(
                        "maximum frame depth of {} exceeded",
                        env.max_frame_depth
                    )));
                }
                self.calls += 1;
                self.stack.push(StackValue::Int(self.ra));
                self.stack.push(StackValue::Int(self.fp));
                self.fp = self.stack.sp() - 1;
            }

            Op::PopFrame => {
                let fp = self.fp;
                let ra = self.stack.get(fp)?.clone().into_int()?;
                let saved = self.stack.get(fp + 1)?.clone().into_int()?;
                self.stack.truncate(fp as usize);
                self.ra = ra;
                self.fp = saved;
                self.calls = self.calls.saturating_sub(1);
            }

            Op::InvokeStatic => {
                let address = self.address(Handle::new(opcode.op1()))?;
                self.ra = self.pc;
                self.pc = address;
            }

            Op::InvokeVirtual => {
                let handle = self.stack.pop()?.into_handle()?;
                let address = self.address(handle)?;
                self.ra = self.pc;
                self.pc = address;
            }

            Op::Jump => self.pc = start + opcode.offset(0),

            Op::Return => self.pc = self.ra,

            Op::ReturnTo => self.ra = start + opcode.offset(0),

            Op::Primitive => {
                let value = Value::from(self.program.constants.primitive(opcode.op1())?.clone());
                self.stack.push(StackValue::Ref(Reference::constant(value)));
            }

            Op::PushHandle => {
                self.stack
                    .push(StackValue::Handle(Handle::new(opcode.op1())));
            }

            Op::Pop => {
                let n = opcode.op1() as usize;
                let len = self
                    .stack
                    .len()
                    .checked_sub(n)
                    .ok_or_else(|| Error::program("operand stack underflow"))?;
                self.stack.truncate(len);
            }

            Op::Dup => self.stack.dup(opcode.op1() as usize)?,

            Op::Load => {
                let register = register(opcode.op1())?;
                if matches!(register, Register::Pc | Register::Sp) {
                    return Err(Error::program(format!(
                        "register `${}` cannot be loaded",
                        register.name()
                    )));
                }
                let value = self.stack.pop()?;
                match register {
                    Register::Ra => self.ra = value.into_int()?,
                    Register::Fp => self.fp = value.into_int()?,
                    Register::S0 => self.s0 = value,
                    Register::S1 => self.s1 = value,
                    Register::T0 => self.t0 = value,
                    Register::T1 => self.t1 = value,
                    Register::V0 => self.v0 = value,
                    Register::Pc | Register::Sp => {}
                }
            }

            Op::Fetch => {
                let value = match register(opcode.op1())? {
                    Register::Ra => StackValue::Int(self.ra),
                    Register::Fp => StackValue::Int(self.fp),
                    Register::S0 => self.s0.clone(),
                    Register::S1 => self.s1.clone(),
                    Register::T0 => self.t0.clone(),
                    Register::T1 => self.t1.clone(),
                    Register::V0 => self.v0.clone(),
                    r @ (Register::Pc | Register::Sp) => {
                        return Err(Error::program(format!(
                            "register `${}` cannot be fetched",
                            r.name()
                        )));
                    }
                };
                self.stack.push(value);
            }

            Op::RootScope => {
                let size = self.program.constants.symbols(opcode.op1())?.len();
                let this = self.stack.pop_ref()?;
                self.scopes.push(Scope::root(this, size));
            }

            Op::ChildScope => {
                let scope = self.scope()?.clone();
                self.scopes.push(scope);
            }

            Op::PopScope => {
                self.scopes
                    .pop()
                    .ok_or_else(|| Error::program("`PopScope` without a scope"))?;
            }

            Op::GetSelf => {
                let this = self.scope()?.get(0)?;
                self.stack.push(StackValue::Ref(this));
            }

            Op::GetVariable => {
                let r = self.scope()?.get(opcode.op1())?;
                self.stack.push(StackValue::Ref(r));
            }

            Op::SetVariable => {
                let r = self.stack.pop_ref()?;
                self.scope_mut()?.set(opcode.op1(), r);
            }

            Op::GetProperty => {
                let key = self.program.constants.string(opcode.op1())?;
                let r = self.stack.pop_ref()?;
                self.stack.push(StackValue::Ref(r.property(&env.rt, key)));
            }

            Op::JumpIf | Op::JumpUnless => {
                let r = self.stack.pop_ref()?;
                let truthy = self.assert(env, r)?;
                if truthy == (opcode.op == Op::JumpIf) {
                    self.pc = start + opcode.offset(0);
                }
            }

            Op::Enter => {
                self.enter(env, RegionKind::Try, opcode.op1() as usize, None)?;
            }

            Op::Exit => {
                self.close_region(env, &[RegionKind::Try, RegionKind::Item], "Exit")?;
            }

            Op::EnterList => {
                let key = self.program.constants.string(opcode.op1())?.to_owned();
                let iterable = self.stack.pop_ref()?;
                self.enter_list(env, key, iterable, start + opcode.offset(1))?;
            }

            Op::Iterate => {
                let list = self
                    .lists
                    .last_mut()
                    .ok_or_else(|| Error::program("`Iterate` outside of a list"))?;
                if list.next < list.items.len() {
                    let i = list.next;
                    list.next += 1;
                    let key = list.keys[i].clone();
                    let value = list.items[i].clone();
                    self.enter_item(env, key, value, i)?;
                } else {
                    self.pc = start + opcode.offset(0);
                }
            }

            Op::ExitList => {
                if !matches!(self.targets.last(), Some(t) if t.kind == RegionKind::List) {
                    return Err(Error::program("unbalanced `ExitList`"));
                }
                let doc = env.document.clone();
                self.builder
                    .append_comment(&mut env.tree, &mut *doc.borrow_mut(), "")?;
                self.close_region(env, &[RegionKind::List], "ExitList")?;
                self.lists.pop();
            }

            Op::Text => {
                let text = self.program.constants.string(opcode.op1())?;
                let doc = env.document.clone();
                self.builder
                    .append_text(&mut env.tree, &mut *doc.borrow_mut(), text)?;
            }

            Op::Comment => {
                let text = self.program.constants.string(opcode.op1())?;
                let doc = env.document.clone();
                self.builder
                    .append_comment(&mut env.tree, &mut *doc.borrow_mut(), text)?;
            }

            Op::AppendText => {
                let r = self.stack.pop_ref()?;
                let derived = text_ref(env, r);
                let text = text_value(derived.value()?);
                let doc = env.document.clone();
                let node = self
                    .builder
                    .append_text(&mut env.tree, &mut *doc.borrow_mut(), &text)?;
                if !derived.is_const() {
                    let op = UpdatingOp::Text(TextOp {
                        node,
                        tag: derived.tag(),
                        reference: derived,
                        last: text,
                        snapshot: env.rt.now(),
                    });
                    self.append(env, op)?;
                }
            }

            Op::OpenElement => {
                let tag = self.program.constants.string(opcode.op1())?;
                let doc = env.document.clone();
                self.builder.open_element(&mut *doc.borrow_mut(), tag)?;
            }

            Op::FlushElement => {
                let doc = env.document.clone();
                self.builder
                    .flush_element(&mut env.tree, &mut *doc.borrow_mut())?;
                let block = self.builder.block()?;
                for (manager, state) in mem::take(&mut self.modifiers) {
                    if let Some(destroy) = manager.get_destroyable(&state) {
                        env.tree.add_destructor(block, destroy);
                    }
                    self.manage(env, manager, state, UpdatingOp::UpdateModifier)?;
                }
            }

            Op::CloseElement => {
                let doc = env.document.clone();
                self.builder
                    .close_element(&mut env.tree, &mut *doc.borrow_mut())?;
            }

            Op::StaticAttr => {
                let name = self.program.constants.string(opcode.op1())?;
                let value = self.program.constants.string(opcode.op2())?;
                let doc = env.document.clone();
                self.builder
                    .set_static_attribute(&mut *doc.borrow_mut(), name, value)?;
            }

            Op::DynamicAttr => {
                let name = self.program.constants.string(opcode.op1())?.to_owned();
                let r = self.stack.pop_ref()?;
                let derived = attribute_ref(env, r);
                let last = attribute_value(derived.value()?);
                let doc = env.document.clone();
                let element =
                    self.builder
                        .set_attribute(&mut *doc.borrow_mut(), &name, last.as_deref())?;
                if !derived.is_const() {
                    let op = UpdatingOp::Attribute(AttributeOp {
                        element,
                        name,
                        tag: derived.tag(),
                        reference: derived,
                        last,
                        snapshot: env.rt.now(),
                    });
                    self.append(env, op)?;
                }
            }

            Op::PushRemoteElement => {
                let node = match self.stack.pop_ref()?.value()?.resolve() {
                    Value::Node(node) => node,
                    value => {
                        return Err(Error::render(format!(
                            "expected a node, but expression evaluated to {}",
                            value.human()
                        )));
                    }
                };
                self.builder.push_remote_element(&mut env.tree, node)?;
            }

            Op::PopRemoteElement => {
                let doc = env.document.clone();
                self.builder
                    .pop_remote_element(&mut env.tree, &mut *doc.borrow_mut())?;
            }

            Op::Helper => {
                let name = self.program.constants.string(opcode.op1())?;
                let helper = env.definitions.helper(name)?.clone();
                let args = self.stack.pop_refs(opcode.op2() as usize)?;
                let r = Reference::computed(&env.rt, move || {
                    let values = args.iter().map(Reference::value).collect::<Result<Vec<_>>>()?;
                    helper.call(&values)
                });
                self.stack.push(StackValue::Ref(r));
            }

            Op::Modifier => {
                let name = self.program.constants.string(opcode.op1())?;
                let manager = env.definitions.modifier(name)?.clone();
                let positional = self.stack.pop_refs(opcode.op2() as usize)?;
                let element = self.builder.constructing().ok_or_else(|| {
                    Error::program("`Modifier` without an element under construction")
                })?;
                let args = Args {
                    element: Some(element),
                    positional,
                };
                let state = env.rt.untrack(|| manager.create(&env.owner, &args))?;
                self.modifiers.push((manager, state));
            }

            Op::CreateComponent => {
                let name = self.program.constants.string(opcode.op1())?;
                let definition = env.definitions.component(name)?.clone();
                let positional = self.stack.pop_refs(opcode.op2() as usize)?;
                let args = Args {
                    element: None,
                    positional,
                };
                let state = env
                    .rt
                    .untrack(|| definition.manager.create(&env.owner, &args))?;
                self.s0 = StackValue::Component(Rc::new(ComponentInstance {
                    manager: definition.manager,
                    state,
                    layout: definition.layout,
                    args: args.positional,
                }));
            }

            Op::InvokeLayout => {
                let component = self.s0.as_component()?.clone();
                let address = self.address(component.layout)?;
                let this = env
                    .rt
                    .untrack(|| component.manager.get_self(&component.state));
                let mut scope = Scope::root(Reference::constant(this), component.args.len() + 1);
                for (slot, arg) in (1..).zip(&component.args) {
                    scope.set(slot, arg.clone());
                }
                self.builder.push_block(&mut env.tree, BlockKind::Simple)?;
                self.scopes.push(scope);
                self.ra = self.pc;
                self.pc = address;
            }

            Op::DidRenderLayout => {
                let component = self.s0.as_component()?.clone();
                self.scopes
                    .pop()
                    .ok_or_else(|| Error::program("`DidRenderLayout` without a scope"))?;
                let doc = env.document.clone();
                let block = self
                    .builder
                    .pop_block(&mut env.tree, &mut *doc.borrow_mut())?;
                let ComponentInstance { manager, state, .. } = &*component;
                if let Some(destroy) = manager.get_destroyable(state) {
                    env.tree.add_destructor(block, destroy);
                }
                self.manage(env, manager.clone(), state.clone(), UpdatingOp::UpdateComponent)?;
            }

            Op::PushUnwind => {
                let func = match self.stack.pop_ref()?.value()?.resolve() {
                    Value::Func(func) => func,
                    value => {
                        return Err(Error::render(format!(
                            "expected an error handler, but expression evaluated to {}",
                            value.human()
                        )));
                    }
                };
                self.push_unwind(env, func, start + opcode.offset(0))?;
            }

            Op::PopUnwind => {
                self.close_region(env, &[RegionKind::Boundary], "PopUnwind")?;
            }
        }
        Ok(())
    }

    /// Opens a region: captures its resumable state, opens a block and
    /// appends its opcode to the current list.
    fn enter(
        &mut self,
        env: &mut Env,
        kind: RegionKind,
        captured: usize,
        item: Option<Item>,
    ) -> Result<OpId> {
        let state = ResumableState {
            pc: self.pc,
            scope: self.scopes.last().cloned().unwrap_or_default(),
            stack: self.stack.capture(captured)?,
        };
        let block = self.builder.push_block(&mut env.tree, BlockKind::Simple)?;
        let tag = env.rt.updatable();
        let children = env.updates.new_list();
        let region = TryOp {
            kind,
            state,
            block,
            children,
            tag,
            snapshot: env.rt.now(),
        };
        let op = match item {
            Some(Item { key, value, index }) => UpdatingOp::ListItem(ListItemOp {
                key,
                value,
                index,
                region,
            }),
            None => UpdatingOp::Try(region),
        };
        let id = self.append(env, op)?;
        env.rt.consume(tag);
        self.open_target(env, kind, tag, block, children, None, -1);
        Ok(id)
    }

    /// Enters the region of one list item with its value and index pushed
    /// as the two stack arguments of the body.
    pub fn enter_item(
        &mut self,
        env: &mut Env,
        key: String,
        value: Value,
        index: usize,
    ) -> Result<OpId> {
        let value = Cell::new(&env.rt, value);
        let index = Cell::new(&env.rt, index);
        self.stack.push(StackValue::Ref(cell_ref(env, &value)));
        self.stack.push(StackValue::Ref(cell_ref(env, &index)));
        self.enter(env, RegionKind::Item, 2, Some(Item { key, value, index }))
    }

    fn enter_list(
        &mut self,
        env: &mut Env,
        key: String,
        iterable: Reference,
        body: isize,
    ) -> Result<()> {
        let state = ResumableState {
            pc: body,
            scope: self.scopes.last().cloned().unwrap_or_default(),
            stack: Vec::new(),
        };
        // Read cells through so the list is reconciled when they change.
        let iterable = Reference::computed(&env.rt, move || {
            Ok(Value::List(update::iterate(&iterable.value()?)?))
        });
        let block = self.builder.push_block_list(&mut env.tree)?;
        let tag = env.rt.updatable();
        let items = env.updates.new_list();
        let op = UpdatingOp::ListBlock(ListBlockOp {
            state,
            block,
            items,
            key: key.clone(),
            iterable: iterable.clone(),
            iterated: env.rt.now(),
            tag,
            snapshot: env.rt.now(),
        });
        self.append(env, op)?;
        env.rt.consume(tag);
        self.open_target(env, RegionKind::List, tag, block, items, None, -1);

        let values = update::iterate(&iterable.value()?)?;
        let keys = update::item_keys(&values, &key)?;
        self.lists.push(ListState {
            items: values,
            keys,
            next: 0,
        });
        Ok(())
    }

    fn push_unwind(&mut self, env: &mut Env, func: Func, catch_pc: isize) -> Result<()> {
        // Owned by the retry function, which the handler may keep.
        let slot = Cell::new(&env.rt, Value::None);
        let retry = slot.tag();
        let retry_fn = Func::new("retry", move |_| {
            slot.update(|_| {});
            Ok(Value::None)
        });
        let state = ResumableState {
            pc: self.pc,
            scope: self.scopes.last().cloned().unwrap_or_default(),
            stack: Vec::new(),
        };
        let block = self.builder.push_block(&mut env.tree, BlockKind::Simple)?;
        let tag = env.rt.updatable();
        let children = env.updates.new_list();
        let op = UpdatingOp::Boundary(BoundaryOp {
            region: TryOp {
                kind: RegionKind::Boundary,
                state,
                block,
                children,
                tag,
                snapshot: env.rt.now(),
            },
            handler: func.clone(),
            retry,
            retry_fn: retry_fn.clone(),
            catch_pc,
        });
        self.append(env, op)?;
        env.rt.consume(tag);
        let handler = Handler {
            func,
            retry,
            retry_fn,
        };
        self.open_target(
            env,
            RegionKind::Boundary,
            tag,
            block,
            children,
            Some(handler),
            catch_pc,
        );
        Ok(())
    }

    /// Pushes the child list, a tracking frame and the unwind target of a
    /// region whose block is already open.
    #[allow(clippy::too_many_arguments)]
    fn open_target(
        &mut self,
        env: &Env,
        kind: RegionKind,
        tag: Tag,
        block: BlockId,
        children: ListId,
        handler: Option<Handler>,
        catch_pc: isize,
    ) {
        self.updating.push(children);
        env.rt.begin_track();
        if let Some(handler) = &handler {
            env.rt.consume(handler.retry);
        }
        let (cursors, blocks) = self.builder.depths();
        let depths = Depths {
            ra: self.ra,
            fp: self.fp,
            sp: self.stack.len(),
            scopes: self.scopes.len(),
            cursors,
            blocks,
            updating: self.updating.len(),
            lists: self.lists.len(),
            calls: self.calls,
            frames: env.rt.frame_depth(),
        };
        self.targets.child(Target {
            kind,
            catch_pc,
            depths,
            handler,
            tag,
            block,
            children,
            error: None,
        });
    }

    /// Closes the innermost region, which must be of one of the given
    /// kinds, and points its tag at everything read inside it.
    fn close_region(&mut self, env: &mut Env, kinds: &[RegionKind], op: &str) -> Result<Target> {
        let block = match self.targets.last() {
            Some(target) if kinds.contains(&target.kind) => target.block,
            _ => return Err(Error::program(format!("unbalanced `{op}`"))),
        };
        if self.builder.block()? != block {
            return Err(Error::program(format!(
                "`{op}` with an unclosed block inside the region"
            )));
        }
        let doc = env.document.clone();
        self.builder
            .pop_block(&mut env.tree, &mut *doc.borrow_mut())?;
        self.updating.pop();
        let reads = env.rt.take_frame();
        let target = match self.targets.finally() {
            Some(target) => target,
            None => return Err(Error::program(format!("unbalanced `{op}`"))),
        };
        env.rt.update_with(target.tag, &reads);
        Ok(target)
    }

    /// Hands an error to the nearest boundary.
    ///
    /// The boundary's block and child list are cleared, the machine state is
    /// restored to what it was just inside the boundary and the handler is
    /// called with the message and a retry function. If the handler accepts
    /// the error execution continues at the matching `PopUnwind`, otherwise
    /// its error propagates to the next boundary out.
    fn unwind(&mut self, env: &mut Env, mut err: Error) -> Result<()> {
        loop {
            if err.is_fatal() || self.targets.unhandled() {
                env.rt.reset_frames(self.base_frames);
                return Err(err);
            }
            let caught = self.targets.catch(err.clone()).and_then(|t| {
                let handler = t.handler.clone()?;
                Some((t.depths, t.tag, t.block, t.children, t.catch_pc, handler))
            });
            let Some((depths, tag, block, children, catch_pc, handler)) = caught else {
                env.rt.reset_frames(self.base_frames);
                return Err(err);
            };
            trace!(error = %err, catch_pc, "unwinding to boundary");

            self.restore(depths);
            env.updates.clear_list(children);
            {
                let doc = env.document.clone();
                env.tree.clear(&mut *doc.borrow_mut(), block);
            }
            env.rt.reset_frames(depths.frames.saturating_sub(1));
            // A retry requested by the handler must change the region's tag.
            env.rt.update(tag, handler.retry);

            let args = [
                Value::String(err.message().to_owned()),
                Value::Func(handler.retry_fn.clone()),
            ];
            match env.rt.untrack(|| handler.func.call(&args)) {
                Ok(_) => {
                    env.rt.begin_track();
                    env.rt.consume(handler.retry);
                    self.pc = catch_pc;
                    return Ok(());
                }
                Err(e) => {
                    self.targets.finally();
                    err = e;
                }
            }
        }
    }

    fn restore(&mut self, depths: Depths) {
        self.stack.truncate(depths.sp);
        self.ra = depths.ra;
        self.fp = depths.fp;
        self.calls = depths.calls;
        self.scopes.truncate(depths.scopes);
        self.builder.truncate(depths.cursors, depths.blocks);
        self.updating.truncate(depths.updating);
        self.lists.truncate(depths.lists);
        self.modifiers.clear();
    }

    /// Evaluates a branch condition through a derived reference, recording
    /// an assertion when it can change.
    fn assert(&mut self, env: &mut Env, r: Reference) -> Result<bool> {
        let derived = Reference::computed(&env.rt, move || Ok(Value::Bool(r.value()?.truthy())));
        let last = derived.value()?.truthy();
        if !derived.is_const() {
            let op = UpdatingOp::Assert(AssertOp {
                tag: derived.tag(),
                reference: derived,
                last,
                snapshot: env.rt.now(),
            });
            self.append(env, op)?;
        }
        Ok(last)
    }

    /// Records the manager opcode when the instance can change and queues
    /// `install`.
    fn manage(
        &mut self,
        env: &mut Env,
        manager: Rc<dyn Manager>,
        state: Rc<dyn Any>,
        wrap: fn(ManagerOp) -> UpdatingOp,
    ) -> Result<()> {
        let tag = manager.get_tag(&state);
        if tag != Tag::CONSTANT {
            let op = wrap(ManagerOp {
                manager: manager.clone(),
                state: state.clone(),
                tag,
                snapshot: env.rt.now(),
            });
            self.append(env, op)?;
            env.rt.consume(tag);
        }
        env.schedule(Scheduled::Install(manager, state));
        Ok(())
    }

    fn append(&self, env: &mut Env, op: UpdatingOp) -> Result<OpId> {
        let list = self
            .updating
            .last()
            .copied()
            .ok_or_else(|| Error::program("no updating list is open"))?;
        Ok(env.updates.append(list, op))
    }

    fn scope(&self) -> Result<&Scope> {
        self.scopes
            .last()
            .ok_or_else(|| Error::program("no scope is open"))
    }

    fn scope_mut(&mut self) -> Result<&mut Scope> {
        self.scopes
            .last_mut()
            .ok_or_else(|| Error::program("no scope is open"))
    }

    fn address(&self, handle: Handle) -> Result<isize> {
        Ok(self.program.heap.address(handle)? as isize)
    }
}

fn register(word: u32) -> Result<Register> {
    Register::try_from(word).map_err(|word| Error::program(format!("unknown register {word}")))
}

fn cell_ref(env: &Env, cell: &Cell) -> Reference {
    let cell = cell.clone();
    Reference::computed(&env.rt, move || Ok(cell.get()))
}

/// A reference to the formatted text of a value.
fn text_ref(env: &Env, r: Reference) -> Reference {
    let formatter = env.formatter.clone();
    Reference::computed(&env.rt, move || {
        Ok(Value::String(fmt::to_text(&*formatter, &r.value()?)?))
    })
}

pub(crate) fn text_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        _ => String::new(),
    }
}

/// A reference to the attribute text of a value, `None` when the attribute
/// should be removed.
fn attribute_ref(env: &Env, r: Reference) -> Reference {
    let formatter = env.formatter.clone();
    Reference::computed(&env.rt, move || {
        Ok(match builder::attribute_text(&*formatter, &r.value()?)? {
            Some(text) => Value::String(text),
            None => Value::None,
        })
    })
}

pub(crate) fn attribute_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}
