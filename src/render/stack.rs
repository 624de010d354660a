use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::env::Manager;
use crate::program::Handle;
use crate::{Error, Reference, Result};

/// A value on the operand stack or in a general purpose register.
#[derive(Clone, Default)]
pub(crate) enum StackValue {
    #[default]
    Empty,
    /// A saved `$ra` or `$fp`.
    Int(isize),
    Ref(Reference),
    Handle(Handle),
    Component(Rc<ComponentInstance>),
}

/// A component created by `CreateComponent`, kept in `$s0` while its layout
/// renders.
pub(crate) struct ComponentInstance {
    pub manager: Rc<dyn Manager>,
    pub state: Rc<dyn Any>,
    pub layout: Handle,
    pub args: Vec<Reference>,
}

/// The local variables of a template.
///
/// Slot 0 holds `this`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    slots: Vec<Option<Reference>>,
}

/// Everything needed to render a region again from its start.
#[derive(Debug, Clone)]
pub(crate) struct ResumableState {
    pub pc: isize,
    pub scope: Scope,
    pub stack: Vec<StackValue>,
}

#[derive(Debug, Default)]
pub(crate) struct Stack {
    values: Vec<StackValue>,
}

impl StackValue {
    pub fn describe(&self) -> String {
        match self {
            StackValue::Empty => String::from("empty"),
            StackValue::Int(n) => n.to_string(),
            StackValue::Ref(r) => match r.peek_constant() {
                Some(value) => format!("{value:?}"),
                None => String::from("<computed>"),
            },
            StackValue::Handle(handle) => format!("<handle {}>", handle.index()),
            StackValue::Component(_) => String::from("<component>"),
        }
    }

    fn human(&self) -> &'static str {
        match self {
            StackValue::Empty => "nothing",
            StackValue::Int(_) => "an integer",
            StackValue::Ref(_) => "a reference",
            StackValue::Handle(_) => "a handle",
            StackValue::Component(_) => "a component",
        }
    }

    pub fn into_int(self) -> Result<isize> {
        match self {
            StackValue::Int(n) => Ok(n),
            v => Err(unexpected("an integer", &v)),
        }
    }

    pub fn into_ref(self) -> Result<Reference> {
        match self {
            StackValue::Ref(r) => Ok(r),
            v => Err(unexpected("a reference", &v)),
        }
    }

    pub fn into_handle(self) -> Result<Handle> {
        match self {
            StackValue::Handle(h) => Ok(h),
            v => Err(unexpected("a handle", &v)),
        }
    }

    pub fn as_component(&self) -> Result<&Rc<ComponentInstance>> {
        match self {
            StackValue::Component(c) => Ok(c),
            v => Err(unexpected("a component", v)),
        }
    }
}

fn unexpected(expected: &str, found: &StackValue) -> Error {
    Error::program(format!("expected {expected}, found {}", found.human()))
}

impl fmt::Debug for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Scope {
    /// A scope with `this` in slot 0 and room for `size` slots.
    pub fn root(this: Reference, size: usize) -> Self {
        let mut slots = vec![None; size.max(1)];
        slots[0] = Some(this);
        Self { slots }
    }

    pub fn get(&self, slot: u32) -> Result<Reference> {
        match self.slots.get(slot as usize) {
            Some(Some(r)) => Ok(r.clone()),
            Some(None) => Ok(Reference::constant(())),
            None => Err(Error::program(format!(
                "symbol slot {slot} is out of range"
            ))),
        }
    }

    pub fn set(&mut self, slot: u32, r: Reference) {
        let slot = slot as usize;
        if slot >= self.slots.len() {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = Some(r);
    }
}

impl Stack {
    pub fn new(values: Vec<StackValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// The `$sp` register: the index of the top value.
    pub fn sp(&self) -> isize {
        self.values.len() as isize - 1
    }

    pub fn push(&mut self, value: StackValue) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Result<StackValue> {
        self.values
            .pop()
            .ok_or_else(|| Error::program("operand stack underflow"))
    }

    pub fn pop_ref(&mut self) -> Result<Reference> {
        self.pop()?.into_ref()
    }

    /// Pops `n` references, returning them in the order they were pushed.
    pub fn pop_refs(&mut self, n: usize) -> Result<Vec<Reference>> {
        let at = self
            .values
            .len()
            .checked_sub(n)
            .ok_or_else(|| Error::program("operand stack underflow"))?;
        self.values
            .drain(at..)
            .map(StackValue::into_ref)
            .collect()
    }

    pub fn get(&self, index: isize) -> Result<&StackValue> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| Error::program(format!("stack index {index} is out of bounds")))
    }

    /// Pushes a copy of the value `distance` below the top.
    pub fn dup(&mut self, distance: usize) -> Result<()> {
        let value = self.get(self.sp() - distance as isize)?.clone();
        self.push(value);
        Ok(())
    }

    /// Copies the top `n` values without popping them.
    pub fn capture(&self, n: usize) -> Result<Vec<StackValue>> {
        let at = self
            .values
            .len()
            .checked_sub(n)
            .ok_or_else(|| Error::program("operand stack underflow"))?;
        Ok(self.values[at..].to_vec())
    }

    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StackValue> {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_refs_keeps_push_order() {
        let mut stack = Stack::default();
        stack.push(StackValue::Int(0));
        stack.push(StackValue::Ref(Reference::constant(1)));
        stack.push(StackValue::Ref(Reference::constant(2)));
        let refs = stack.pop_refs(2).unwrap();
        let values: Vec<_> = refs.iter().map(|r| r.value().unwrap()).collect();
        assert_eq!(values, [crate::Value::from(1), crate::Value::from(2)]);
        assert_eq!(stack.sp(), 0);
    }

    #[test]
    fn dup_and_underflow() {
        let mut stack = Stack::default();
        stack.push(StackValue::Int(7));
        stack.push(StackValue::Int(8));
        stack.dup(1).unwrap();
        assert_eq!(stack.pop().unwrap().into_int().unwrap(), 7);
        assert_eq!(
            stack.pop_refs(3).unwrap_err().to_string(),
            "operand stack underflow"
        );
        assert_eq!(
            stack.pop().unwrap().into_ref().unwrap_err().to_string(),
            "expected a reference, found an integer"
        );
    }
}
