use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::tag::{Runtime, Tag};
use crate::Value;

/// A reactive storage slot.
///
/// Reading the cell inside a tracking frame records a dependency on it and
/// writing to it advances the revision clock. Cloning yields a handle to the
/// same slot.
#[derive(Clone)]
pub struct Cell(Rc<Inner>);

struct Inner {
    rt: Runtime,
    tag: Tag,
    value: RefCell<Value>,
}

impl Cell {
    /// Creates a new cell holding the value.
    pub fn new(rt: &Runtime, value: impl Into<Value>) -> Self {
        Self(Rc::new(Inner {
            rt: rt.clone(),
            tag: rt.dirtyable(),
            value: RefCell::new(value.into()),
        }))
    }

    /// Returns the current value and records the read.
    pub fn get(&self) -> Value {
        self.0.rt.consume(self.0.tag);
        self.0.value.borrow().clone()
    }

    /// Returns the current value without recording the read.
    pub fn peek(&self) -> Value {
        self.0.value.borrow().clone()
    }

    /// Replaces the value.
    pub fn set(&self, value: impl Into<Value>) {
        *self.0.value.borrow_mut() = value.into();
        self.0.rt.dirty(self.0.tag);
    }

    /// Modifies the value in place.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut Value),
    {
        f(&mut self.0.value.borrow_mut());
        self.0.rt.dirty(self.0.tag);
    }

    /// Returns the tag of the cell.
    pub fn tag(&self) -> Tag {
        self.0.tag
    }

    pub(crate) fn ptr_eq(&self, other: &Cell) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn as_ptr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.rt.release(self.tag);
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_tuple("Cell");
        match self.0.value.try_borrow() {
            Ok(value) => d.field(&*value),
            Err(_) => d.field(&"<borrowed>"),
        };
        d.finish()
    }
}
