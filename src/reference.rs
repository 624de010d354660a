//! Tracked references to values.

use std::fmt;
use std::rc::Rc;

use crate::tag::{Cache, Runtime, Tag};
use crate::{Result, Value};

/// A possibly reactive value on the operand stack.
///
/// Computed references memoize their value in a [`Cache`], so reading one
/// inside a tracking frame records its dependencies and re-reading it is
/// free until one of them changes.
#[derive(Clone)]
pub struct Reference(Rc<Inner>);

enum Inner {
    Constant(Value),
    Computed(Cache<Result<Value>>),
}

impl Reference {
    /// A reference to a value that never changes.
    pub fn constant(value: impl Into<Value>) -> Self {
        Self(Rc::new(Inner::Constant(value.into())))
    }

    /// A reference whose value is computed and cached.
    pub fn computed<F>(rt: &Runtime, f: F) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
    {
        Self(Rc::new(Inner::Computed(Cache::new(rt, f))))
    }

    /// Returns the current value.
    pub fn value(&self) -> Result<Value> {
        match &*self.0 {
            Inner::Constant(value) => Ok(value.clone()),
            Inner::Computed(cache) => cache.try_get()?,
        }
    }

    /// Returns the tag that reports changes to the value.
    pub fn tag(&self) -> Tag {
        match &*self.0 {
            Inner::Constant(_) => Tag::CONSTANT,
            Inner::Computed(cache) => cache.tag(),
        }
    }

    /// Whether the value can never change.
    ///
    /// A computed reference only becomes constant after it has been read.
    pub fn is_const(&self) -> bool {
        match &*self.0 {
            Inner::Constant(_) => true,
            Inner::Computed(cache) => cache.is_const(),
        }
    }

    /// A reference to a property of this reference's value.
    ///
    /// Cells found along the way are read through.
    pub fn property(&self, rt: &Runtime, key: &str) -> Reference {
        let parent = self.clone();
        let key = key.to_owned();
        Reference::computed(rt, move || Ok(parent.value()?.get(&key)?.resolve()))
    }

    /// Returns the value if the reference is constant, without evaluating
    /// anything.
    pub(crate) fn peek_constant(&self) -> Option<&Value> {
        match &*self.0 {
            Inner::Constant(value) => Some(value),
            Inner::Computed(_) => None,
        }
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Inner::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Inner::Computed(cache) => f.debug_tuple("Computed").field(cache).finish(),
        }
    }
}
