//! Defines the [`Value`] enum, representing any valid renderable data.

mod from;
#[cfg(feature = "serde")]
mod ser;

pub use std::collections::btree_map;
pub use std::collections::BTreeMap as Map;
use std::fmt;
use std::mem;
use std::rc::Rc;
pub use std::vec::Vec as List;

use crate::dom::NodeId;
use crate::tag::Cell;
use crate::{Error, Result};

/// Data to be rendered represented as a recursive enum.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(List<Value>),
    Map(Map<String, Value>),
    /// A node in the document, used as the target of a remote element.
    Node(NodeId),
    /// A host function, used for helpers and error handlers.
    Func(Func),
    /// A host object with fallible property getters.
    Object(Rc<dyn Object>),
    /// A reactive storage slot. Reading through it records a dependency.
    Cell(Cell),
}

/// A host object exposed to templates.
///
/// Getters may read [`Cell`]s, in which case any computation that reads the
/// property depends on those cells.
pub trait Object: fmt::Debug {
    /// Returns the value of the named property.
    fn get(&self, key: &str) -> Result<Value>;
}

/// A named host function.
#[derive(Clone)]
pub struct Func {
    name: Rc<str>,
    f: Rc<dyn Fn(&[Value]) -> Result<Value>>,
}

impl Func {
    /// Wraps a closure as a function value.
    pub fn new<F>(name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            f: Rc::new(f),
        }
    }

    /// Returns the name the function was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Calls the function.
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.f)(args)
    }

    fn ptr(&self) -> *const () {
        Rc::as_ptr(&self.f) as *const ()
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Func").field(&self.name).finish()
    }
}

impl Value {
    /// Returns a human readable name for the kind of value.
    pub fn human(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Node(_) => "node",
            Value::Func(_) => "function",
            Value::Object(_) => "object",
            Value::Cell(_) => "cell",
        }
    }

    /// Whether the value counts as true in a conditional.
    ///
    /// `None`, `false`, zero, the empty string and empty lists and maps are
    /// false. Cells are read through.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Cell(cell) => cell.get().truthy(),
            Value::Node(_) | Value::Func(_) | Value::Object(_) => true,
        }
    }

    /// Returns the value with any cells read through.
    pub fn resolve(&self) -> Value {
        match self {
            Value::Cell(cell) => cell.get().resolve(),
            v => v.clone(),
        }
    }

    /// Looks up a property.
    ///
    /// Maps are indexed by key and lists by position, both evaluate to `None`
    /// when the entry is missing. Lists also have a `length` property.
    /// Indexing into `None` evaluates to `None`.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self {
            Value::None => Ok(Value::None),
            Value::Map(map) => Ok(map.get(key).cloned().unwrap_or(Value::None)),
            Value::List(list) => match key.parse::<usize>() {
                Ok(i) => Ok(list.get(i).cloned().unwrap_or(Value::None)),
                Err(_) if key == "length" => Ok(Value::from(list.len())),
                Err(_) => Err(Error::render("cannot index list with string")),
            },
            Value::Object(obj) => obj.get(key),
            Value::Cell(cell) => cell.get().get(key),
            v => Err(Error::render(format!("cannot index into {}", v.human()))),
        }
    }

    /// A string that is equal for equal scalars and for the same function,
    /// object or cell.
    pub(crate) fn identity(&self) -> String {
        match self {
            Value::Func(func) => format!("func:{:p}", func.ptr()),
            Value::Object(obj) => format!("object:{:p}", Rc::as_ptr(obj) as *const ()),
            Value::Cell(cell) => format!("cell:{:p}", cell.as_ptr()),
            v => format!("{v:?}"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(s), Self::Bool(o)) => s == o,
            (Self::Integer(s), Self::Integer(o)) => s == o,
            (Self::Float(s), Self::Float(o)) => s == o,
            (Self::String(s), Self::String(o)) => s == o,
            (Self::List(s), Self::List(o)) => s == o,
            (Self::Map(s), Self::Map(o)) => s == o,
            (Self::Node(s), Self::Node(o)) => s == o,
            (Self::Func(s), Self::Func(o)) => s.ptr() == o.ptr(),
            (Self::Object(s), Self::Object(o)) => {
                Rc::as_ptr(s) as *const () == Rc::as_ptr(o) as *const ()
            }
            (Self::Cell(s), Self::Cell(o)) => s.ptr_eq(o),
            _ => mem::discriminant(self) == mem::discriminant(other),
        }
    }
}

impl Eq for Value {}
