use crate::{Error, Result, Value};

/// A scalar constant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Primitive {
    None,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// An entry in the constant pool.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Constant {
    /// Text, tag and attribute names, property keys and definition names.
    String(String),
    Primitive(Primitive),
    Symbols(SymbolTable),
}

/// The constant pool of a program.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Constants {
    pool: Vec<Constant>,
}

/// The local-variable slot layout of a scope.
///
/// Slot 0 always holds `this`, named symbols follow in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SymbolTable {
    names: Vec<String>,
}

impl Constants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Adds a constant and returns its index.
    pub fn push(&mut self, constant: Constant) -> u32 {
        self.pool.push(constant);
        (self.pool.len() - 1) as u32
    }

    /// Adds a string constant, reusing an existing equal one.
    pub fn add_string(&mut self, s: &str) -> u32 {
        let found = self
            .pool
            .iter()
            .position(|c| matches!(c, Constant::String(x) if x == s));
        match found {
            Some(i) => i as u32,
            None => self.push(Constant::String(s.to_owned())),
        }
    }

    pub fn get(&self, index: u32) -> Result<&Constant> {
        self.pool
            .get(index as usize)
            .ok_or_else(|| Error::program(format!("constant {index} is out of bounds")))
    }

    pub fn string(&self, index: u32) -> Result<&str> {
        match self.get(index)? {
            Constant::String(s) => Ok(s),
            c => Err(mismatch(index, "string", c)),
        }
    }

    pub fn primitive(&self, index: u32) -> Result<&Primitive> {
        match self.get(index)? {
            Constant::Primitive(p) => Ok(p),
            c => Err(mismatch(index, "primitive", c)),
        }
    }

    pub fn symbols(&self, index: u32) -> Result<&SymbolTable> {
        match self.get(index)? {
            Constant::Symbols(s) => Ok(s),
            c => Err(mismatch(index, "symbol table", c)),
        }
    }
}

fn mismatch(index: u32, expected: &str, found: &Constant) -> Error {
    let found = match found {
        Constant::String(_) => "string",
        Constant::Primitive(_) => "primitive",
        Constant::Symbols(_) => "symbol table",
    };
    Error::program(format!(
        "expected constant {index} to be a {expected}, found {found}"
    ))
}

impl SymbolTable {
    /// Builds a symbol table, validating every name as an identifier.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for name in names {
            let name = name.into();
            if !is_ident(&name) {
                return Err(Error::program(format!("invalid symbol name `{name}`")));
            }
            if name == "this" || table.names.contains(&name) {
                return Err(Error::program(format!("duplicate symbol `{name}`")));
            }
            table.names.push(name);
        }
        Ok(table)
    }

    /// The number of slots, including `this`.
    pub fn len(&self) -> usize {
        self.names.len() + 1
    }

    /// Returns the slot of the named symbol.
    pub fn slot(&self, name: &str) -> Option<u32> {
        if name == "this" {
            return Some(0);
        }
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| (i + 1) as u32)
    }

    /// Returns the name of the symbol in the slot.
    pub fn name(&self, slot: u32) -> Option<&str> {
        match slot {
            0 => Some("this"),
            n => self.names.get(n as usize - 1).map(String::as_str),
        }
    }
}

#[cfg(feature = "unicode")]
fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || unicode_ident::is_xid_start(c))
        && chars.all(unicode_ident::is_xid_continue)
}

#[cfg(not(feature = "unicode"))]
fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

impl From<Primitive> for Value {
    fn from(p: Primitive) -> Self {
        match p {
            Primitive::None => Value::None,
            Primitive::Bool(b) => Value::Bool(b),
            Primitive::Integer(n) => Value::Integer(n),
            Primitive::Float(n) => Value::Float(n),
            Primitive::String(s) => Value::String(s),
        }
    }
}

impl From<()> for Primitive {
    fn from(_: ()) -> Self {
        Primitive::None
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Primitive::Bool(b)
    }
}

impl From<i64> for Primitive {
    fn from(n: i64) -> Self {
        Primitive::Integer(n)
    }
}

impl From<i32> for Primitive {
    fn from(n: i32) -> Self {
        Primitive::Integer(i64::from(n))
    }
}

impl From<f64> for Primitive {
    fn from(n: f64) -> Self {
        Primitive::Float(n)
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Primitive::String(s.to_owned())
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Primitive::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_slots() {
        let table = SymbolTable::new(["item", "index"]).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.slot("this"), Some(0));
        assert_eq!(table.slot("index"), Some(2));
        assert_eq!(table.name(1), Some("item"));
        assert_eq!(table.slot("missing"), None);
    }

    #[test]
    fn symbol_validation() {
        assert!(SymbolTable::new(["1st"]).is_err());
        assert!(SymbolTable::new(["a", "a"]).is_err());
        assert!(SymbolTable::new(["this"]).is_err());
        assert!(SymbolTable::new(["_private", "camelCase"]).is_ok());
    }

    #[test]
    fn typed_accessors() {
        let mut constants = Constants::new();
        let s = constants.add_string("div");
        assert_eq!(constants.add_string("div"), s);
        let p = constants.push(Constant::Primitive(Primitive::Integer(3)));
        assert_eq!(constants.string(s).unwrap(), "div");
        assert_eq!(constants.primitive(p).unwrap(), &Primitive::Integer(3));
        assert_eq!(
            constants.string(p).unwrap_err().to_string(),
            "expected constant 1 to be a string, found primitive"
        );
        assert!(constants.symbols(9).is_err());
    }
}
