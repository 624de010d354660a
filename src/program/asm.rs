use crate::program::{Constant, Handle, Op, Primitive, Program, Register, SymbolTable};
use crate::{Error, Result};

/// Writes one region of opcodes into a [`Program`].
///
/// Jumps are written against [`Label`]s and patched into relative offsets
/// when the region is finished. Errors are deferred until
/// [`finish`][Assembler::finish] so opcodes can be chained. An assembler
/// dropped without a successful `finish` discards its region.
///
/// # Examples
///
/// ```
/// use tessera::program::{Op, Program};
///
/// let mut program = Program::new();
/// let mut asm = program.assembler()?;
/// let end = asm.label();
/// asm.open_element("p")
///     .op(Op::FlushElement, &[])
///     .text("hello")
///     .op(Op::CloseElement, &[])
///     .jump(Op::Jump, end)
///     .bind(end)
///     .op(Op::Return, &[]);
/// let handle = asm.finish()?;
/// # Ok::<(), tessera::Error>(())
/// ```
pub struct Assembler<'p> {
    program: &'p mut Program,
    handle: Handle,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
    error: Option<Error>,
}

/// A position in the region being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// An operand word, either immediate or the offset to a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(u32),
    Label(Label),
}

struct Fixup {
    /// Address of the operand word to patch.
    at: usize,
    /// Address of the header of the jumping opcode.
    origin: usize,
    label: Label,
}

impl<'p> Assembler<'p> {
    pub(crate) fn new(program: &'p mut Program) -> Result<Self> {
        let handle = program.heap.malloc()?;
        Ok(Self {
            program,
            handle,
            labels: Vec::new(),
            fixups: Vec::new(),
            error: None,
        })
    }

    /// The handle of the region being written.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Creates an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds the label to the next opcode.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => *slot = Some(self.program.heap.len()),
            _ => self.fail(Error::program("label is bound twice")),
        }
        self
    }

    /// Appends an opcode.
    pub fn op(&mut self, op: Op, operands: &[Operand]) -> &mut Self {
        let origin = self.program.heap.len();
        let mut words = Vec::with_capacity(operands.len());
        for (i, operand) in operands.iter().enumerate() {
            match *operand {
                Operand::Imm(word) => words.push(word),
                Operand::Label(label) => {
                    self.fixups.push(Fixup {
                        at: origin + 1 + i,
                        origin,
                        label,
                    });
                    words.push(0);
                }
            }
        }
        if let Err(err) = self.program.heap.push_op(op, &words) {
            self.fail(err);
        }
        self
    }

    /// Appends an opcode whose only operand is a jump to the label.
    pub fn jump(&mut self, op: Op, label: Label) -> &mut Self {
        self.op(op, &[Operand::Label(label)])
    }

    /// Appends a raw word.
    pub fn word(&mut self, word: u32) -> &mut Self {
        if let Err(err) = self.program.heap.push_raw(word) {
            self.fail(err);
        }
        self
    }

    /// Adds a string to the constant pool and returns its index.
    pub fn string(&mut self, s: &str) -> u32 {
        self.program.constants.add_string(s)
    }

    pub fn text(&mut self, text: &str) -> &mut Self {
        let c = self.string(text);
        self.op(Op::Text, &[c.into()])
    }

    pub fn comment(&mut self, text: &str) -> &mut Self {
        let c = self.string(text);
        self.op(Op::Comment, &[c.into()])
    }

    pub fn open_element(&mut self, tag: &str) -> &mut Self {
        let c = self.string(tag);
        self.op(Op::OpenElement, &[c.into()])
    }

    pub fn static_attr(&mut self, name: &str, value: &str) -> &mut Self {
        let n = self.string(name);
        let v = self.string(value);
        self.op(Op::StaticAttr, &[n.into(), v.into()])
    }

    pub fn dynamic_attr(&mut self, name: &str) -> &mut Self {
        let n = self.string(name);
        self.op(Op::DynamicAttr, &[n.into()])
    }

    pub fn primitive(&mut self, value: impl Into<Primitive>) -> &mut Self {
        let c = self
            .program
            .constants
            .push(Constant::Primitive(value.into()));
        self.op(Op::Primitive, &[c.into()])
    }

    pub fn get_property(&mut self, key: &str) -> &mut Self {
        let c = self.string(key);
        self.op(Op::GetProperty, &[c.into()])
    }

    /// Appends a `RootScope` laid out by the given symbol names.
    pub fn root_scope(&mut self, symbols: &[&str]) -> &mut Self {
        match SymbolTable::new(symbols.iter().copied()) {
            Ok(table) => {
                let c = self.program.constants.push(Constant::Symbols(table));
                self.op(Op::RootScope, &[c.into()])
            }
            Err(err) => {
                self.fail(err);
                self
            }
        }
    }

    /// Appends an `EnterList` keyed by `@index`, `@identity` or a property
    /// name.
    pub fn enter_list(&mut self, key: &str, body: Label) -> &mut Self {
        let c = self.string(key);
        self.op(Op::EnterList, &[c.into(), body.into()])
    }

    pub fn helper(&mut self, name: &str, argc: u32) -> &mut Self {
        let c = self.string(name);
        self.op(Op::Helper, &[c.into(), argc.into()])
    }

    pub fn modifier(&mut self, name: &str, argc: u32) -> &mut Self {
        let c = self.string(name);
        self.op(Op::Modifier, &[c.into(), argc.into()])
    }

    pub fn create_component(&mut self, name: &str, argc: u32) -> &mut Self {
        let c = self.string(name);
        self.op(Op::CreateComponent, &[c.into(), argc.into()])
    }

    /// Patches all jumps and seals the region.
    pub fn finish(mut self) -> Result<Handle> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        for fixup in &self.fixups {
            let target = self
                .labels
                .get(fixup.label.0)
                .copied()
                .flatten()
                .ok_or_else(|| Error::program("label was never bound"))?;
            let offset = target as i64 - fixup.origin as i64;
            self.program.heap.patch(fixup.at, offset as i32 as u32);
        }
        self.program.heap.finish(self.handle)?;
        Ok(self.handle)
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

// An unfinished region would block every later `malloc`.
impl Drop for Assembler<'_> {
    fn drop(&mut self) {
        self.program.heap.discard(self.handle);
    }
}

impl From<u32> for Operand {
    fn from(word: u32) -> Self {
        Operand::Imm(word)
    }
}

impl From<Label> for Operand {
    fn from(label: Label) -> Self {
        Operand::Label(label)
    }
}

impl From<Register> for Operand {
    fn from(register: Register) -> Self {
        Operand::Imm(register as u32)
    }
}

impl From<Handle> for Operand {
    fn from(handle: Handle) -> Self {
        Operand::Imm(handle.index() as u32)
    }
}
