//! Opcode kinds and their word encoding.
//!
//! The first word of every opcode is a header:
//!
//! ```text
//!  31        11  10   9  8  7         0
//! +------------+----+-----+-----------+
//! |  reserved  | M  | len |   type    |
//! +------------+----+-----+-----------+
//! ```
//!
//! `type` is the [`Op`] discriminant, `len` the number of operand words that
//! follow the header and `M` is set for machine opcodes (the ones that only
//! touch registers and the operand stack). Jump operands are signed offsets
//! relative to the header of the jumping opcode.

pub(crate) const TYPE_MASK: u32 = 0xff;
pub(crate) const OPERAND_LEN_MASK: u32 = 0x300;
pub(crate) const OPERAND_LEN_SHIFT: u32 = 8;
pub(crate) const MACHINE_MASK: u32 = 0x400;
pub(crate) const MAX_OPERANDS: usize = 3;

macro_rules! ops {
    (
        $(
            $(#[$meta:meta])*
            $name:ident = $code:literal, operands: $len:literal $(, machine: $machine:literal)?;
        )+
    ) => {
        /// An opcode kind.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $( $(#[$meta])* $name = $code, )+
        }

        impl Op {
            /// The number of operand words following the header.
            pub fn operands(self) -> usize {
                match self {
                    $( Op::$name => $len, )+
                }
            }

            /// Whether this is a machine opcode.
            pub fn is_machine(self) -> bool {
                match self {
                    $( Op::$name => false $(|| $machine)?, )+
                }
            }

            /// The name used in disassembly listings.
            pub fn name(self) -> &'static str {
                match self {
                    $( Op::$name => stringify!($name), )+
                }
            }
        }

        impl TryFrom<u8> for Op {
            type Error = u8;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $( $code => Ok(Op::$name), )+
                    code => Err(code),
                }
            }
        }
    };
}

ops! {
    /// Push `$ra` and `$fp` and point `$fp` at the saved `$ra`.
    PushFrame = 0, operands: 0, machine: true;
    /// Restore `$ra` and `$fp` and drop the frame.
    PopFrame = 1, operands: 0, machine: true;
    /// Call the region with the given handle.
    InvokeStatic = 2, operands: 1, machine: true;
    /// Pop a handle and call it.
    InvokeVirtual = 3, operands: 0, machine: true;
    /// Jump by a relative offset.
    Jump = 4, operands: 1, machine: true;
    /// Jump to `$ra`.
    Return = 5, operands: 0, machine: true;
    /// Set `$ra` to a relative offset.
    ReturnTo = 6, operands: 1, machine: true;

    /// Push a constant primitive.
    Primitive = 16, operands: 1;
    /// Push a handle for a later `InvokeVirtual`.
    PushHandle = 17, operands: 1;
    /// Drop the given number of stack values.
    Pop = 18, operands: 1;
    /// Push a copy of the value the given distance below the top.
    Dup = 19, operands: 1;
    /// Pop a value into a register.
    Load = 20, operands: 1;
    /// Push the value of a register.
    Fetch = 21, operands: 1;

    /// Pop the self reference and push a scope sized by a symbol table.
    RootScope = 32, operands: 1;
    /// Push a copy of the current scope.
    ChildScope = 33, operands: 0;
    PopScope = 34, operands: 0;
    GetSelf = 35, operands: 0;
    /// Push the reference in the given slot.
    GetVariable = 36, operands: 1;
    /// Pop a reference into the given slot.
    SetVariable = 37, operands: 1;
    /// Pop a reference and push a reference to the named property.
    GetProperty = 38, operands: 1;

    JumpIf = 48, operands: 1;
    JumpUnless = 49, operands: 1;
    /// Open a region that re-renders on its own, capturing the given number
    /// of stack values.
    Enter = 50, operands: 1;
    Exit = 51, operands: 0;
    /// Pop an iterable and start a keyed list. Operands are the key constant
    /// and the relative offset of the item body.
    EnterList = 52, operands: 2;
    /// Enter the next item, or jump by the offset when there is none.
    Iterate = 53, operands: 1;
    ExitList = 54, operands: 0;

    Text = 64, operands: 1;
    Comment = 65, operands: 1;
    /// Pop a reference and append it as a text node.
    AppendText = 66, operands: 0;
    OpenElement = 67, operands: 1;
    FlushElement = 68, operands: 0;
    CloseElement = 69, operands: 0;
    StaticAttr = 70, operands: 2;
    /// Pop a reference and bind it to the named attribute.
    DynamicAttr = 71, operands: 1;
    /// Pop a node reference and insert into it until `PopRemoteElement`.
    PushRemoteElement = 72, operands: 0;
    PopRemoteElement = 73, operands: 0;

    /// Call a helper with the given number of popped arguments.
    Helper = 80, operands: 2;
    /// Attach a modifier to the element under construction.
    Modifier = 81, operands: 2;
    /// Create a component instance into `$s0`.
    CreateComponent = 82, operands: 2;
    InvokeLayout = 83, operands: 0;
    DidRenderLayout = 84, operands: 0;

    /// Pop an error handler and open a recoverable region. The operand is
    /// the relative offset of the matching `PopUnwind`.
    PushUnwind = 96, operands: 1;
    PopUnwind = 97, operands: 0;
}

impl Op {
    /// Returns the index of the operand holding a relative jump offset.
    pub(crate) fn jump_operand(self) -> Option<usize> {
        match self {
            Op::Jump | Op::ReturnTo | Op::JumpIf | Op::JumpUnless | Op::Iterate | Op::PushUnwind => {
                Some(0)
            }
            Op::EnterList => Some(1),
            _ => None,
        }
    }

    pub(crate) fn header(self) -> u32 {
        let machine = if self.is_machine() { MACHINE_MASK } else { 0 };
        self as u32 | (self.operands() as u32) << OPERAND_LEN_SHIFT | machine
    }
}

/// A register addressable by `Load` and `Fetch`.
///
/// `Pc` and `Sp` are listed so that encodings stay dense, but reading or
/// writing them is a program error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Pc = 0,
    Ra = 1,
    Fp = 2,
    Sp = 3,
    S0 = 4,
    S1 = 5,
    T0 = 6,
    T1 = 7,
    V0 = 8,
}

impl Register {
    pub fn name(self) -> &'static str {
        match self {
            Register::Pc => "pc",
            Register::Ra => "ra",
            Register::Fp => "fp",
            Register::Sp => "sp",
            Register::S0 => "s0",
            Register::S1 => "s1",
            Register::T0 => "t0",
            Register::T1 => "t1",
            Register::V0 => "v0",
        }
    }
}

impl TryFrom<u32> for Register {
    type Error = u32;

    fn try_from(word: u32) -> Result<Self, Self::Error> {
        Ok(match word {
            0 => Register::Pc,
            1 => Register::Ra,
            2 => Register::Fp,
            3 => Register::Sp,
            4 => Register::S0,
            5 => Register::S1,
            6 => Register::T0,
            7 => Register::T1,
            8 => Register::V0,
            word => return Err(word),
        })
    }
}

/// A decoded opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub op: Op,
    operands: [u32; MAX_OPERANDS],
    /// Encoded width in words, including the header.
    pub size: usize,
}

impl Opcode {
    pub(crate) fn new(op: Op, operands: &[u32]) -> Self {
        let mut words = [0; MAX_OPERANDS];
        words[..operands.len()].copy_from_slice(operands);
        Self {
            op,
            operands: words,
            size: 1 + operands.len(),
        }
    }

    /// Returns the operand words.
    pub fn operands(&self) -> &[u32] {
        &self.operands[..self.size - 1]
    }

    pub(crate) fn op1(&self) -> u32 {
        self.operands[0]
    }

    pub(crate) fn op2(&self) -> u32 {
        self.operands[1]
    }

    /// Reads an operand as a signed offset.
    pub(crate) fn offset(&self, i: usize) -> isize {
        self.operands[i] as i32 as isize
    }
}
