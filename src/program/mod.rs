//! Compiled programs: the opcode heap, the constant pool and symbol tables.
//!
//! A program is produced by a template compiler, which lives outside of this
//! crate. [`Assembler`] is a small encoder for writing regions by hand.

mod asm;
mod constants;
mod disasm;
mod heap;
mod op;

pub use crate::program::asm::{Assembler, Label, Operand};
pub use crate::program::constants::{Constant, Constants, Primitive, SymbolTable};
pub use crate::program::heap::{Handle, Heap};
pub use crate::program::op::{Op, Opcode, Register};

use crate::{Error, Result};

/// A heap of compiled regions together with their constant pool.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    pub(crate) heap: Heap,
    pub(crate) constants: Constants,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a program from parts produced elsewhere.
    pub fn from_parts(heap: Heap, constants: Constants) -> Self {
        Self { heap, constants }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn constants(&self) -> &Constants {
        &self.constants
    }

    pub fn constants_mut(&mut self) -> &mut Constants {
        &mut self.constants
    }

    /// Starts writing a new region.
    pub fn assembler(&mut self) -> Result<Assembler<'_>> {
        Assembler::new(self)
    }

    /// Returns a listing of the region, one opcode per line.
    pub fn disassemble(&self, handle: Handle) -> Result<String> {
        disasm::disassemble(self, handle).map(|listing| listing.text)
    }

    /// Attaches the listing of the faulting region to an error that has a
    /// location.
    pub(crate) fn annotate(&self, err: Error) -> Error {
        let Some(location) = err.location() else {
            return err;
        };
        let listing = match disasm::disassemble(self, location.handle) {
            Ok(listing) => listing,
            Err(_) => return err,
        };
        let address = self.heap.address(location.handle).unwrap_or_default() + location.offset;
        match listing.span_of(address) {
            Some(span) => err.with_listing(listing.text, span),
            None => err,
        }
    }
}
