use std::fmt::Write;

use crate::program::{Handle, Program};
use crate::span::Span;
use crate::Result;

/// A textual listing of one region, one opcode per line.
pub(crate) struct Listing {
    pub text: String,
    /// The heap address of each line and the span of its opcode text.
    pub lines: Vec<(usize, Span)>,
}

impl Listing {
    pub fn span_of(&self, address: usize) -> Option<Span> {
        self.lines
            .iter()
            .find(|(a, _)| *a == address)
            .map(|(_, span)| *span)
    }
}

pub(crate) fn disassemble(program: &Program, handle: Handle) -> Result<Listing> {
    let heap = &program.heap;
    let start = heap.address(handle)?;
    let end = start + heap.size(handle)?;

    let mut text = String::new();
    let mut lines = Vec::new();
    let mut pc = start;
    while pc < end {
        if !text.is_empty() {
            text.push('\n');
        }
        let _ = write!(text, "{:04}  ", pc - start);
        let m = text.len();
        match heap.decode(pc) {
            Ok(opcode) => {
                text.push_str(opcode.op.name());
                for (i, word) in opcode.operands().iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    if opcode.op.jump_operand() == Some(i) {
                        let target = (pc - start) as isize + opcode.offset(i);
                        let _ = write!(text, "{sep}@{target:04}");
                    } else {
                        let _ = write!(text, "{sep}{word}");
                    }
                }
                lines.push((pc, Span::new(m, text.len())));
                pc += opcode.size;
            }
            Err(_) => {
                let word = heap.word(pc).unwrap_or_default();
                let _ = write!(text, ".word {word:#010x}");
                lines.push((pc, Span::new(m, text.len())));
                pc += 1;
            }
        }
    }
    text.push('\n');
    Ok(Listing { text, lines })
}
