use crate::program::op::{Op, Opcode, MACHINE_MASK, OPERAND_LEN_MASK, OPERAND_LEN_SHIFT, TYPE_MASK};
use crate::{Error, Result};

/// A handle to a region of the heap holding one compiled template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Handle(u32);

impl Handle {
    /// Creates a handle from a raw index, as found in an operand word.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw handle index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Append-only storage for encoded opcodes.
///
/// Regions are reserved with [`malloc`][Heap::malloc] at the current end of
/// the heap and sealed with [`finish`][Heap::finish]. Finished regions never
/// move, so handles stay valid as the heap grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Heap {
    words: Vec<u32>,
    regions: Vec<Region>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Region {
    start: usize,
    end: Option<usize>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The total number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Reserves a new region starting at the end of the heap.
    pub fn malloc(&mut self) -> Result<Handle> {
        if self.open_region().is_some() {
            return Err(Error::program("cannot allocate while another region is open"));
        }
        let handle = Handle(self.regions.len() as u32);
        self.regions.push(Region {
            start: self.words.len(),
            end: None,
        });
        Ok(handle)
    }

    /// Appends an opcode to the open region and returns its address.
    pub fn push_op(&mut self, op: Op, operands: &[u32]) -> Result<usize> {
        if operands.len() != op.operands() {
            return Err(Error::program(format!(
                "opcode `{}` takes {} operands, got {}",
                op.name(),
                op.operands(),
                operands.len()
            )));
        }
        self.expect_open()?;
        let address = self.words.len();
        self.words.push(op.header());
        self.words.extend_from_slice(operands);
        Ok(address)
    }

    /// Appends a raw word to the open region.
    pub fn push_raw(&mut self, word: u32) -> Result<usize> {
        self.expect_open()?;
        self.words.push(word);
        Ok(self.words.len() - 1)
    }

    pub(crate) fn word(&self, address: usize) -> Option<u32> {
        self.words.get(address).copied()
    }

    pub(crate) fn patch(&mut self, address: usize, word: u32) {
        self.words[address] = word;
    }

    /// Seals the region.
    pub fn finish(&mut self, handle: Handle) -> Result<()> {
        let end = self.words.len();
        let region = self.region_mut(handle)?;
        if region.end.is_some() {
            return Err(Error::program(format!(
                "region {} is already finished",
                handle.index()
            )));
        }
        region.end = Some(end);
        Ok(())
    }

    /// Drops the region and its words if it is the open region. Its handle
    /// is handed out again by the next [`malloc`][Heap::malloc].
    pub(crate) fn discard(&mut self, handle: Handle) {
        match self.regions.last() {
            Some(region) if region.end.is_none() && handle.index() + 1 == self.regions.len() => {
                let start = region.start;
                self.words.truncate(start);
                self.regions.pop();
            }
            _ => {}
        }
    }

    /// Returns the address of the first word of a finished region.
    pub fn address(&self, handle: Handle) -> Result<usize> {
        self.finished(handle).map(|(start, _)| start)
    }

    /// Returns the size in words of a finished region.
    pub fn size(&self, handle: Handle) -> Result<usize> {
        self.finished(handle).map(|(start, end)| end - start)
    }

    /// Returns the handles of all regions, in allocation order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> {
        (0..self.regions.len() as u32).map(Handle)
    }

    /// Finds the finished region containing the address, returning its
    /// handle and the offset of the address within it.
    pub(crate) fn locate(&self, address: usize) -> Option<(Handle, usize)> {
        self.regions.iter().enumerate().find_map(|(i, r)| match r.end {
            Some(end) if r.start <= address && address < end => {
                Some((Handle(i as u32), address - r.start))
            }
            _ => None,
        })
    }

    /// Decodes the opcode at the address.
    pub fn decode(&self, address: usize) -> Result<Opcode> {
        let header = *self
            .words
            .get(address)
            .ok_or_else(|| Error::program(format!("address {address} is out of bounds")))?;
        if header & !(TYPE_MASK | OPERAND_LEN_MASK | MACHINE_MASK) != 0 {
            return Err(Error::program(format!("malformed opcode header {header:#010x}")));
        }
        let op = Op::try_from((header & TYPE_MASK) as u8)
            .map_err(|code| Error::program(format!("unknown opcode {code}")))?;
        let len = ((header & OPERAND_LEN_MASK) >> OPERAND_LEN_SHIFT) as usize;
        if len != op.operands() {
            return Err(Error::program(format!(
                "opcode `{}` is encoded with {} operands, expected {}",
                op.name(),
                len,
                op.operands()
            )));
        }
        if (header & MACHINE_MASK != 0) != op.is_machine() {
            return Err(Error::program(format!(
                "opcode `{}` has the wrong machine flag",
                op.name()
            )));
        }
        let operands = self
            .words
            .get(address + 1..address + 1 + len)
            .ok_or_else(|| Error::program(format!("truncated operands for `{}`", op.name())))?;
        Ok(Opcode::new(op, operands))
    }

    fn expect_open(&self) -> Result<()> {
        match self.open_region() {
            Some(_) => Ok(()),
            None => Err(Error::program("no region is open")),
        }
    }

    fn open_region(&self) -> Option<&Region> {
        self.regions.last().filter(|r| r.end.is_none())
    }

    fn region_mut(&mut self, handle: Handle) -> Result<&mut Region> {
        self.regions
            .get_mut(handle.index())
            .ok_or_else(|| Error::program(format!("invalid handle {}", handle.index())))
    }

    fn finished(&self, handle: Handle) -> Result<(usize, usize)> {
        let region = self
            .regions
            .get(handle.index())
            .ok_or_else(|| Error::program(format!("invalid handle {}", handle.index())))?;
        match region.end {
            Some(end) => Ok((region.start, end)),
            None => Err(Error::program(format!(
                "region {} is not finished",
                handle.index()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn regions_are_stable() {
        let mut heap = Heap::new();
        let a = heap.malloc().unwrap();
        heap.push_op(Op::Text, &[0]).unwrap();
        heap.push_op(Op::Return, &[]).unwrap();
        heap.finish(a).unwrap();

        let b = heap.malloc().unwrap();
        heap.push_op(Op::Jump, &[0]).unwrap();
        heap.finish(b).unwrap();

        assert_eq!(heap.address(a).unwrap(), 0);
        assert_eq!(heap.size(a).unwrap(), 3);
        assert_eq!(heap.address(b).unwrap(), 3);
        assert_eq!(heap.locate(4), Some((b, 1)));
    }

    #[test]
    fn decode_width() {
        let mut heap = Heap::new();
        let h = heap.malloc().unwrap();
        heap.push_op(Op::StaticAttr, &[7, 9]).unwrap();
        heap.push_op(Op::Exit, &[]).unwrap();
        heap.finish(h).unwrap();

        let first = heap.decode(0).unwrap();
        assert_eq!(first.op, Op::StaticAttr);
        assert_eq!(first.operands(), &[7, 9]);
        assert_eq!(first.size, 3);
        assert_eq!(heap.decode(3).unwrap().op, Op::Exit);
    }

    #[test]
    fn decode_errors() {
        let mut heap = Heap::new();
        let h = heap.malloc().unwrap();
        heap.push_raw(0xff).unwrap();
        heap.push_raw(Op::Pop as u32).unwrap();
        heap.push_raw(Op::Jump.header()).unwrap();
        heap.finish(h).unwrap();

        assert_eq!(heap.decode(0).unwrap_err().to_string(), "unknown opcode 255");
        assert_eq!(
            heap.decode(1).unwrap_err().to_string(),
            "opcode `Pop` is encoded with 0 operands, expected 1"
        );
        assert_eq!(
            heap.decode(2).unwrap_err().to_string(),
            "truncated operands for `Jump`"
        );
        assert_eq!(heap.decode(9).unwrap_err().kind(), ErrorKind::Program);
    }

    #[test]
    fn malloc_requires_finished_region() {
        let mut heap = Heap::new();
        let h = heap.malloc().unwrap();
        assert!(heap.malloc().is_err());
        assert!(heap.address(h).is_err());
        heap.finish(h).unwrap();
        assert!(heap.finish(h).is_err());
    }

    #[test]
    fn discard_open_region() {
        let mut heap = Heap::new();
        let a = heap.malloc().unwrap();
        heap.push_op(Op::Return, &[]).unwrap();
        heap.finish(a).unwrap();
        let len = heap.len();

        let b = heap.malloc().unwrap();
        heap.push_op(Op::Return, &[]).unwrap();
        heap.discard(b);
        assert_eq!(heap.len(), len);
        assert_eq!(heap.handles().count(), 1);

        heap.discard(a);
        assert_eq!(heap.address(a).unwrap(), 0);
        assert_eq!(heap.malloc().unwrap(), b);
    }
}
