// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use crate::program::opcode::{Op, Opcode};
use std::fmt::{Display, Formatter};

/// A half-open `[start, end)` range of the program; the unit a compiled block executes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Slice {
    pub start: usize,
    pub end: usize,
}

impl Slice {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "inverted slice {start}..{end}");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, ip: usize) -> bool {
        (self.start..self.end).contains(&ip)
    }
}

/// The append-only opcode array every block of a compilation writes into.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    opcodes: Vec<Opcode>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// The position the next opcode will be written to.
    pub fn next(&self) -> usize {
        self.opcodes.len()
    }

    pub fn len(&self) -> usize {
        self.opcodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    pub fn push(&mut self, opcode: Opcode) -> usize {
        let at = self.opcodes.len();
        self.opcodes.push(opcode);
        at
    }

    /// Overwrite a previously written opcode. Only placeholders are ever patched.
    pub fn patch(&mut self, at: usize, opcode: Opcode) {
        let slot = &mut self.opcodes[at];
        assert_eq!(
            slot.op,
            Op::Noop,
            "bug: patching non-placeholder opcode at {at}"
        );
        *slot = opcode;
    }

    pub fn opcode(&self, ip: usize) -> &Opcode {
        &self.opcodes[ip]
    }

    pub fn slice(&self, slice: Slice) -> &[Opcode] {
        &self.opcodes[slice.start..slice.end]
    }

    pub fn opcodes(&self) -> &[Opcode] {
        &self.opcodes
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, op) in self.opcodes.iter().enumerate() {
            writeln!(f, "{i:04}: {} {} {} {}", op.op, op.op1, op.op2, op.op3)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_placeholder() {
        let mut program = Program::new();
        program.push(Opcode::new(Op::Text, 1, 0, 0));
        let at = program.push(Opcode::placeholder());
        program.patch(at, Opcode::new(Op::Jump, 0, 0, 0));
        assert_eq!(program.opcode(at).op, Op::Jump);
        assert_eq!(program.slice(Slice::new(0, 2)).len(), 2);
        assert!(program.to_string().starts_with("0000: Text 1 0 0"));
    }

    #[test]
    #[should_panic(expected = "patching non-placeholder")]
    fn test_patch_written_opcode() {
        let mut program = Program::new();
        let at = program.push(Opcode::new(Op::Text, 1, 0, 0));
        program.patch(at, Opcode::new(Op::Jump, 0, 0, 0));
    }

    #[test]
    fn test_slice_bounds() {
        let s = Slice::new(3, 5);
        assert!(s.contains(3) && s.contains(4) && !s.contains(5));
        assert_eq!(s.len(), 2);
        assert!(Slice::new(2, 2).is_empty());
    }
}
