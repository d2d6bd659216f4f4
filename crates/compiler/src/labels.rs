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

//! Two-pass jump and range resolution.
//!
//! Jumps and ranges are emitted as placeholders naming a label; once every label in the
//! enclosing label scope has been placed, `stop_labels` overwrites the placeholders with the
//! resolved positions.

use crate::constants::Constants;
use ahash::AHashMap;
use trellis_common::model::CompileError;
use trellis_var::program::{Op, Opcode, Program, Slice};

/// A label names a program position within one label scope.
pub type LabelName = &'static str;

#[derive(Debug)]
enum Pending {
    /// A jump-like op whose `op1` is the target position.
    Jump {
        at: usize,
        op: Op,
        target: LabelName,
    },
    /// A range op whose `op1` is a slice handle spanning `start` up to (excluding) `end`.
    Range {
        at: usize,
        op: Op,
        start: LabelName,
        end: LabelName,
    },
}

#[derive(Debug, Default)]
struct LabelScope {
    positions: AHashMap<LabelName, usize>,
    pending: Vec<Pending>,
}

impl LabelScope {
    fn position(&self, label: LabelName) -> Result<usize, CompileError> {
        self.positions
            .get(label)
            .copied()
            .ok_or_else(|| CompileError::UndefinedLabel {
                label: label.to_string(),
            })
    }
}

#[derive(Debug, Default)]
pub struct Labels {
    scopes: Vec<LabelScope>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn start_labels(&mut self) {
        self.scopes.push(LabelScope::default());
    }

    fn current(&mut self) -> &mut LabelScope {
        self.scopes
            .last_mut()
            .unwrap_or_else(|| panic!("bug: not in a label stack"))
    }

    /// Place `label` at `position`. Re-placing a label moves it.
    pub fn label(&mut self, label: LabelName, position: usize) {
        self.current().positions.insert(label, position);
    }

    pub fn jump(&mut self, at: usize, op: Op, target: LabelName) {
        debug_assert!(matches!(
            op,
            Op::Jump | Op::JumpIf | Op::JumpUnless | Op::NextIter
        ));
        self.current().pending.push(Pending::Jump { at, op, target });
    }

    pub fn range(&mut self, at: usize, op: Op, start: LabelName, end: LabelName) {
        debug_assert!(matches!(op, Op::Enter | Op::EnterList | Op::EnterWithKey));
        self.current()
            .pending
            .push(Pending::Range { at, op, start, end });
    }

    /// Resolve and patch every pending jump and range of the innermost label scope.
    pub fn stop_labels(
        &mut self,
        program: &mut Program,
        constants: &mut Constants,
    ) -> Result<(), CompileError> {
        let scope = self
            .scopes
            .pop()
            .unwrap_or_else(|| panic!("bug: unbalanced push and pop labels"));
        for pending in &scope.pending {
            match *pending {
                Pending::Jump { at, op, target } => {
                    let position = scope.position(target)?;
                    program.patch(at, Opcode::new(op, position as u32, 0, 0));
                }
                Pending::Range { at, op, start, end } => {
                    let start = scope.position(start)?;
                    let end = scope.position(end)?;
                    let slice = constants.slice(Slice::new(start, end));
                    program.patch(at, Opcode::new(op, slice, 0, 0));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_jumps() {
        let mut program = Program::new();
        let mut constants = Constants::new();
        let mut labels = Labels::new();
        labels.start_labels();
        labels.label("TOP", program.next());
        program.push(Opcode::new(Op::PushSelf, 0, 0, 0));
        let forward = program.push(Opcode::placeholder());
        labels.jump(forward, Op::JumpUnless, "END");
        let backward = program.push(Opcode::placeholder());
        labels.jump(backward, Op::Jump, "TOP");
        labels.label("END", program.next());
        labels.stop_labels(&mut program, &mut constants).unwrap();

        assert_eq!(
            *program.opcode(forward),
            Opcode::new(Op::JumpUnless, 3, 0, 0)
        );
        assert_eq!(*program.opcode(backward), Opcode::new(Op::Jump, 0, 0, 0));
    }

    #[test]
    fn test_undefined_label_is_an_error() {
        let mut program = Program::new();
        let mut constants = Constants::new();
        let mut labels = Labels::new();
        labels.start_labels();
        let at = program.push(Opcode::placeholder());
        labels.jump(at, Op::Jump, "NOWHERE");
        let result = labels.stop_labels(&mut program, &mut constants);
        assert_eq!(
            result,
            Err(CompileError::UndefinedLabel {
                label: "NOWHERE".to_string()
            })
        );
        assert!(result.unwrap_err().is_fatal());
    }

    #[test]
    #[should_panic(expected = "unbalanced push and pop labels")]
    fn test_unbalanced_stop() {
        let mut labels = Labels::new();
        labels
            .stop_labels(&mut Program::new(), &mut Constants::new())
            .ok();
    }

    #[test]
    #[should_panic(expected = "not in a label stack")]
    fn test_label_outside_scope() {
        Labels::new().label("X", 0);
    }
}
