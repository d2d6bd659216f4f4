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

use crate::CompileContext;
use crate::labels::{LabelName, Labels};
use crate::symbol_table::TableId;
use tracing::trace;
use trellis_common::model::CompileError;
use trellis_var::program::{Op, Opcode, Slice};

/// The compiled form of one block: where its code lives and what its frame needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledBlock {
    pub slice: Slice,
    pub table: TableId,
    /// Symbols of the block parameters, bound from the invocation's positional args.
    pub params: Vec<u32>,
    /// Frame locals reserved by the block's prelude.
    pub locals: u32,
}

impl CompiledBlock {
    pub fn has_params(&self) -> bool {
        !self.params.is_empty()
    }
}

/// Writes the opcodes of a single block into the shared program.
///
/// A builder owns the label stack and the local-slot counter of its block. Its first opcode is
/// reserved on creation and becomes `ReserveLocals` once the block is finished.
pub struct OpcodeBuilder<'c> {
    pub(crate) ctx: &'c mut CompileContext,
    pub(crate) table: TableId,
    start: usize,
    labels: Labels,
    live_locals: u32,
    max_locals: u32,
}

impl<'c> OpcodeBuilder<'c> {
    pub(crate) fn new(ctx: &'c mut CompileContext, table: TableId) -> Self {
        let start = ctx.program.push(Opcode::placeholder());
        Self {
            ctx,
            table,
            start,
            labels: Labels::new(),
            live_locals: 0,
            max_locals: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.ctx.program.next()
    }

    pub fn push(&mut self, op: Op, op1: u32, op2: u32, op3: u32) -> usize {
        self.ctx.program.push(Opcode::new(op, op1, op2, op3))
    }

    pub fn push0(&mut self, op: Op) -> usize {
        self.push(op, 0, 0, 0)
    }

    pub fn push1(&mut self, op: Op, op1: u32) -> usize {
        self.push(op, op1, 0, 0)
    }

    pub fn string(&mut self, s: &str) -> u32 {
        self.ctx.constants.string(s)
    }

    pub fn start_labels(&mut self) {
        self.labels.start_labels();
    }

    pub fn stop_labels(&mut self) -> Result<(), CompileError> {
        self.labels
            .stop_labels(&mut self.ctx.program, &mut self.ctx.constants)
    }

    pub fn label(&mut self, name: LabelName) {
        let position = self.position();
        self.labels.label(name, position);
    }

    pub fn jump(&mut self, target: LabelName) {
        self.jump_op(Op::Jump, target);
    }

    pub fn jump_if(&mut self, target: LabelName) {
        self.jump_op(Op::JumpIf, target);
    }

    pub fn jump_unless(&mut self, target: LabelName) {
        self.jump_op(Op::JumpUnless, target);
    }

    pub fn next_iter(&mut self, target: LabelName) {
        self.jump_op(Op::NextIter, target);
    }

    fn jump_op(&mut self, op: Op, target: LabelName) {
        let at = self.ctx.program.push(Opcode::placeholder());
        self.labels.jump(at, op, target);
    }

    pub fn enter(&mut self, start: LabelName, end: LabelName) {
        self.range_op(Op::Enter, start, end);
    }

    pub fn enter_list(&mut self, start: LabelName, end: LabelName) {
        self.range_op(Op::EnterList, start, end);
    }

    pub fn enter_with_key(&mut self, start: LabelName, end: LabelName) {
        self.range_op(Op::EnterWithKey, start, end);
    }

    fn range_op(&mut self, op: Op, start: LabelName, end: LabelName) {
        let at = self.ctx.program.push(Opcode::placeholder());
        self.labels.range(at, op, start, end);
    }

    /// Emit `body` as an updatable region spanning `BEGIN` to `END`; `END` is also where the
    /// region is left from.
    pub fn labelled<F>(&mut self, body: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        self.start_labels();
        self.enter("BEGIN", "END");
        self.label("BEGIN");
        body(self)?;
        self.label("END");
        self.push0(Op::Exit);
        self.stop_labels()
    }

    /// The keyed loop of `each`: one region per item, entered for every step of the iterator
    /// in the condition register.
    pub fn iter<F>(&mut self, body: F) -> Result<(), CompileError>
    where
        F: FnOnce(&mut Self) -> Result<(), CompileError>,
    {
        self.start_labels();
        self.enter_list("BEGIN", "END");
        self.label("ITER");
        self.next_iter("BREAK");
        self.enter_with_key("BEGIN", "END");
        self.label("BEGIN");
        body(self)?;
        self.label("END");
        self.push0(Op::Exit);
        self.jump("ITER");
        self.label("BREAK");
        self.push0(Op::ExitList);
        self.stop_labels()
    }

    /// Block prelude: bind the invocation's positional args to the block parameters.
    pub fn bind_params(&mut self, params: &[u32]) {
        if params.is_empty() {
            return;
        }
        let symbols = self.ctx.constants.array(params.to_vec());
        self.push1(Op::BindPositionalArgs, symbols);
    }

    pub fn get_local(&mut self) -> u32 {
        let local = self.live_locals;
        self.live_locals += 1;
        self.max_locals = self.max_locals.max(self.live_locals);
        local
    }

    pub fn release_local(&mut self, local: u32) {
        debug_assert_eq!(local + 1, self.live_locals, "locals released out of order");
        self.live_locals -= 1;
    }

    /// Finish the block: size its locals and close its slice.
    pub fn to_slice(self, params: Vec<u32>) -> CompiledBlock {
        assert_eq!(self.labels.depth(), 0, "bug: unbalanced push and pop labels");
        self.ctx.program.patch(
            self.start,
            Opcode::new(Op::ReserveLocals, self.max_locals, 0, 0),
        );
        self.ctx.program.push(Opcode::new(Op::ReleaseLocals, 0, 0, 0));
        let slice = Slice::new(self.start, self.ctx.program.next());
        trace!(?slice, locals = self.max_locals, "compiled block");
        CompiledBlock {
            slice,
            table: self.table,
            params,
            locals: self.max_locals,
        }
    }
}
